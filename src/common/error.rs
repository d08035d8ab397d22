//! Error types for the harness
//!
//! Every failure a step can hit is one variant here. The runner never lets
//! these escape: each one is folded into an [`ErrorInfo`] on the step record.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mcp-probe
#[derive(Error, Debug)]
pub enum Error {
    // === Script Errors ===
    #[error("Parse error: {message} (in '{line}')")]
    Parse { line: String, message: String },

    #[error("Undefined variable '${{{0}}}'")]
    UndefinedVariable(String),

    // === Session Errors ===
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed: server output ended before a response arrived")]
    ConnectionClosed,

    #[error("Request timed out after {}ms without a response", .0.as_millis())]
    RequestTimeout(Duration),

    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request '{method}' failed with code {code}: {message}")]
    ToolFailed {
        method: String,
        code: i64,
        message: String,
    },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Interrupted")]
    Interrupted,
}

impl Error {
    /// Create a parse error for a DSL line
    pub fn parse(line: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            line: line.to_string(),
            message: message.into(),
        }
    }

    /// Create a tool failure from a method name and the server's error object
    pub fn tool_failed(method: &str, code: i64, message: &str) -> Self {
        Self::ToolFailed {
            method: method.to_string(),
            code,
            message: message.to_string(),
        }
    }

    /// Classify this error into the step-level taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse { .. } => ErrorKind::ParseError,
            Error::UndefinedVariable(_) => ErrorKind::UndefinedVariable,
            Error::Connection(_) | Error::ConnectionClosed => ErrorKind::ConnectionError,
            Error::RequestTimeout(_) => ErrorKind::RequestTimeout,
            Error::Protocol(_) | Error::Json(_) => ErrorKind::ProtocolError,
            Error::ToolFailed { .. } => ErrorKind::ToolError,
            Error::Config(_) | Error::ConfigParse(_) | Error::FileRead { .. } => {
                ErrorKind::ConfigError
            }
            Error::Io(_) | Error::Internal(_) | Error::Interrupted => ErrorKind::InternalError,
        }
    }

    /// Whether this error leaves the session unusable for further steps
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::ConnectionClosed)
    }
}

/// Serializable error category recorded on each failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    UndefinedVariable,
    ConnectionError,
    RequestTimeout,
    ProtocolError,
    ToolError,
    ConfigError,
    InternalError,
}

/// Human-readable error captured into a step or run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    /// Attach the raw payload the server sent along with the error
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&Error> for ErrorInfo {
    fn from(e: &Error) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}
