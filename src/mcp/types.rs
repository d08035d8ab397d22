//! JSON-RPC 2.0 envelopes and MCP payloads
//!
//! Requests and notifications are plain serde structs. Responses are decoded
//! by hand in [`decode_incoming`] because every shape violation has to be
//! reported as a protocol error rather than a generic deserialization one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

pub const JSONRPC_VERSION: &str = "2.0";

// === Outgoing ===

/// Request envelope: `{"jsonrpc":"2.0","id":..,"method":..,"params":..}`
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope<'a> {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl<'a> RequestEnvelope<'a> {
    pub fn new(id: i64, method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// Notification envelope, no id and no response
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEnvelope<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl<'a> NotificationEnvelope<'a> {
    pub fn new(method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

// === Incoming ===

/// Error object carried in a response's `error` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// The error object as JSON, for storing as a step payload
    pub fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("code".to_string(), Value::from(self.code));
        obj.insert("message".to_string(), Value::from(self.message.clone()));
        if let Some(data) = &self.data {
            obj.insert("data".to_string(), data.clone());
        }
        Value::Object(obj)
    }
}

/// Outcome of one request
///
/// A server-reported error is a valid exchange, so it is returned here
/// rather than raised; callers decide whether it fails a step.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success(Value),
    ToolError(RpcError),
}

impl CallOutcome {
    /// Turn a reported error into `Error::ToolFailed`
    pub fn into_result(self, method: &str) -> Result<Value> {
        match self {
            CallOutcome::Success(value) => Ok(value),
            CallOutcome::ToolError(err) => Err(Error::tool_failed(method, err.code, &err.message)),
        }
    }
}

/// Response envelope with exactly one of `result` or `error`
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub id: i64,
    pub outcome: CallOutcome,
}

/// One decoded line from the server
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response(ResponseEnvelope),
    /// Notification or server-initiated request; carries a `method`
    ServerMessage { method: String },
    Blank,
}

/// Decode one line of server output
pub fn decode_incoming(line: &str) -> Result<Incoming> {
    if line.trim().is_empty() {
        return Ok(Incoming::Blank);
    }

    let value: Value = serde_json::from_str(line)
        .map_err(|e| Error::Protocol(format!("Invalid JSON from server: {}", e)))?;
    let Value::Object(mut obj) = value else {
        return Err(Error::Protocol("Expected a JSON object".to_string()));
    };

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(Error::Protocol(format!(
                "Unsupported jsonrpc version '{}'",
                other
            )))
        }
        None => return Err(Error::Protocol("Missing jsonrpc field".to_string())),
    }

    if let Some(method) = obj.get("method").and_then(Value::as_str) {
        return Ok(Incoming::ServerMessage {
            method: method.to_string(),
        });
    }

    let id = match obj.get("id") {
        Some(id) => id
            .as_i64()
            .ok_or_else(|| Error::Protocol(format!("Response id is not an integer: {}", id)))?,
        None => return Err(Error::Protocol("Response has no id".to_string())),
    };

    let outcome = match (obj.remove("result"), obj.remove("error")) {
        (Some(result), None) => CallOutcome::Success(result),
        (None, Some(error)) => CallOutcome::ToolError(
            serde_json::from_value(error)
                .map_err(|e| Error::Protocol(format!("Malformed error object: {}", e)))?,
        ),
        (Some(_), Some(_)) => {
            return Err(Error::Protocol(
                "Response carries both result and error".to_string(),
            ))
        }
        (None, None) => {
            return Err(Error::Protocol(
                "Response carries neither result nor error".to_string(),
            ))
        }
    };

    Ok(Incoming::Response(ResponseEnvelope { id, outcome }))
}

// === MCP payloads ===

/// Client identity sent in the `initialize` handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeParams {
    pub protocol_version: String,
    pub client_name: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams<'a> {
    pub protocol_version: &'a str,
    pub capabilities: Value,
    pub client_info: ClientInfo<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo<'a> {
    pub name: &'a str,
    pub version: &'a str,
}

impl HandshakeParams {
    pub fn to_initialize_params(&self) -> InitializeParams<'_> {
        InitializeParams {
            protocol_version: &self.protocol_version,
            capabilities: serde_json::json!({ "tools": {} }),
            client_info: ClientInfo {
                name: &self.client_name,
                version: &self.client_version,
            },
        }
    }
}

/// `tools/call` params
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallParams<'a> {
    pub name: &'a str,
    pub arguments: &'a serde_json::Map<String, Value>,
}

/// MCP tool-level failure flag on an otherwise successful result
pub fn is_error_result(result: &Value) -> bool {
    result.get("isError").and_then(Value::as_bool) == Some(true)
}
