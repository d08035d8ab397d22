//! Common utilities shared by the CLI, the runner and the protocol client

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, ErrorInfo, ErrorKind, Result};
