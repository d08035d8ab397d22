//! mcp-probe - scripted test harness for MCP servers
//!
//! This library parses one-line tool invocations, runs them in order against
//! a spawned stdio JSON-RPC server, and records a structured result per step.

pub mod cli;
pub mod commands;
pub mod common;
pub mod mcp;
pub mod script;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use script::{parse_invocation, ParamSchema, ToolInvocation, Value};
pub use testing::{RunReport, SequenceRunner, StepResult};
