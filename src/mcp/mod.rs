//! MCP (JSON-RPC over stdio) client side
//!
//! [`session`] owns the server process, [`codec`] frames lines, [`types`]
//! holds the envelopes and [`client`] puts them together.

pub mod client;
pub mod codec;
pub mod session;
pub mod types;

pub use client::{LineChannel, McpClient};
pub use session::{LaunchSpec, ServerSession};
pub use types::{CallOutcome, HandshakeParams, RpcError};
