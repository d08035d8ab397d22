//! JSON-RPC client for MCP servers
//!
//! One request is in flight at a time. Every method takes `&mut self`, so
//! the borrow checker rules out pipelining; responses are matched to the
//! single pending id, and nothing else is correlated.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::time::Instant;

use super::session::ServerSession;
use super::types::*;
use crate::common::{Error, Result};

/// A duplex line channel with id allocation
///
/// Implemented by [`ServerSession`]; tests substitute a scripted channel.
#[async_trait]
pub trait LineChannel: Send {
    async fn write_line(&mut self, line: &str) -> Result<()>;
    async fn read_line(&mut self, timeout: Duration) -> Result<String>;
    fn next_request_id(&mut self) -> i64;
}

#[async_trait]
impl LineChannel for ServerSession {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        ServerSession::write_line(self, line).await
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String> {
        ServerSession::read_line(self, timeout).await
    }

    fn next_request_id(&mut self) -> i64 {
        self.allocate_request_id()
    }
}

/// MCP client over a line channel
pub struct McpClient<C> {
    channel: C,
    request_timeout: Duration,
    last_request_id: Option<i64>,
}

impl<C: LineChannel> McpClient<C> {
    pub fn new(channel: C, request_timeout: Duration) -> Self {
        Self {
            channel,
            request_timeout,
            last_request_id: None,
        }
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Id of the most recently dispatched request
    pub fn last_request_id(&self) -> Option<i64> {
        self.last_request_id
    }

    /// Send a request and wait for its response
    ///
    /// Blank lines and server notifications are skipped, as are late
    /// responses to earlier requests that timed out. All of that happens
    /// inside one `request_timeout` budget.
    pub async fn call(&mut self, method: &str, params: Option<Value>) -> Result<ResponseEnvelope> {
        let id = self.channel.next_request_id();
        self.last_request_id = Some(id);

        let json = serde_json::to_string(&RequestEnvelope::new(id, method, params.as_ref()))?;
        tracing::debug!(">>> {}", json);
        self.channel.write_line(&json).await?;

        let deadline = Instant::now() + self.request_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::RequestTimeout(self.request_timeout));
            }

            let line = match self.channel.read_line(remaining).await {
                Err(Error::RequestTimeout(_)) => {
                    return Err(Error::RequestTimeout(self.request_timeout))
                }
                other => other?,
            };
            tracing::debug!("<<< {}", line);

            match decode_incoming(&line)? {
                Incoming::Blank => continue,
                Incoming::ServerMessage { method } => {
                    tracing::debug!("Skipping server message '{}' while waiting for id {}", method, id);
                }
                Incoming::Response(response) if response.id == id => return Ok(response),
                Incoming::Response(response) if response.id < id => {
                    tracing::warn!(
                        "Discarding late response for request {} while waiting for {}",
                        response.id,
                        id
                    );
                }
                Incoming::Response(response) => {
                    return Err(Error::Protocol(format!(
                        "Response id {} does not match pending request {}",
                        response.id, id
                    )));
                }
            }
        }
    }

    /// Send a notification; nothing is read back
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        let json = serde_json::to_string(&NotificationEnvelope::new(method, params.as_ref()))?;
        tracing::debug!(">>> {}", json);
        self.channel.write_line(&json).await
    }

    /// MCP handshake: `initialize`, then `notifications/initialized`
    ///
    /// A server that rejects `initialize` is unusable, so a reported error
    /// comes back as a connection error.
    pub async fn initialize(&mut self, handshake: &HandshakeParams) -> Result<Value> {
        let params = serde_json::to_value(handshake.to_initialize_params())?;
        let response = self.call("initialize", Some(params)).await?;

        let result = match response.outcome {
            CallOutcome::Success(result) => result,
            CallOutcome::ToolError(err) => {
                return Err(Error::Connection(format!(
                    "Server rejected initialize ({}): {}",
                    err.code, err.message
                )))
            }
        };

        self.notify("notifications/initialized", None).await?;
        tracing::debug!(
            server = ?result.get("serverInfo"),
            "MCP handshake complete"
        );
        Ok(result)
    }

    /// Invoke a tool via `tools/call`
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ResponseEnvelope> {
        let params = serde_json::to_value(ToolCallParams { name, arguments })?;
        self.call("tools/call", Some(params)).await
    }

    /// Fetch the server's tool catalogue via `tools/list`
    pub async fn list_tools(&mut self) -> Result<Value> {
        self.call("tools/list", None)
            .await?
            .outcome
            .into_result("tools/list")
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// In-memory channel driven by a responder closure
#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;

    use super::*;

    pub enum Reply {
        Line(String),
        /// Server closes its stdout
        Eof,
    }

    pub fn result(request: &Value, result: Value) -> Reply {
        Reply::Line(
            serde_json::json!({"jsonrpc": "2.0", "id": request["id"], "result": result})
                .to_string(),
        )
    }

    pub fn error(request: &Value, code: i64, message: &str) -> Reply {
        Reply::Line(
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": {"code": code, "message": message}
            })
            .to_string(),
        )
    }

    type Responder = Box<dyn FnMut(&Value) -> Vec<Reply> + Send>;

    pub struct ScriptedChannel {
        /// Every message written, decoded
        pub written: Vec<Value>,
        pending: VecDeque<String>,
        closed: bool,
        next_id: i64,
        responder: Responder,
    }

    impl ScriptedChannel {
        pub fn new(responder: impl FnMut(&Value) -> Vec<Reply> + Send + 'static) -> Self {
            Self {
                written: Vec::new(),
                pending: VecDeque::new(),
                closed: false,
                next_id: 1,
                responder: Box::new(responder),
            }
        }

        /// Answers `initialize` and echoes each tool call's arguments
        pub fn echo() -> Self {
            Self::new(|req| match req["method"].as_str() {
                Some("notifications/initialized") => vec![],
                Some("initialize") => vec![result(req, serde_json::json!({"protocolVersion": "2024-11-05"}))],
                _ => vec![result(req, req["params"]["arguments"].clone())],
            })
        }

        /// Methods of the messages written so far
        pub fn methods(&self) -> Vec<String> {
            self.written
                .iter()
                .map(|m| m["method"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl LineChannel for ScriptedChannel {
        async fn write_line(&mut self, line: &str) -> Result<()> {
            if self.closed {
                return Err(Error::Connection("Server has exited".to_string()));
            }
            let message: Value = serde_json::from_str(line)?;
            for reply in (self.responder)(&message) {
                match reply {
                    Reply::Line(line) => self.pending.push_back(line),
                    Reply::Eof => self.closed = true,
                }
            }
            self.written.push(message);
            Ok(())
        }

        async fn read_line(&mut self, timeout: Duration) -> Result<String> {
            match self.pending.pop_front() {
                Some(line) => Ok(line),
                None if self.closed => Err(Error::ConnectionClosed),
                None => Err(Error::RequestTimeout(timeout)),
            }
        }

        fn next_request_id(&mut self) -> i64 {
            let id = self.next_id;
            self.next_id += 1;
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::*;
    use super::*;
    use serde_json::json;

    fn client(channel: ScriptedChannel) -> McpClient<ScriptedChannel> {
        McpClient::new(channel, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_ids_are_sequential() {
        let mut client = client(ScriptedChannel::echo());
        let args = Map::new();
        for expected in 1..=3 {
            let response = client.call_tool("noop", &args).await.unwrap();
            assert_eq!(response.id, expected);
            assert_eq!(client.last_request_id(), Some(expected));
        }
        let written = client.into_inner().written;
        let ids: Vec<_> = written.iter().map(|m| m["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_tool_call_envelope() {
        let mut client = client(ScriptedChannel::echo());
        let mut args = Map::new();
        args.insert("line".to_string(), json!(10));

        let response = client.call_tool("hover", &args).await.unwrap();
        assert_eq!(response.outcome, CallOutcome::Success(json!({"line": 10})));

        let sent = &client.into_inner().written[0];
        assert_eq!(
            sent,
            &json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": "hover", "arguments": {"line": 10}}
            })
        );
    }

    #[tokio::test]
    async fn test_skips_notifications_and_blank_lines() {
        let channel = ScriptedChannel::new(|req| {
            vec![
                Reply::Line(String::new()),
                Reply::Line(json!({"jsonrpc": "2.0", "method": "notifications/progress"}).to_string()),
                result(req, json!({"ok": true})),
            ]
        });
        let mut client = client(channel);
        let response = client.call("ping", None).await.unwrap();
        assert_eq!(response.outcome, CallOutcome::Success(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_late_response_is_discarded() {
        let mut calls = 0;
        let channel = ScriptedChannel::new(move |req| {
            calls += 1;
            match calls {
                // first request gets no answer and times out
                1 => vec![],
                // its answer shows up ahead of the second one
                _ => vec![
                    Reply::Line(json!({"jsonrpc": "2.0", "id": 1, "result": "stale"}).to_string()),
                    result(req, json!("fresh")),
                ],
            }
        });
        let mut client = client(channel);

        let err = client.call("slow", None).await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout(d) if d == Duration::from_millis(200)));

        let response = client.call("fast", None).await.unwrap();
        assert_eq!(response.id, 2);
        assert_eq!(response.outcome, CallOutcome::Success(json!("fresh")));
    }

    #[tokio::test]
    async fn test_future_id_is_protocol_error() {
        let channel = ScriptedChannel::new(|_| {
            vec![Reply::Line(json!({"jsonrpc": "2.0", "id": 99, "result": {}}).to_string())]
        });
        let err = client(channel).call("x", None).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_malformed_response_is_protocol_error() {
        let channel = ScriptedChannel::new(|_| vec![Reply::Line("{not json".to_string())]);
        let err = client(channel).call("x", None).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_tool_error_is_returned_not_raised() {
        let channel = ScriptedChannel::new(|req| vec![error(req, -32000, "no such file")]);
        let response = client(channel).call_tool("open", &Map::new()).await.unwrap();
        let CallOutcome::ToolError(err) = response.outcome else {
            panic!("expected tool error");
        };
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "no such file");
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let channel = ScriptedChannel::new(|_| vec![Reply::Eof]);
        let err = client(channel).call("x", None).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_initialize_sends_notification_after_response() {
        let mut client = client(ScriptedChannel::echo());
        let handshake = HandshakeParams {
            protocol_version: "2024-11-05".to_string(),
            client_name: "mcp-probe".to_string(),
            client_version: "0.1.0".to_string(),
        };
        client.initialize(&handshake).await.unwrap();

        let channel = client.into_inner();
        assert_eq!(channel.methods(), vec!["initialize", "notifications/initialized"]);
        assert!(channel.written[1].get("id").is_none());
        assert_eq!(channel.written[0]["params"]["clientInfo"]["name"], "mcp-probe");
    }

    #[tokio::test]
    async fn test_rejected_initialize_is_connection_error() {
        let channel = ScriptedChannel::new(|req| vec![error(req, -32602, "unsupported version")]);
        let handshake = HandshakeParams {
            protocol_version: "1999-01-01".to_string(),
            client_name: "mcp-probe".to_string(),
            client_version: "0.1.0".to_string(),
        };
        let err = client(channel).initialize(&handshake).await.unwrap_err();
        assert!(err.is_fatal_to_session());
    }

    #[tokio::test]
    async fn test_list_tools() {
        let channel = ScriptedChannel::new(|req| {
            vec![result(req, json!({"tools": [{"name": "hover"}]}))]
        });
        let tools = client(channel).list_tools().await.unwrap();
        assert_eq!(tools["tools"][0]["name"], "hover");
    }
}
