//! Mock MCP server binary for integration testing
//!
//! Speaks line-delimited JSON-RPC on stdio. Tool behaviour is picked by
//! tool name so tests can script every kind of server misbehaviour:
//!
//! | tool         | behaviour                                     |
//! |--------------|-----------------------------------------------|
//! | `echo`       | returns its arguments                         |
//! | `position`   | returns `{"line": 7}`                         |
//! | `fail`       | JSON-RPC error -32000                         |
//! | `tool_error` | result with `isError: true`                   |
//! | `notify`     | a notification, then the result               |
//! | `slow`       | sleeps `ms` milliseconds, then echoes         |
//! | `hang`       | never answers                                 |
//! | `crash`      | exits with status 3 without answering         |
//! | `garbage`    | answers with a line that is not JSON          |
//! | `wrong_id`   | answers with an id that was never sent        |
//!
//! Flags: `--exit-immediately`, `--require-init` (reject tool calls before
//! `notifications/initialized`), `--record <path>` (append every received
//! line to a file), `--pid-file <path>` (write the process id on startup).

use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

#[derive(Default)]
struct Options {
    exit_immediately: bool,
    require_init: bool,
    record: Option<String>,
    pid_file: Option<String>,
}

fn parse_args() -> Options {
    let mut options = Options::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--exit-immediately" => options.exit_immediately = true,
            "--require-init" => options.require_init = true,
            "--record" => options.record = args.next(),
            "--pid-file" => options.pid_file = args.next(),
            other => eprintln!("mock_server: ignoring unknown argument {}", other),
        }
    }
    options
}

fn main() {
    let options = parse_args();
    if options.exit_immediately {
        eprintln!("mock_server: refusing to start");
        std::process::exit(2);
    }
    if let Some(path) = &options.pid_file {
        std::fs::write(path, std::process::id().to_string()).ok();
    }

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();
    let mut initialized = false;

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if let Some(path) = &options.record {
            record(path, &line);
        }

        let message: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let method = message["method"].as_str().unwrap_or_default();
        let id = message.get("id").cloned();

        // Notifications get no answer
        let Some(id) = id else {
            if method == "notifications/initialized" {
                initialized = true;
            }
            continue;
        };

        match method {
            "initialize" => send(
                &mut writer,
                &result(
                    &id,
                    json!({
                        "protocolVersion": message["params"]["protocolVersion"],
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "mock-server", "version": "0.1.0"}
                    }),
                ),
            ),
            "tools/list" => send(&mut writer, &result(&id, tool_list())),
            "tools/call" if options.require_init && !initialized => send(
                &mut writer,
                &error(&id, -32002, "tools/call before notifications/initialized"),
            ),
            "tools/call" => call_tool(&mut writer, &id, &message["params"]),
            _ => send(&mut writer, &error(&id, -32601, "Method not found")),
        }
    }
}

fn call_tool<W: Write>(writer: &mut W, id: &Value, params: &Value) {
    let arguments = params["arguments"].clone();
    match params["name"].as_str().unwrap_or_default() {
        "echo" => send(writer, &result(id, arguments)),
        "position" => send(writer, &result(id, json!({"line": 7}))),
        "fail" => send(writer, &error(id, -32000, "tool failed on purpose")),
        "tool_error" => send(
            writer,
            &result(
                id,
                json!({"isError": true, "content": [{"type": "text", "text": "bad input"}]}),
            ),
        ),
        "notify" => {
            send(
                writer,
                &json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {"level": "info"}}),
            );
            send(writer, &result(id, json!({"notified": true})));
        }
        "slow" => {
            let ms = arguments["ms"].as_u64().unwrap_or(100);
            std::thread::sleep(Duration::from_millis(ms));
            send(writer, &result(id, arguments));
        }
        "hang" => {}
        "crash" => std::process::exit(3),
        "garbage" => {
            writeln!(writer, "this is not json").ok();
            writer.flush().ok();
        }
        "wrong_id" => {
            let bogus = id.as_i64().unwrap_or(0) + 100;
            send(writer, &result(&json!(bogus), json!({})));
        }
        other => send(writer, &error(id, -32602, &format!("Unknown tool: {}", other))),
    }
}

fn tool_list() -> Value {
    let names = [
        "echo", "position", "fail", "tool_error", "notify", "slow", "hang", "crash", "garbage",
        "wrong_id",
    ];
    json!({
        "tools": names
            .iter()
            .map(|name| json!({"name": name, "inputSchema": {"type": "object"}}))
            .collect::<Vec<_>>()
    })
}

fn result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn send<W: Write>(writer: &mut W, message: &Value) {
    writeln!(writer, "{}", message).ok();
    writer.flush().ok();
}

fn record(path: &str, line: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        writeln!(file, "{}", line).ok();
    }
}
