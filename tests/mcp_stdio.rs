//! Integration tests for the stdio MCP transport.
//!
//! These tests verify that:
//! - The server answers initialize with its identity and tools capability
//! - The three port-forward tools are listed
//! - list/cancel/create report their results and domain errors as tool results
//! - The process exits when stdin is closed
//!
//! Protocol: rmcp's stdio transport uses newline-delimited JSON.
//! Each message is a single JSON object on one line, terminated by `\n`.
//!
//! None of these calls reach a cluster: listing and cancelling never touch
//! the API, and the create call fails port validation first.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Test harness
// ---------------------------------------------------------------------------

/// Holds the `kmcp stdio` process and kills it on drop.
struct StdioHarness {
    child: Child,
    _config_dir: tempfile::TempDir,
}

impl Drop for StdioHarness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_kmcp() -> StdioHarness {
    // Point at a config file that does not exist so the user's real config
    // never leaks into the test.
    let config_dir = tempfile::tempdir().unwrap();
    let child = Command::new(env!("CARGO_BIN_EXE_kmcp"))
        .arg("--config")
        .arg(config_dir.path().join("config.toml"))
        .arg("stdio")
        .env_remove("KMCP_NAMESPACE")
        .env("RUST_LOG", "kmcp=debug")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn kmcp stdio");

    StdioHarness {
        child,
        _config_dir: config_dir,
    }
}

/// Run `body` on a worker thread, failing the test if it takes too long.
fn with_timeout(harness: StdioHarness, body: impl FnOnce() + Send + 'static) {
    let handle = std::thread::spawn(body);

    let timeout = Duration::from_secs(15);
    let start = std::time::Instant::now();
    loop {
        if handle.is_finished() {
            break;
        }
        if start.elapsed() > timeout {
            drop(harness);
            panic!("test timed out after {:?}", timeout);
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let result = handle.join();
    drop(harness);
    result.expect("test thread panicked");
}

// ---------------------------------------------------------------------------
// JSON-RPC helpers
// ---------------------------------------------------------------------------

fn send_jsonrpc(stdin: &mut impl Write, msg: &serde_json::Value) {
    let payload = serde_json::to_string(msg).unwrap();
    writeln!(stdin, "{}", payload).unwrap();
    stdin.flush().unwrap();
}

/// Read lines until a JSON-RPC response (has "jsonrpc" and "id") arrives.
fn read_jsonrpc(reader: &mut BufReader<impl std::io::Read>) -> serde_json::Value {
    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .expect("failed to read line from stdout");
        if bytes_read == 0 {
            panic!("unexpected EOF while reading JSON-RPC response from stdout");
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if json.get("jsonrpc").is_some() && json.get("id").is_some() {
                return json;
            }
        }
    }
}

fn initialize(
    stdin: &mut impl Write,
    reader: &mut BufReader<impl std::io::Read>,
) -> serde_json::Value {
    send_jsonrpc(
        stdin,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "test-stdio", "version": "0.1" }
            }
        }),
    );
    let response = read_jsonrpc(reader);

    send_jsonrpc(
        stdin,
        &serde_json::json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    );
    std::thread::sleep(Duration::from_millis(100));
    response
}

fn call_tool(
    stdin: &mut impl Write,
    reader: &mut BufReader<impl std::io::Read>,
    id: u64,
    name: &str,
    arguments: serde_json::Value,
) -> serde_json::Value {
    send_jsonrpc(
        stdin,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        }),
    );
    let response = read_jsonrpc(reader);
    assert_eq!(response["id"], id, "mismatched response: {}", response);
    response
}

fn tool_text(response: &serde_json::Value) -> String {
    response["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("expected text content, got: {}", response))
        .to_string()
}

fn is_error(response: &serde_json::Value) -> bool {
    response["result"]["isError"].as_bool().unwrap_or(false)
}

// ── initialize ─────────────────────────────────────────────────────

#[test]
fn test_stdio_initialize() {
    let mut harness = spawn_kmcp();
    let mut stdin = harness.child.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.child.stdout.take().unwrap());

    with_timeout(harness, move || {
        let response = initialize(&mut stdin, &mut reader);

        assert_eq!(response["jsonrpc"], "2.0");
        assert_eq!(response["id"], 1);
        let result = &response["result"];
        assert!(result.is_object(), "expected result, got: {}", response);
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "kmcp");
        assert!(result["serverInfo"]["version"].is_string());
        assert!(result["capabilities"]["tools"].is_object());
        assert!(result["instructions"]
            .as_str()
            .is_some_and(|s| s.contains("port_forward")));

        drop(stdin);
    });
}

// ── tools/list ─────────────────────────────────────────────────────

#[test]
fn test_stdio_lists_port_forward_tools() {
    let mut harness = spawn_kmcp();
    let mut stdin = harness.child.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.child.stdout.take().unwrap());

    with_timeout(harness, move || {
        initialize(&mut stdin, &mut reader);

        send_jsonrpc(
            &mut stdin,
            &serde_json::json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
        );
        let response = read_jsonrpc(&mut reader);

        let tools = response["result"]["tools"]
            .as_array()
            .unwrap_or_else(|| panic!("expected tools array, got: {}", response));
        let mut names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec!["cancel_port_forward", "list_port_forwards", "port_forward"]
        );

        let port_forward = tools.iter().find(|t| t["name"] == "port_forward").unwrap();
        let required = port_forward["inputSchema"]["required"].as_array().unwrap();
        assert!(required.iter().any(|r| r == "resource_name"));
        assert!(required.iter().any(|r| r == "kind"));

        drop(stdin);
    });
}

// ── tool calls ─────────────────────────────────────────────────────

#[test]
fn test_stdio_tool_calls_without_cluster() {
    let mut harness = spawn_kmcp();
    let mut stdin = harness.child.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.child.stdout.take().unwrap());

    with_timeout(harness, move || {
        initialize(&mut stdin, &mut reader);

        // Nothing is running yet.
        let list = call_tool(&mut stdin, &mut reader, 2, "list_port_forwards", serde_json::json!({}));
        assert!(!is_error(&list), "list failed: {}", list);
        assert_eq!(tool_text(&list), "No active port forwarding sessions found.");

        // Cancelling an unknown session is a tool error, not a protocol error.
        let cancel = call_tool(
            &mut stdin,
            &mut reader,
            3,
            "cancel_port_forward",
            serde_json::json!({ "resource_name": "missing", "namespace": "default" }),
        );
        assert!(is_error(&cancel), "expected tool error, got: {}", cancel);
        assert_eq!(
            tool_text(&cancel),
            "no active port forwarding found for default/missing"
        );

        // A bad port specification is rejected before any cluster call.
        let create = call_tool(
            &mut stdin,
            &mut reader,
            4,
            "port_forward",
            serde_json::json!({ "resource_name": "web", "kind": "Pod", "ports": "abc" }),
        );
        assert!(is_error(&create), "expected tool error, got: {}", create);
        assert!(tool_text(&create).contains("abc"));

        // The failed create left nothing behind.
        let list = call_tool(&mut stdin, &mut reader, 5, "list_port_forwards", serde_json::json!({}));
        assert_eq!(tool_text(&list), "No active port forwarding sessions found.");

        drop(stdin);
    });
}

// ── shutdown ───────────────────────────────────────────────────────

#[test]
fn test_stdio_exits_when_stdin_closes() {
    let mut harness = spawn_kmcp();
    let mut stdin = harness.child.stdin.take().unwrap();
    let mut reader = BufReader::new(harness.child.stdout.take().unwrap());

    initialize(&mut stdin, &mut reader);
    drop(stdin);

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = harness.child.try_wait().unwrap() {
            assert!(status.success(), "kmcp exited with {status}");
            break;
        }
        if std::time::Instant::now() > deadline {
            panic!("kmcp did not exit after stdin closed");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
