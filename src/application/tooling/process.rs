//! One spawned MCP server process and its line-delimited JSON-RPC session.

use super::error::ToolInvokeError;
use crate::config::ServerConfig;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

const PROTOCOL_VERSION: &str = "2025-06-18";

/// A tool advertised by a server via `tools/list`.
#[derive(Debug, Clone)]
pub struct ServerToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

type Responder = oneshot::Sender<Result<Value, ToolInvokeError>>;

/// Handle to one server process. Cheap to clone; the child, its pipes, and
/// all bookkeeping live behind the shared inner state.
#[derive(Clone)]
pub struct ServerProcess {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServerConfig,
    child: Mutex<Option<Child>>,
    writer: Mutex<Option<BufWriter<ChildStdin>>>,
    pending: Mutex<HashMap<u64, Responder>>,
    next_id: AtomicU64,
    instructions: Mutex<Option<String>>,
    tools: Mutex<Vec<ServerToolInfo>>,
}

impl ServerProcess {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                child: Mutex::new(None),
                writer: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                instructions: Mutex::new(None),
                tools: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn the child and run the MCP handshake if it is not running yet.
    pub async fn ensure_running(&self) -> Result<(), ToolInvokeError> {
        self.inner.ensure_running().await
    }

    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ToolInvokeError> {
        self.ensure_running().await?;
        let params = json!({
            "name": tool,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            }
        });
        self.inner.send_request("tools/call", params).await
    }

    /// Server-supplied usage instructions from the `initialize` result.
    pub async fn instructions(&self) -> Option<String> {
        self.inner.instructions.lock().await.clone()
    }

    /// Cached tool catalogue, in the order the server listed it.
    pub async fn tools(&self) -> Vec<ServerToolInfo> {
        self.inner.tools.lock().await.clone()
    }
}

impl Inner {
    async fn ensure_running(self: &Arc<Self>) -> Result<(), ToolInvokeError> {
        // The child slot stays locked across the spawn; a concurrent caller
        // waits here instead of spawning a second process.
        {
            let mut child_slot = self.child.lock().await;
            if child_slot.is_some() {
                return Ok(());
            }

            let mut command = Command::new(&self.config.command);
            command
                .args(&self.config.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit());
            if let Some(dir) = &self.config.workdir {
                command.current_dir(dir);
            }
            for (key, value) in &self.config.env {
                command.env(key, value);
            }

            let mut child = command.spawn().map_err(|source| ToolInvokeError::Spawn {
                server: self.config.name.clone(),
                source,
            })?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| self.transport_error("failed to capture server stdin"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| self.transport_error("failed to capture server stdout"))?;

            *self.writer.lock().await = Some(BufWriter::new(stdin));
            *child_slot = Some(child);

            let reader = Arc::clone(self);
            tokio::spawn(async move {
                reader.read_loop(stdout).await;
            });
        }

        match self.handshake().await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.reset().await;
                Err(error)
            }
        }
    }

    async fn handshake(self: &Arc<Self>) -> Result<(), ToolInvokeError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {}
        });
        let result = self.send_request("initialize", params).await?;
        if let Some(text) = result.get("instructions").and_then(Value::as_str) {
            *self.instructions.lock().await = Some(text.to_string());
        }
        self.send_notification("notifications/initialized", json!({}))
            .await?;
        self.refresh_tools().await
    }

    async fn refresh_tools(&self) -> Result<(), ToolInvokeError> {
        let result = self.send_request("tools/list", json!({})).await?;
        let mut tools = self.tools.lock().await;
        tools.clear();
        if let Some(listed) = result.get("tools").and_then(Value::as_array) {
            for entry in listed {
                let Some(name) = entry.get("name").and_then(Value::as_str) else {
                    continue;
                };
                tools.push(ServerToolInfo {
                    name: name.to_string(),
                    description: entry
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    input_schema: entry.get("inputSchema").cloned(),
                });
            }
        }
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(raw)) = lines.next_line().await {
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&raw) {
                Ok(message) => self.dispatch(message).await,
                Err(source) => warn!(
                    server = %self.config.name,
                    line = raw,
                    %source,
                    "received invalid JSON from MCP server"
                ),
            }
        }

        // EOF: the server went away. Fail whatever is still in flight.
        self.reset().await;
    }

    async fn dispatch(self: &Arc<Self>, message: Value) {
        match (message.get("id").cloned(), message.get("method").is_some()) {
            (Some(id), true) => self.answer_server_request(id, &message).await,
            (Some(id), false) => self.settle_response(id, message).await,
            (None, true) => self.handle_notification(&message).await,
            (None, false) => {}
        }
    }

    async fn settle_response(&self, id: Value, message: Value) {
        let Some(key) = response_key(&id) else {
            return;
        };
        let responder = self.pending.lock().await.remove(&key);
        let Some(responder) = responder else {
            debug!(
                server = %self.config.name,
                response_id = key,
                "received response for unknown request"
            );
            return;
        };

        let outcome = match message.get("error") {
            Some(error) => Err(ToolInvokeError::Rpc {
                server: self.config.name.clone(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = responder.send(outcome);
    }

    async fn answer_server_request(self: &Arc<Self>, id: Value, message: &Value) {
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let reply = match method {
            "ping" => self.reply(id, Ok(json!({}))).await,
            other => {
                warn!(
                    server = %self.config.name,
                    method = other,
                    "server sent unsupported request"
                );
                self.reply(
                    id,
                    Err(json!({
                        "code": -32601,
                        "message": format!("client does not implement method '{other}'"),
                    })),
                )
                .await
            }
        };
        if let Err(error) = reply {
            warn!(server = %self.config.name, %error, "failed to answer server request");
        }
    }

    async fn handle_notification(self: &Arc<Self>, message: &Value) {
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return;
        };
        debug!(server = %self.config.name, method, "notification from server");
        if method == "notifications/tools/list_changed" {
            if let Err(error) = self.refresh_tools().await {
                warn!(
                    server = %self.config.name,
                    %error,
                    "failed to refresh tool catalogue"
                );
            }
        }
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, ToolInvokeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if let Err(error) = self.write_message(&payload).await {
            self.pending.lock().await.remove(&id);
            return Err(error);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolInvokeError::Cancelled {
                server: self.config.name.clone(),
            }),
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<(), ToolInvokeError> {
        self.write_message(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await
    }

    /// Answer a server-initiated request with either a result or an error.
    async fn reply(&self, id: Value, outcome: Result<Value, Value>) -> Result<(), ToolInvokeError> {
        let payload = match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
        };
        self.write_message(&payload).await
    }

    async fn write_message(&self, message: &Value) -> Result<(), ToolInvokeError> {
        let mut encoded =
            serde_json::to_vec(message).map_err(|source| ToolInvokeError::InvalidJson {
                server: self.config.name.clone(),
                source,
            })?;
        encoded.push(b'\n');

        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| self.transport_error("writer not initialised"))?;
        let io_error = |source: std::io::Error| ToolInvokeError::Transport {
            server: self.config.name.clone(),
            message: source.to_string(),
        };
        stream.write_all(&encoded).await.map_err(io_error)?;
        stream.flush().await.map_err(io_error)
    }

    async fn reset(&self) {
        *self.writer.lock().await = None;

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(error) = child.kill().await {
                debug!(
                    server = %self.config.name,
                    %error,
                    "failed to kill MCP server process (may have already exited)"
                );
            }
            let _ = child.wait().await;
        }

        let mut pending = self.pending.lock().await;
        for (_, responder) in pending.drain() {
            let _ = responder.send(Err(ToolInvokeError::Terminated {
                server: self.config.name.clone(),
            }));
        }
        drop(pending);

        self.tools.lock().await.clear();
        self.instructions.lock().await.take();
    }

    fn transport_error(&self, message: impl Into<String>) -> ToolInvokeError {
        ToolInvokeError::Transport {
            server: self.config.name.clone(),
            message: message.into(),
        }
    }
}

fn response_key(id: &Value) -> Option<u64> {
    match id {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_key_accepts_numeric_and_stringified_ids() {
        assert_eq!(response_key(&json!(7)), Some(7));
        assert_eq!(response_key(&json!("12")), Some(12));
        assert_eq!(response_key(&json!("abc")), None);
        assert_eq!(response_key(&json!(null)), None);
    }

    #[tokio::test]
    async fn concurrent_startup_spawns_a_single_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("spawns");
        // Appends a marker line per spawn, consumes one request, then exits.
        let script = format!("echo up >> {}; read line", marker.display());
        let config = ServerConfig::new("short-lived", "sh").with_args(["-c", script.as_str()]);
        let process = ServerProcess::new(config);

        let (first, second) = tokio::join!(process.ensure_running(), process.ensure_running());
        assert!(matches!(first, Err(ToolInvokeError::Terminated { .. })));
        assert!(second.is_ok());

        let spawns = std::fs::read_to_string(&marker).expect("marker file");
        assert_eq!(spawns.lines().count(), 1);
    }
}
