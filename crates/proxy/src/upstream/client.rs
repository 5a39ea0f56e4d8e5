//! One child-process MCP session.
//!
//! Speaks newline-delimited JSON-RPC over the child's stdin/stdout. A
//! dedicated reader task routes responses to pending requests by id, so
//! calls can overlap and an abandoned (timed-out) request never desyncs
//! the stream. The reader exiting means the transport is gone.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use config::UpstreamConfig;

use crate::content::{Item, from_protocol_value};

/// Deadline for the initialize exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for a tools/list request.
pub const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for a tools/call request.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport-level failure talking to an upstream.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The request hit its deadline; the in-flight request is abandoned
    /// and the session stays usable.
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// The child closed its stdout or the session was torn down.
    #[error("connection closed")]
    ConnectionClosed,
    /// The upstream answered with a JSON-RPC error.
    #[error("[{code}] {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// Remote error message.
        message: String,
    },
    /// Writing to the child failed.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The response did not have the expected shape.
    #[error("malformed response: {0}")]
    Protocol(String),
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Server identity reported during the handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerIdentity {
    /// Server name.
    #[serde(default)]
    pub name: String,
    /// Server version.
    #[serde(default)]
    pub version: String,
}

/// A tool as reported by an upstream server. The input schema is kept as
/// the raw JSON value and re-emitted verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamTool {
    /// Bare tool name on the upstream.
    pub name: String,
    /// Human description, possibly empty.
    #[serde(default)]
    pub description: String,
    /// Opaque JSON schema for the tool input.
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

type PendingMap = StdMutex<HashMap<u64, oneshot::Sender<RpcResponse>>>;

/// Handle to one spawned upstream session.
pub struct UpstreamClient {
    name: String,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
}

impl UpstreamClient {
    /// Spawns the child process and its reader task.
    ///
    /// The returned join handle completes when the transport is lost (child
    /// exits, closes stdout, or the read fails); the supervisor owns it.
    pub fn spawn(
        name: &str,
        config: &UpstreamConfig,
    ) -> std::io::Result<(Arc<Self>, JoinHandle<()>)> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::other(format!("no stdin pipe for upstream {name}"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::other(format!("no stdout pipe for upstream {name}"))
        })?;

        let pending: Arc<PendingMap> = Arc::new(StdMutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            name.to_string(),
            BufReader::new(stdout),
            pending.clone(),
            alive.clone(),
        ));

        let client = Arc::new(Self {
            name: name.to_string(),
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            alive,
        });

        Ok((client, reader))
    }

    /// The configured upstream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once the transport has been lost.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Performs the protocol handshake and returns the server identity.
    pub async fn initialize(&self) -> Result<ServerIdentity, RpcError> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "rlm-proxy",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self
            .request("initialize", Some(params), HANDSHAKE_TIMEOUT)
            .await?;

        self.notify("notifications/initialized", Some(serde_json::json!({})))
            .await?;

        let identity = result
            .get("serverInfo")
            .and_then(|info| serde_json::from_value(info.clone()).ok())
            .unwrap_or_default();

        Ok(identity)
    }

    /// Lists the upstream's tools.
    pub async fn list_tools(&self) -> Result<Vec<UpstreamTool>, RpcError> {
        let result = self.request("tools/list", None, LIST_TOOLS_TIMEOUT).await?;

        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| RpcError::Protocol("tools/list result without tools array".into()))?;

        Ok(tools
            .iter()
            .filter_map(|tool| match serde_json::from_value(tool.clone()) {
                Ok(tool) => Some(tool),
                Err(err) => {
                    log::warn!("Skipping malformed tool from {}: {err}", self.name);
                    None
                }
            })
            .collect())
    }

    /// Invokes one tool and returns its content items.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Vec<Item>, RpcError> {
        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });

        let result = self.request("tools/call", Some(params), CALL_TIMEOUT).await?;

        let content = result
            .get("content")
            .and_then(Value::as_array)
            .map(|content| from_protocol_value(content))
            .unwrap_or_default();

        Ok(content)
    }

    /// Closes stdin and kills the child. Idempotent.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::Relaxed);

        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }

        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<Value, RpcError> {
        if !self.is_alive() {
            return Err(RpcError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        };

        if let Err(err) = self.write_message(&request).await {
            self.forget(id);
            return Err(err);
        }

        match tokio::time::timeout(deadline, rx).await {
            Err(_) => {
                // Abandon the in-flight request; a late response is dropped
                // by the reader and the session stays healthy.
                self.forget(id);
                log::debug!("Request {method} (id {id}) to {} timed out", self.name);
                Err(RpcError::Timeout(deadline))
            }
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Ok(Ok(response)) => {
                if let Some(error) = response.error {
                    return Err(RpcError::Remote {
                        code: error.code,
                        message: error.message,
                    });
                }
                response
                    .result
                    .ok_or_else(|| RpcError::Protocol(format!("no result for {method}")))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        };
        self.write_message(&request).await
    }

    async fn write_message(&self, request: &RpcRequest<'_>) -> Result<(), RpcError> {
        let mut line = serde_json::to_string(request)
            .map_err(|err| RpcError::Protocol(err.to_string()))?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}

/// Reads lines from the child's stdout and routes responses by request id.
///
/// Non-JSON lines (stray prints from the upstream) are skipped. The loop
/// ends on EOF or a read error, which marks the session dead and fails any
/// requests still in flight.
async fn read_loop(
    name: String,
    mut reader: BufReader<tokio::process::ChildStdout>,
    pending: Arc<PendingMap>,
    alive: Arc<AtomicBool>,
) {
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                log::debug!("Upstream {name} closed stdout");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                log::error!("Read error from upstream {name}: {err}");
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Ok(response) = serde_json::from_str::<RpcResponse>(trimmed) else {
            continue;
        };

        // Only route actual responses. Server-initiated requests and
        // notifications share the stream but carry no result or error.
        if response.result.is_none() && response.error.is_none() {
            continue;
        }

        let Some(id) = response.id else {
            continue;
        };

        let sender = pending.lock().ok().and_then(|mut map| map.remove(&id));
        match sender {
            Some(sender) => {
                let _ = sender.send(response);
            }
            None => {
                log::debug!("Dropping late response {id} from upstream {name}");
            }
        }
    }

    alive.store(false, Ordering::Relaxed);
    // Fail everything still waiting by dropping the senders.
    if let Ok(mut map) = pending.lock() {
        map.clear();
    }
}
