use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::core::error::TransportError;

const STDERR_CAPTURE_LIMIT: usize = 2000;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct McpTool {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// How to launch a stdio MCP server.
#[derive(Debug, Clone)]
pub struct McpServerSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub connect_timeout: Duration,
}

pub struct McpClient {
    _child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    pending_requests: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    tx_req: mpsc::Sender<String>,
    stderr: Arc<Mutex<String>>,
    closed: Arc<AtomicBool>,
}

impl McpClient {
    pub async fn connect(spec: &McpServerSpec) -> Result<Arc<Self>, TransportError> {
        info!("Starting MCP Server: {} ({})", spec.name, spec.command);

        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransportError::Connection(format!("failed to spawn '{}': {}", spec.command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Connection("Failed to open MCP stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Connection("Failed to open MCP stdout".into()))?;
        let stderr_pipe = child.stderr.take();

        // Channels for writing to stdin and tracking responses
        let (tx_req, mut rx_req) = mpsc::channel::<String>(100);
        let pending_requests = Arc::new(Mutex::new(HashMap::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let client = Arc::new(Self {
            _child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
            pending_requests: pending_requests.clone(),
            tx_req,
            stderr: stderr_buf.clone(),
            closed: closed.clone(),
        });

        let mut stdin_writer = tokio::io::BufWriter::new(stdin);
        tokio::spawn(async move {
            while let Some(msg) = rx_req.recv().await {
                debug!("MCP TX: {}", msg);
                if let Err(e) = stdin_writer
                    .write_all(format!("{}\n", msg).as_bytes())
                    .await
                {
                    error!("Failed to write to MCP stdin: {}", e);
                    break;
                }
                let _ = stdin_writer.flush().await;
            }
        });

        let pending = pending_requests.clone();
        let server_name_inner = spec.name.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                debug!("MCP RX [{}]: {}", server_name_inner, line);
                if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&line) {
                    let mut p = pending.lock().await;
                    if let Some(tx) = p.remove(&resp.id) {
                        let _ = tx.send(resp);
                    }
                } else {
                    warn!("Unparsed MCP RX [{}]: {}", server_name_inner, line);
                }
            }
            warn!("MCP stdout closed for server [{}].", server_name_inner);
            closed.store(true, Ordering::SeqCst);
            // Dropping the senders fails every pending request.
            pending.lock().await.clear();
        });

        if let Some(stderr_pipe) = stderr_pipe {
            let stderr_log = client.stderr.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr_pipe).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut s = stderr_log.lock().await;
                    if s.len() < STDERR_CAPTURE_LIMIT {
                        s.push_str(&line);
                        s.push('\n');
                    }
                    debug!("MCP STDERR: {}", line);
                }
            });
        }

        match tokio::time::timeout(spec.connect_timeout, client.initialize()).await {
            Err(_elapsed) => {
                let err_log = client.stderr.lock().await;
                error!(
                    "MCP Server [{}] failed to initialize (timeout). Stderr: {}",
                    spec.name, err_log
                );
                return Err(TransportError::Timeout(spec.connect_timeout));
            }
            Ok(Err(e)) => {
                let err_log = client.stderr.lock().await;
                error!(
                    "MCP Server [{}] failed to initialize: {}. Stderr: {}",
                    spec.name, e, err_log
                );
                return Err(TransportError::classify(format!(
                    "MCP initialization failed for [{}]: {}. Stderr: {}",
                    spec.name, e, err_log
                )));
            }
            Ok(Ok(())) => {
                info!("MCP Server [{}] initialized successfully", spec.name);
            }
        }

        Ok(client)
    }

    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        };

        let req_str =
            serde_json::to_string(&req).map_err(|e| TransportError::Malformed(e.to_string()))?;
        let (tx, rx) = oneshot::channel();

        {
            let mut p = self.pending_requests.lock().await;
            p.insert(id, tx);
            if self.closed.load(Ordering::SeqCst) {
                p.remove(&id);
                return Err(TransportError::Connection("MCP server has exited".into()));
            }
        }

        self.tx_req
            .send(req_str)
            .await
            .map_err(|_| TransportError::Connection("MCP stdin channel closed".into()))?;

        let resp = rx.await.map_err(|_| {
            TransportError::Connection(format!("MCP server closed before answering '{}'", method))
        })?;
        if let Some(error) = resp.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(TransportError::classify(format!("MCP RPC Error: {}", message)));
        }

        resp.result
            .ok_or_else(|| TransportError::Malformed("MCP RPC Missing result".into()))
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "schemascout",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = self.call("initialize", Some(params)).await?;
        debug!("MCP Initialized: {:?}", resp);

        let notif_str = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        })
        .to_string();
        self.tx_req
            .send(notif_str)
            .await
            .map_err(|_| TransportError::Connection("MCP stdin channel closed".into()))?;

        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>, TransportError> {
        let result = self.call("tools/list", None).await?;
        Ok(result
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|tools_arr| {
                tools_arr
                    .iter()
                    .filter_map(|t| serde_json::from_value(t.clone()).ok())
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, TransportError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });
        let result = self.call("tools/call", Some(params)).await?;
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(TransportError::classify(format!(
                "tool '{}' failed: {}",
                name,
                tool_text(&result).unwrap_or_else(|| result.to_string())
            )));
        }
        Ok(result)
    }
}

/// Concatenated text parts of a `tools/call` result.
pub fn tool_text(result: &Value) -> Option<String> {
    let parts: Vec<&str> = result
        .get("content")?
        .as_array()?
        .iter()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}
