use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_options::{AgentOptions, PermissionDecision, PermissionGuard};
use courier_protocol::{AgentError, AgentMessage, AgentResult, ContentBlock, ServerInfo};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use crate::client::AgentClient;

const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(10);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<AsyncMutex<HashMap<String, oneshot::Sender<Value>>>>;

struct Connected {
    stdin: Arc<AsyncMutex<ChildStdin>>,
    child: Child,
}

/// Drives the agent CLI over its stream-json stdio protocol.
///
/// A spawned reader task parses stdout lines, routes control responses to
/// their pending requests, answers CLI-initiated permission requests with the
/// configured guard, and forwards everything else to the message channel
/// consumed by `next_message`.
pub struct SubprocessAgentClient {
    options: AgentOptions,
    connected: AsyncMutex<Option<Connected>>,
    messages: AsyncMutex<Option<mpsc::UnboundedReceiver<AgentMessage>>>,
    pending: PendingMap,
    server_info: std::sync::Mutex<Option<ServerInfo>>,
    next_request_id: AtomicU64,
}

impl SubprocessAgentClient {
    pub fn new(options: AgentOptions) -> Self {
        Self {
            options,
            connected: AsyncMutex::new(None),
            messages: AsyncMutex::new(None),
            pending: Arc::new(AsyncMutex::new(HashMap::new())),
            server_info: std::sync::Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.options.agent_binary);
        command
            .arg("--input-format")
            .arg("stream-json")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--permission-mode")
            .arg(self.options.permission_mode.as_cli_flag())
            .arg("--append-system-prompt")
            .arg(self.options.system_prompt.append_text());
        if let Some(model) = &self.options.model {
            command.arg("--model").arg(model);
        }
        if let Some(session) = &self.options.resume_session {
            command.arg("--resume").arg(session);
        }
        if !self.options.betas.is_empty() {
            command.arg("--betas").arg(self.options.betas.join(","));
        }
        command.current_dir(&self.options.cwd);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::null());
        command.kill_on_drop(true);
        command
    }

    async fn control_request(&self, request: Value, timeout: Duration) -> AgentResult<Value> {
        let request_id = format!(
            "req-{}",
            self.next_request_id.fetch_add(1, Ordering::SeqCst)
        );
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        let message = json!({
            "type": "control_request",
            "request_id": request_id,
            "request": request,
        });
        if let Err(error) = self.send_json(&message).await {
            self.pending.lock().await.remove(&request_id);
            return Err(error);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(AgentError::Process(
                "agent control channel closed before response".to_owned(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(AgentError::Protocol(format!(
                    "agent control request timed out after {timeout:?}"
                )))
            }
        }
    }

    async fn send_json(&self, value: &Value) -> AgentResult<()> {
        let encoded = serde_json::to_string(value)
            .map_err(|err| AgentError::Protocol(format!("failed to encode agent input: {err}")))?;
        let stdin = {
            let connected = self.connected.lock().await;
            let connected = connected
                .as_ref()
                .ok_or_else(|| AgentError::NotRunning("agent client is not connected".to_owned()))?;
            Arc::clone(&connected.stdin)
        };

        let mut stdin = stdin.lock().await;
        stdin
            .write_all(encoded.as_bytes())
            .await
            .map_err(|err| AgentError::Process(format!("failed to write agent input: {err}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|err| AgentError::Process(format!("failed to delimit agent input: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| AgentError::Process(format!("failed to flush agent input: {err}")))?;
        Ok(())
    }
}

#[async_trait]
impl AgentClient for SubprocessAgentClient {
    async fn connect(&self) -> AgentResult<()> {
        {
            let connected = self.connected.lock().await;
            if connected.is_some() {
                return Err(AgentError::Internal(
                    "agent client connect called twice".to_owned(),
                ));
            }
        }

        let mut child = self.command().spawn().map_err(|err| {
            AgentError::DependencyUnavailable(format!(
                "failed to launch agent CLI '{}': {err}",
                self.options.agent_binary.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Process("agent CLI stdin unavailable".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Process("agent CLI stdout unavailable".to_owned()))?;

        let stdin = Arc::new(AsyncMutex::new(stdin));
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_reader_loop(
            stdout,
            Arc::clone(&stdin),
            Arc::clone(&self.pending),
            self.options.guard.clone(),
            message_tx,
        ));

        *self.connected.lock().await = Some(Connected { stdin, child });
        *self.messages.lock().await = Some(message_rx);

        // Best-effort handshake; a CLI that predates the initialize request
        // still streams messages, it just advertises no commands.
        match self
            .control_request(json!({"subtype": "initialize"}), INITIALIZE_TIMEOUT)
            .await
        {
            Ok(response) => {
                let info = ServerInfo::from_initialize_response(&response);
                tracing::debug!(commands = info.commands.len(), "agent initialize complete");
                *self.server_info.lock().expect("server info lock") = Some(info);
            }
            Err(error) => {
                tracing::warn!(error = %error, "agent initialize handshake failed");
            }
        }

        Ok(())
    }

    async fn send_query(&self, blocks: Vec<ContentBlock>) -> AgentResult<()> {
        let message = json!({
            "type": "user",
            "message": {"role": "user", "content": blocks},
            "parent_tool_use_id": Value::Null,
        });
        self.send_json(&message).await
    }

    async fn next_message(&self) -> AgentResult<Option<AgentMessage>> {
        let mut messages = self.messages.lock().await;
        let receiver = messages
            .as_mut()
            .ok_or_else(|| AgentError::NotRunning("agent client is not connected".to_owned()))?;
        Ok(receiver.recv().await)
    }

    async fn interrupt(&self) -> AgentResult<()> {
        self.control_request(json!({"subtype": "interrupt"}), CONTROL_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn disconnect(&self) -> AgentResult<()> {
        let Some(mut connected) = self.connected.lock().await.take() else {
            return Ok(());
        };
        let _ = connected.child.kill().await;
        let _ = connected.child.wait().await;
        self.messages.lock().await.take();
        Ok(())
    }

    async fn server_info(&self) -> AgentResult<ServerInfo> {
        self.server_info
            .lock()
            .expect("server info lock")
            .clone()
            .ok_or_else(|| {
                AgentError::Protocol("agent did not answer the initialize handshake".to_owned())
            })
    }
}

async fn run_reader_loop(
    stdout: ChildStdout,
    stdin: Arc<AsyncMutex<ChildStdin>>,
    pending: PendingMap,
    guard: Option<Arc<PermissionGuard>>,
    message_tx: mpsc::UnboundedSender<AgentMessage>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut skipped = 0_u64;

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message = match AgentMessage::parse_line(line) {
            Ok(message) => message,
            Err(error) => {
                skipped += 1;
                tracing::debug!(error = %error, skipped, "skipping unparseable agent line");
                continue;
            }
        };

        match message {
            AgentMessage::ControlResponse { response } => {
                let request_id = response
                    .get("request_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                let payload = response.get("response").cloned().unwrap_or(response);
                if let Some(sender) = pending.lock().await.remove(&request_id) {
                    let _ = sender.send(payload);
                } else {
                    tracing::debug!(request_id, "dropping unmatched control response");
                }
            }
            AgentMessage::ControlRequest {
                request_id,
                request,
            } => {
                answer_control_request(&stdin, guard.as_deref(), &request_id, &request).await;
            }
            other => {
                if message_tx.send(other).is_err() {
                    break;
                }
            }
        }
    }

    if skipped > 0 {
        tracing::info!(skipped, "agent stream contained unparseable lines");
    }
}

/// The CLI asks us before running a tool when a guard is configured; deny
/// anything the guard rejects and allow the rest.
async fn answer_control_request(
    stdin: &Arc<AsyncMutex<ChildStdin>>,
    guard: Option<&PermissionGuard>,
    request_id: &Value,
    request: &Value,
) {
    let subtype = request.get("subtype").and_then(Value::as_str);
    let response = match subtype {
        Some("can_use_tool") => {
            let tool_name = request
                .get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let input = request.get("input").cloned().unwrap_or(Value::Null);
            match guard.map(|guard| guard.check(tool_name, &input)) {
                Some(PermissionDecision::Deny { message }) => {
                    json!({"behavior": "deny", "message": message})
                }
                _ => json!({"behavior": "allow"}),
            }
        }
        other => {
            tracing::debug!(subtype = ?other, "acknowledging unhandled control request");
            json!({})
        }
    };

    let reply = json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        },
    });
    let encoded = match serde_json::to_string(&reply) {
        Ok(encoded) => encoded,
        Err(error) => {
            tracing::warn!(error = %error, "failed to encode control response");
            return;
        }
    };

    let mut stdin = stdin.lock().await;
    if let Err(error) = stdin.write_all(encoded.as_bytes()).await {
        tracing::warn!(error = %error, "failed to write control response");
        return;
    }
    let _ = stdin.write_all(b"\n").await;
    let _ = stdin.flush().await;
}
