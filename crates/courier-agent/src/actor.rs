use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_protocol::{
    classify, AgentError, AgentResult, Query, QueryResult, SlashCommand, StreamEvent, StreamSink,
};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::AgentClient;

const QUEUE_CAPACITY: usize = 32;
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub type ExitCallback = Arc<dyn Fn(i64) + Send + Sync>;

/// Construction parameters for one user's actor.
#[derive(Debug, Clone)]
pub struct UserAgentSpec {
    pub user_id: i64,
    pub directory: PathBuf,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub betas: Vec<String>,
    pub idle_timeout: Duration,
}

struct WorkItem {
    query: Query,
    sink: Arc<dyn StreamSink>,
    result_tx: oneshot::Sender<AgentResult<QueryResult>>,
}

enum WorkCommand {
    Query(Box<WorkItem>),
    Stop,
}

/// A long-lived worker owning one SDK client for one user.
///
/// The SDK binds its cancellation scopes to the task that called `connect`,
/// so every SDK call happens on the single worker task spawned by
/// [`start`](UserAgent::start); callers interact only through the bounded
/// work queue.
pub struct UserAgent {
    user_id: i64,
    directory: PathBuf,
    idle_timeout: Duration,
    session_id: Mutex<Option<String>>,
    model: Mutex<Option<String>>,
    betas: Mutex<Vec<String>>,
    running: AtomicBool,
    querying: AtomicBool,
    available_commands: Mutex<Vec<SlashCommand>>,
    queue: Mutex<Option<mpsc::Sender<WorkCommand>>>,
    worker: AsyncMutex<Option<JoinHandle<()>>>,
    client: Mutex<Option<Arc<dyn AgentClient>>>,
    last_active: Mutex<Instant>,
    on_exit: ExitCallback,
}

impl UserAgent {
    pub fn new(spec: UserAgentSpec, on_exit: ExitCallback) -> Arc<Self> {
        Arc::new(Self {
            user_id: spec.user_id,
            directory: spec.directory,
            idle_timeout: spec.idle_timeout,
            session_id: Mutex::new(spec.session_id),
            model: Mutex::new(spec.model),
            betas: Mutex::new(spec.betas),
            running: AtomicBool::new(false),
            querying: AtomicBool::new(false),
            available_commands: Mutex::new(Vec::new()),
            queue: Mutex::new(None),
            worker: AsyncMutex::new(None),
            client: Mutex::new(None),
            last_active: Mutex::new(Instant::now()),
            on_exit,
        })
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_querying(&self) -> bool {
        self.querying.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().expect("session id lock").clone()
    }

    pub fn set_session_id(&self, session_id: Option<String>) {
        *self.session_id.lock().expect("session id lock") = session_id;
    }

    pub fn model(&self) -> Option<String> {
        self.model.lock().expect("model lock").clone()
    }

    pub fn set_model(&self, model: Option<String>, betas: Option<Vec<String>>) {
        *self.model.lock().expect("model lock") = model;
        if let Some(betas) = betas {
            *self.betas.lock().expect("betas lock") = betas;
        }
    }

    pub fn betas(&self) -> Vec<String> {
        self.betas.lock().expect("betas lock").clone()
    }

    pub fn available_commands(&self) -> Vec<SlashCommand> {
        self.available_commands.lock().expect("commands lock").clone()
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.available_commands
            .lock()
            .expect("commands lock")
            .iter()
            .any(|command| command.name == name)
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock().expect("last active lock")
    }

    pub fn touch(&self) {
        *self.last_active.lock().expect("last active lock") = Instant::now();
    }

    /// Spawn the worker task and return once the SDK connection is up.
    /// A connect failure is returned synchronously and leaves the actor
    /// stopped.
    pub async fn start(self: &Arc<Self>, client: Arc<dyn AgentClient>) -> AgentResult<()> {
        if self.is_running() {
            self.stop().await;
        }

        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (connected_tx, connected_rx) = oneshot::channel();

        *self.client.lock().expect("client lock") = Some(Arc::clone(&client));
        *self.queue.lock().expect("queue lock") = Some(queue_tx);

        let worker = tokio::spawn(worker_loop(
            Arc::clone(self),
            client,
            queue_rx,
            connected_tx,
        ));
        *self.worker.lock().await = Some(worker);

        match connected_rx.await {
            Ok(Ok(())) => {
                self.touch();
                tracing::info!(
                    user_id = self.user_id,
                    directory = %self.directory.display(),
                    session_id = ?self.session_id(),
                    "user agent connected"
                );
                Ok(())
            }
            Ok(Err(error)) => {
                self.clear_runtime_state().await;
                Err(error)
            }
            Err(_) => {
                self.clear_runtime_state().await;
                Err(AgentError::Internal(
                    "agent worker exited before signaling connect".to_owned(),
                ))
            }
        }
    }

    /// Enqueue a query and wait for its result. FIFO with respect to other
    /// submissions; rejects when the actor is not running.
    pub async fn submit(
        &self,
        query: Query,
        sink: Arc<dyn StreamSink>,
    ) -> AgentResult<QueryResult> {
        if !self.is_running() {
            return Err(AgentError::NotRunning(format!(
                "no connected agent for user {}",
                self.user_id
            )));
        }
        let queue = self
            .queue
            .lock()
            .expect("queue lock")
            .clone()
            .ok_or_else(|| {
                AgentError::NotRunning(format!("no connected agent for user {}", self.user_id))
            })?;

        let (result_tx, result_rx) = oneshot::channel();
        queue
            .send(WorkCommand::Query(Box::new(WorkItem {
                query,
                sink,
                result_tx,
            })))
            .await
            .map_err(|_| {
                AgentError::NotRunning(format!(
                    "agent worker for user {} is gone",
                    self.user_id
                ))
            })?;

        match result_rx.await {
            Ok(result) => result,
            Err(_) => Err(AgentError::NotRunning(format!(
                "agent for user {} stopped before the query ran",
                self.user_id
            ))),
        }
    }

    /// Cooperative shutdown: the sentinel is handled after the in-flight item
    /// finishes; a wedged worker is cancelled after a bounded wait.
    pub async fn stop(&self) {
        let queue = self.queue.lock().expect("queue lock").take();
        if let Some(queue) = queue {
            let _ = queue.send(WorkCommand::Stop).await;
        }

        let worker = self.worker.lock().await.take();
        if let Some(mut worker) = worker {
            if tokio::time::timeout(STOP_TIMEOUT, &mut worker).await.is_err() {
                tracing::warn!(user_id = self.user_id, "agent worker stuck on stop; aborting");
                worker.abort();
                self.running.store(false, Ordering::SeqCst);
                self.querying.store(false, Ordering::SeqCst);
                self.available_commands.lock().expect("commands lock").clear();
                (self.on_exit)(self.user_id);
            }
        }
        self.client.lock().expect("client lock").take();
    }

    /// Forward to the SDK's interrupt; safe from any task, no-op while idle.
    pub async fn interrupt(&self) -> AgentResult<()> {
        if !self.is_querying() {
            return Ok(());
        }
        let client = self.client.lock().expect("client lock").clone();
        match client {
            Some(client) => {
                client.interrupt().await?;
                tracing::info!(user_id = self.user_id, "query interrupted");
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn clear_runtime_state(&self) {
        self.queue.lock().expect("queue lock").take();
        self.client.lock().expect("client lock").take();
        if let Some(worker) = self.worker.lock().await.take() {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(
    agent: Arc<UserAgent>,
    client: Arc<dyn AgentClient>,
    mut queue: mpsc::Receiver<WorkCommand>,
    connected_tx: oneshot::Sender<AgentResult<()>>,
) {
    match client.connect().await {
        Ok(()) => {
            agent.running.store(true, Ordering::SeqCst);
            let _ = connected_tx.send(Ok(()));
        }
        Err(error) => {
            // The actor never became reachable; start() reports the failure.
            let _ = connected_tx.send(Err(error));
            return;
        }
    }

    match client.server_info().await {
        Ok(info) => {
            *agent.available_commands.lock().expect("commands lock") = info.commands;
        }
        Err(error) => {
            tracing::warn!(
                user_id = agent.user_id,
                error = %error,
                "failed to fetch agent server info"
            );
        }
    }

    loop {
        match tokio::time::timeout(agent.idle_timeout, queue.recv()).await {
            Err(_) => {
                tracing::info!(user_id = agent.user_id, "agent idle timeout; disconnecting");
                break;
            }
            Ok(None) | Ok(Some(WorkCommand::Stop)) => break,
            Ok(Some(WorkCommand::Query(item))) => {
                process_item(&agent, client.as_ref(), *item).await;
            }
        }
    }

    agent.running.store(false, Ordering::SeqCst);
    agent.available_commands.lock().expect("commands lock").clear();
    if let Err(error) = client.disconnect().await {
        tracing::warn!(user_id = agent.user_id, error = %error, "agent disconnect failed");
    }
    (agent.on_exit)(agent.user_id);
}

async fn process_item(agent: &Arc<UserAgent>, client: &dyn AgentClient, item: WorkItem) {
    agent.querying.store(true, Ordering::SeqCst);
    agent.touch();
    let started = Instant::now();

    let result = run_query(agent, client, &item.query, item.sink.as_ref(), started).await;
    if let Err(error) = &result {
        tracing::warn!(user_id = agent.user_id, error = %error, "query failed");
    }
    let _ = item.result_tx.send(result);

    agent.querying.store(false, Ordering::SeqCst);
    agent.touch();
}

async fn run_query(
    agent: &Arc<UserAgent>,
    client: &dyn AgentClient,
    query: &Query,
    sink: &dyn StreamSink,
    started: Instant,
) -> AgentResult<QueryResult> {
    client.send_query(query.to_content_blocks()).await?;

    let mut counted_turns = 0_u32;
    loop {
        let Some(message) = client.next_message().await? else {
            return Err(AgentError::Process(
                "agent stream ended before a result message".to_owned(),
            ));
        };

        match classify(&message) {
            StreamEvent::Result {
                content,
                session_id,
                cost_usd,
                num_turns,
                duration_ms,
                is_error,
            } => {
                if let Some(session_id) = &session_id {
                    agent.set_session_id(Some(session_id.clone()));
                }
                return Ok(QueryResult {
                    response_text: content.unwrap_or_default(),
                    session_id,
                    cost_usd,
                    num_turns: num_turns.unwrap_or(counted_turns),
                    duration_ms: duration_ms
                        .unwrap_or_else(|| started.elapsed().as_millis() as u64),
                    is_error,
                });
            }
            StreamEvent::Text { content } if !content.is_empty() => {
                sink.on_event(StreamEvent::Text { content }).await;
            }
            event @ StreamEvent::ToolUse { .. } => {
                if let StreamEvent::ToolUse { partial: false, .. } = &event {
                    counted_turns += 1;
                }
                sink.on_event(event).await;
            }
            StreamEvent::Thinking { content } if !content.is_empty() => {
                sink.on_event(StreamEvent::Thinking { content }).await;
            }
            StreamEvent::ToolResult { content } if !content.is_empty() => {
                sink.on_event(StreamEvent::ToolResult { content }).await;
            }
            _ => {}
        }
    }
}
