use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use courier_agent::{AgentManager, ConnectRequest};
use courier_chat::{
    AttachmentProcessor, ChatAction, ChatApi, ChatError, IncomingMessage, MediaGroupCollector,
    ProgressRenderer, RendererConfig,
};
use courier_config::CourierConfig;
use courier_protocol::Query;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::state::UserStateRegistry;

const WORKING_PLACEHOLDER: &str = "Working…";
const DEFAULT_ATTACHMENT_PROMPT: &str = "Analyze these files.";
const EMPTY_RESPONSE_NOTE: &str = "(the agent returned no text)";
const DISPLAY_SNIPPET_CHARS: usize = 48;

/// Glue between the chat platform and the agent layer: builds queries, wires
/// a progress renderer to each one, and posts the final answer.
pub struct Orchestrator {
    pub(crate) config: CourierConfig,
    pub(crate) chat: Arc<dyn ChatApi>,
    pub(crate) manager: AgentManager,
    pub(crate) state: UserStateRegistry,
    pub(crate) processor: AttachmentProcessor,
    pub(crate) collector: MediaGroupCollector,
    pub(crate) renderer_config: RendererConfig,
    ready_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<Vec<IncomingMessage>>>>,
    history_health_checked: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        config: CourierConfig,
        chat: Arc<dyn ChatApi>,
        manager: AgentManager,
    ) -> Arc<Self> {
        let (collector, ready_rx) = MediaGroupCollector::new(config.media_group_timeout);
        let renderer_config = RendererConfig {
            edit_interval: config.edit_interval,
            max_message_len: config.max_message_len,
        };
        let state = UserStateRegistry::new(Arc::clone(manager.store()));
        Arc::new(Self {
            config,
            chat: Arc::clone(&chat),
            manager,
            state,
            processor: AttachmentProcessor::new(chat),
            collector,
            renderer_config,
            ready_rx: AsyncMutex::new(Some(ready_rx)),
            history_health_checked: AtomicBool::new(false),
        })
    }

    /// Drain completed media groups. Call once at startup.
    pub fn spawn_group_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let Some(mut ready_rx) = orchestrator.ready_rx.lock().await.take() else {
                return;
            };
            while let Some(group) = ready_rx.recv().await {
                orchestrator.handle_media_group(group).await;
            }
        })
    }

    /// Entry point for one validated inbound message.
    pub async fn dispatch(self: &Arc<Self>, message: IncomingMessage) {
        if !self.config.is_user_allowed(message.user_id) {
            tracing::debug!(user_id = message.user_id, "ignoring message from unknown user");
            return;
        }

        if message.has_attachment() {
            if let Some(group) = self.collector.add(message) {
                self.handle_media_group(group).await;
            }
            return;
        }

        let Some(text) = message.text.clone() else {
            return;
        };
        let text = text.trim().to_owned();
        if text.is_empty() {
            return;
        }

        if let Some(command) = text.strip_prefix('/') {
            self.handle_command_passthrough(&message, command).await;
            return;
        }

        self.run_query(message.user_id, message.chat_id, Query::text_only(text))
            .await;
    }

    /// Slash commands the bot does not own are offered to the agent CLI: pass
    /// them verbatim when the CLI claims them (or when no actor exists yet to
    /// ask), reject with a short note otherwise.
    async fn handle_command_passthrough(&self, message: &IncomingMessage, command: &str) {
        let word = command.split_whitespace().next().unwrap_or_default();
        if word.is_empty() {
            return;
        }
        let raw = format!("/{command}");

        if self.manager.has_command(message.user_id, word) {
            self.run_query(message.user_id, message.chat_id, Query::text_only(raw))
                .await;
            return;
        }

        if self.manager.active(message.user_id).is_some() {
            let note = format!("The agent CLI doesn't provide /{word}.");
            if let Err(error) = self.chat.send_message(message.chat_id, &note).await {
                tracing::warn!(error = %error, "failed to send unknown-command note");
            }
            return;
        }

        // No connected actor to consult; pass it through and let the CLI
        // decide once the actor exists.
        self.run_query(message.user_id, message.chat_id, Query::text_only(raw))
            .await;
    }

    pub(crate) async fn run_query(&self, user_id: i64, chat_id: i64, query: Query) {
        let directory = self.resolve_directory(user_id);
        let approved = self.approved_root_for(&directory);

        self.warn_on_history_skew(chat_id).await;

        if let Err(error) = self.chat.send_chat_action(chat_id, ChatAction::Typing).await {
            tracing::debug!(error = %error, "chat action failed");
        }
        let initial = match self.chat.send_message(chat_id, WORKING_PLACEHOLDER).await {
            Ok(handle) => handle,
            Err(error) => {
                tracing::warn!(user_id, error = %error, "could not post progress message");
                return;
            }
        };
        let renderer =
            ProgressRenderer::new(Arc::clone(&self.chat), initial, self.renderer_config);

        let request = ConnectRequest {
            user_id,
            directory: directory.clone(),
            session_id: None,
            model: None,
            betas: None,
            approved_directory: approved,
            force_new: false,
        };
        let outcome = match self.manager.get_or_connect(request.clone()).await {
            Ok(actor) => {
                let had_resume = actor.session_id().is_some();
                match actor.submit(query.clone(), renderer.clone()).await {
                    Ok(result) => Ok(result),
                    Err(error) if had_resume => {
                        // The stored session may no longer be resumable on the
                        // agent side; one fresh retry.
                        tracing::warn!(
                            user_id,
                            error = %error,
                            "query on resumed session failed; retrying with a fresh session"
                        );
                        match self
                            .manager
                            .get_or_connect(ConnectRequest {
                                force_new: true,
                                ..request
                            })
                            .await
                        {
                            Ok(actor) => actor.submit(query.clone(), renderer.clone()).await,
                            Err(connect_error) => Err(connect_error),
                        }
                    }
                    Err(error) => Err(error),
                }
            }
            Err(error) => Err(error),
        };

        match outcome {
            Ok(result) => {
                if let Some(session_id) = &result.session_id {
                    self.manager
                        .update_session_id(user_id, session_id, &display_snippet(&query));
                }
                renderer.finalize().await;

                let response = if result.response_text.trim().is_empty() {
                    EMPTY_RESPONSE_NOTE.to_owned()
                } else {
                    result.response_text.clone()
                };
                let response = bound_response(&response, self.config.max_message_len);
                if let Err(error) = self.chat.send_message(chat_id, &response).await {
                    tracing::warn!(user_id, error = %error, "failed to send final response");
                }
            }
            Err(error) => {
                renderer.finalize().await;
                let note = format!("Query failed: {error}");
                if let Err(send_error) = self.chat.send_message(chat_id, &note).await {
                    tracing::warn!(user_id, error = %send_error, "failed to send failure note");
                }
            }
        }
    }

    async fn handle_media_group(&self, group: Vec<IncomingMessage>) {
        let Some(first) = group.first() else {
            return;
        };
        let chat_id = first.chat_id;
        let user_id = first.user_id;

        let mut attachments = Vec::new();
        for item in &group {
            if !item.has_attachment() {
                continue;
            }
            match self.processor.process(item).await {
                Ok(attachment) => attachments.push(attachment),
                Err(error @ ChatError::UnsupportedAttachment { .. }) => {
                    if let Err(send_error) =
                        self.chat.send_message(chat_id, &error.to_string()).await
                    {
                        tracing::warn!(error = %send_error, "failed to send attachment note");
                    }
                }
                Err(error) => {
                    tracing::warn!(user_id, error = %error, "attachment processing failed");
                }
            }
        }
        if attachments.is_empty() {
            return;
        }

        let caption = group
            .iter()
            .find_map(|message| {
                message
                    .caption
                    .clone()
                    .filter(|caption| !caption.trim().is_empty())
            })
            .unwrap_or_else(|| DEFAULT_ATTACHMENT_PROMPT.to_owned());

        self.run_query(
            user_id,
            chat_id,
            Query::with_attachments(Some(caption), attachments),
        )
        .await;
    }

    /// Lazy, once-per-process history format check; a mostly-unparseable
    /// index indicates CLI version skew.
    async fn warn_on_history_skew(&self, chat_id: i64) {
        if self.history_health_checked.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(warning) = self.manager.resolver().format_health() {
            if let Err(error) = self.chat.send_message(chat_id, &warning).await {
                tracing::debug!(error = %error, "failed to send history health warning");
            }
        }
    }

    pub(crate) fn resolve_directory(&self, user_id: i64) -> PathBuf {
        if let Some(directory) = self.state.current_directory(user_id) {
            if self.approved_root_for(&directory).is_some() {
                return directory;
            }
            tracing::warn!(
                user_id,
                directory = %directory.display(),
                "persisted directory is outside the approved roots; using the default"
            );
        }
        self.config.default_directory().clone()
    }

    pub(crate) fn approved_root_for(&self, directory: &Path) -> Option<PathBuf> {
        self.config
            .approved_dirs
            .iter()
            .find(|root| directory.starts_with(root))
            .cloned()
    }
}

fn display_snippet(query: &Query) -> String {
    match &query.text {
        Some(text) if !text.is_empty() => text.chars().take(DISPLAY_SNIPPET_CHARS).collect(),
        _ => "(attachments)".to_owned(),
    }
}

fn bound_response(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_owned()
    } else {
        let mut bounded: String = text.chars().take(max_len.saturating_sub(1)).collect();
        bounded.push('…');
        bounded
    }
}
