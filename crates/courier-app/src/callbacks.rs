use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use courier_agent::ConnectRequest;
use courier_chat::{CallbackQuery, InlineButton, InlineKeyboard};
use courier_history::{TranscriptRole, TranscriptSlice};
use courier_protocol::Query;

use crate::orchestrator::Orchestrator;

const MAX_BROWSE_ENTRIES: usize = 20;
const LONG_CONTEXT_BETA: &str = "context-1m";

impl Orchestrator {
    /// Inline-keyboard callbacks; each edits the originating message in
    /// place.
    pub async fn handle_callback(self: &Arc<Self>, callback: CallbackQuery) {
        if let Err(error) = self.chat.answer_callback(&callback.id).await {
            tracing::debug!(error = %error, "callback answer failed");
        }
        if !self.config.is_user_allowed(callback.user_id) {
            return;
        }

        let data = callback.data.clone();
        if let Some(path) = data.strip_prefix("nav:") {
            self.handle_browse(&callback, path).await;
        } else if let Some(path) = data.strip_prefix("sel:") {
            self.handle_select(&callback, path).await;
        } else if let Some(target) = data.strip_prefix("session:") {
            self.handle_session_pick(&callback, target).await;
        } else if let Some(skill) = data.strip_prefix("skill:") {
            self.run_query(
                callback.user_id,
                callback.message.chat_id,
                Query::text_only(format!("/{skill}")),
            )
            .await;
        } else if let Some(choice) = data.strip_prefix("model:") {
            self.handle_model_pick(&callback, choice).await;
        } else {
            tracing::debug!(data, "unknown callback payload");
        }
    }

    async fn handle_browse(&self, callback: &CallbackQuery, path: &str) {
        let user_id = callback.user_id;
        let root = self.browse_root(user_id);
        let relative = sanitize_relative(path);
        let target = root.join(&relative);

        let mut subdirs = list_subdirectories(&target);
        subdirs.truncate(MAX_BROWSE_ENTRIES);

        let mut keyboard: InlineKeyboard = Vec::new();
        if !relative.is_empty() {
            let parent = relative
                .rsplit_once('/')
                .map(|(parent, _)| parent.to_owned())
                .unwrap_or_default();
            keyboard.push(vec![InlineButton::new("⬆ ..", format!("nav:{parent}"))]);
        }
        for name in &subdirs {
            let child = if relative.is_empty() {
                name.clone()
            } else {
                format!("{relative}/{name}")
            };
            keyboard.push(vec![InlineButton::new(
                format!("📁 {name}"),
                format!("nav:{child}"),
            )]);
        }
        keyboard.push(vec![InlineButton::new(
            "✓ Use this directory",
            format!("sel:{relative}"),
        )]);

        self.state.set_browse_path(user_id, Some(relative));
        let text = format!("Browsing {}", target.display());
        if let Err(error) = self
            .chat
            .edit_message_with_keyboard(&callback.message, &text, &keyboard)
            .await
        {
            tracing::debug!(error = %error, "browse edit failed");
        }
    }

    async fn handle_select(&self, callback: &CallbackQuery, path: &str) {
        let user_id = callback.user_id;
        let root = self.browse_root(user_id);
        let target = root.join(sanitize_relative(path));

        if !target.is_dir() {
            let note = format!("{} is not a directory anymore.", target.display());
            if let Err(error) = self.chat.edit_message(&callback.message, &note).await {
                tracing::debug!(error = %error, "select edit failed");
            }
            return;
        }

        self.state.set_current_directory(user_id, &target);
        self.state.set_browse_path(user_id, None);

        let text = format!("Working directory set to {}", target.display());
        if let Err(error) = self.chat.edit_message(&callback.message, &text).await {
            tracing::debug!(error = %error, "select edit failed");
        }
    }

    async fn handle_session_pick(&self, callback: &CallbackQuery, target: &str) {
        let user_id = callback.user_id;
        let directory = self.resolve_directory(user_id);
        let approved = self.approved_root_for(&directory);
        let request = ConnectRequest {
            user_id,
            directory: directory.clone(),
            session_id: None,
            model: None,
            betas: None,
            approved_directory: approved,
            force_new: false,
        };

        let text = if target == "__new__" {
            match self
                .manager
                .get_or_connect(ConnectRequest {
                    force_new: true,
                    ..request
                })
                .await
            {
                Ok(_) => "Started a fresh session.".to_owned(),
                Err(error) => format!("Could not start a session: {error}"),
            }
        } else {
            match self.manager.switch_session(request, target.to_owned()).await {
                Ok(_) => {
                    let mut text = format!("Resumed session {}.", short_id(target));
                    let preview = self.manager.resolver().read_transcript(
                        target,
                        &directory.to_string_lossy(),
                        2,
                        TranscriptSlice::First,
                    );
                    if !preview.is_empty() {
                        text.push('\n');
                        for message in preview {
                            let who = match message.role {
                                TranscriptRole::User => "You",
                                TranscriptRole::Assistant => "Agent",
                            };
                            text.push_str(&format!("\n{who}: {}", snippet(&message.text, 120)));
                        }
                    }
                    text
                }
                Err(error) => format!("Could not resume session: {error}"),
            }
        };

        if let Err(error) = self.chat.edit_message(&callback.message, &text).await {
            tracing::debug!(error = %error, "session pick edit failed");
        }
    }

    async fn handle_model_pick(&self, callback: &CallbackQuery, choice: &str) {
        let user_id = callback.user_id;
        let mut parts = choice.split(':');
        let model = parts.next().unwrap_or_default();
        if model.is_empty() {
            return;
        }
        let long_context = parts.next() == Some("1m");
        let betas = long_context.then(|| vec![LONG_CONTEXT_BETA.to_owned()]);

        if self.manager.active(user_id).is_some() {
            self.manager.set_model(user_id, model, betas);
        } else {
            // No live actor; persist directly so the next connect picks it up.
            let directory = self.resolve_directory(user_id);
            let session_id = self
                .manager
                .store()
                .get_by_user(user_id)
                .ok()
                .flatten()
                .map(|record| record.session_id)
                .unwrap_or_default();
            if let Err(error) = self.manager.store().upsert(
                user_id,
                &session_id,
                &directory.to_string_lossy(),
                Some(model),
                betas.as_deref(),
            ) {
                tracing::warn!(user_id, error = %error, "failed to persist model choice");
            }
        }

        let text = if long_context {
            format!("Model set to {model} (1M context).")
        } else {
            format!("Model set to {model}.")
        };
        if let Err(error) = self.chat.edit_message(&callback.message, &text).await {
            tracing::debug!(error = %error, "model edit failed");
        }
    }

    fn browse_root(&self, user_id: i64) -> PathBuf {
        let current = self.resolve_directory(user_id);
        self.approved_root_for(&current)
            .unwrap_or_else(|| self.config.default_directory().clone())
    }
}

/// Keep only plain path segments; `..`, `.`, and absolute prefixes are
/// dropped so callback payloads cannot escape the browse root.
fn sanitize_relative(path: &str) -> String {
    Path::new(path)
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn list_subdirectories(target: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(target) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

fn short_id(session_id: &str) -> String {
    session_id.chars().take(8).collect()
}

fn snippet(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_owned()
    } else {
        let mut out: String = text.chars().take(limit).collect();
        out.push('…');
        out
    }
}
