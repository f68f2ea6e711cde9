//! Session resolution against the agent CLI's on-disk history index.
//!
//! The CLI owns `history.jsonl`; this crate only reads it (and appends
//! bot-born sessions so both sides can resume each other's work). There is
//! deliberately no session store here.

mod history;
mod transcript;

pub use history::{
    append_entry, check_format_health, filter_by_directory, find_session_by_id, read_history,
    HistoryEntry,
};
pub use transcript::{read_session_transcript, TranscriptMessage, TranscriptRole, TranscriptSlice};

use std::path::{Path, PathBuf};

/// Resolves session ids from the agent CLI's history file.
pub struct SessionResolver {
    history_path: PathBuf,
    projects_dir: PathBuf,
}

impl SessionResolver {
    /// `agent_config_dir` is the CLI's configuration directory; the history
    /// index lives at `<dir>/history.jsonl` and transcripts under
    /// `<dir>/projects/`.
    pub fn new(agent_config_dir: impl AsRef<Path>) -> Self {
        let dir = agent_config_dir.as_ref();
        Self {
            history_path: dir.join("history.jsonl"),
            projects_dir: dir.join("projects"),
        }
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    /// Most recent session recorded for `directory`, if any.
    pub fn latest_session(&self, directory: &Path) -> Option<String> {
        let entries = read_history(&self.history_path);
        filter_by_directory(&entries, directory)
            .first()
            .map(|entry| entry.session_id.clone())
    }

    /// Up to `limit` entries, newest first, optionally filtered by directory.
    pub fn list_sessions(&self, directory: Option<&Path>, limit: usize) -> Vec<HistoryEntry> {
        let entries = read_history(&self.history_path);
        let mut filtered = match directory {
            Some(directory) => filter_by_directory(&entries, directory),
            None => entries,
        };
        filtered.truncate(limit);
        filtered
    }

    pub fn find_session(&self, session_id: &str) -> Option<HistoryEntry> {
        let entries = read_history(&self.history_path);
        find_session_by_id(&entries, session_id).cloned()
    }

    /// Recent transcript exchanges for a session in `project_dir`.
    pub fn read_transcript(
        &self,
        session_id: &str,
        project_dir: &str,
        limit: usize,
        slice: TranscriptSlice,
    ) -> Vec<TranscriptMessage> {
        read_session_transcript(&self.projects_dir, session_id, project_dir, limit, slice)
    }

    /// Warning text when the history format looks skewed, per
    /// [`check_format_health`].
    pub fn format_health(&self) -> Option<String> {
        check_format_health(&self.history_path)
    }

    /// Record a bot-born session so the CLI can discover and resume it.
    pub fn record_session(&self, session_id: &str, display: &str, project: &str) {
        append_entry(&self.history_path, session_id, display, project);
    }
}
