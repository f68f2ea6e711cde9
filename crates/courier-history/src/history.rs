use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One line of the CLI's `history.jsonl` session index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(default)]
    pub display: String,
    pub timestamp: i64,
    pub project: String,
}

/// Read and parse the history index, newest first.
///
/// A missing file is an empty history, not an error. Malformed lines are
/// skipped and counted; an unreadable file degrades to an empty result.
pub fn read_history(history_path: &Path) -> Vec<HistoryEntry> {
    let raw = match fs::read_to_string(history_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %history_path.display(), "history file not found");
            return Vec::new();
        }
        Err(err) => {
            tracing::error!(
                path = %history_path.display(),
                error = %err,
                "failed to read history file"
            );
            return Vec::new();
        }
    };

    let mut entries = Vec::new();
    let mut malformed = 0_usize;
    for (line_number, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryEntry>(line) {
            Ok(entry) if !entry.session_id.is_empty() && !entry.project.is_empty() => {
                entries.push(entry);
            }
            Ok(_) => {
                tracing::warn!(
                    line = line_number + 1,
                    "skipping history entry with empty required fields"
                );
                malformed += 1;
            }
            Err(err) => {
                tracing::warn!(
                    line = line_number + 1,
                    error = %err,
                    "skipping malformed history line"
                );
                malformed += 1;
            }
        }
    }

    if malformed > 0 {
        tracing::info!(
            skipped = malformed,
            parsed = entries.len(),
            "skipped malformed history entries"
        );
    }

    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
}

/// Entries whose `project` names the given directory. Both sides are
/// canonicalized when possible; a directory that no longer exists falls back
/// to string comparison.
pub fn filter_by_directory(entries: &[HistoryEntry], directory: &Path) -> Vec<HistoryEntry> {
    let resolved = directory
        .canonicalize()
        .unwrap_or_else(|_| directory.to_path_buf());
    let resolved_str = resolved.to_string_lossy();

    entries
        .iter()
        .filter(|entry| {
            let project = Path::new(&entry.project);
            entry.project == resolved_str
                || project
                    .canonicalize()
                    .map(|project| project == resolved)
                    .unwrap_or(false)
        })
        .cloned()
        .collect()
}

pub fn find_session_by_id<'a>(
    entries: &'a [HistoryEntry],
    session_id: &str,
) -> Option<&'a HistoryEntry> {
    entries.iter().find(|entry| entry.session_id == session_id)
}

/// Warn when more than half of the history lines fail to parse — a strong
/// signal of CLI version skew.
pub fn check_format_health(history_path: &Path) -> Option<String> {
    let raw = match fs::read_to_string(history_path) {
        Ok(raw) => raw,
        Err(_) => return None,
    };

    let mut total = 0_usize;
    let mut malformed = 0_usize;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        total += 1;
        match serde_json::from_str::<HistoryEntry>(line) {
            Ok(entry) if !entry.session_id.is_empty() && !entry.project.is_empty() => {}
            _ => malformed += 1,
        }
    }

    if total == 0 {
        return None;
    }

    let percentage = malformed as f64 / total as f64 * 100.0;
    if percentage > 50.0 {
        let warning = format!(
            "History file has {percentage:.1}% unparseable entries ({malformed}/{total}); \
             the agent CLI format may have changed."
        );
        tracing::warn!(path = %history_path.display(), warning, "history format health check failed");
        Some(warning)
    } else {
        None
    }
}

/// Append one entry so the CLI can discover a bot-born session. Failures are
/// logged and swallowed — the index stays CLI-owned and best-effort on our
/// side.
pub fn append_entry(history_path: &Path, session_id: &str, display: &str, project: &str) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0);
    let entry = HistoryEntry {
        session_id: session_id.to_owned(),
        display: display.to_owned(),
        timestamp,
        project: project.to_owned(),
    };

    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = history_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(history_path)?;
        let line = serde_json::to_string(&entry)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        writeln!(file, "{line}")
    })();

    match result {
        Ok(()) => {
            tracing::debug!(session_id, project, "appended history entry");
        }
        Err(err) => {
            tracing::warn!(
                path = %history_path.display(),
                error = %err,
                "failed to append history entry"
            );
        }
    }
}
