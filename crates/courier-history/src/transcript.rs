use std::fs;
use std::path::Path;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptRole {
    User,
    Assistant,
}

/// One user or assistant message from a session transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptMessage {
    pub role: TranscriptRole,
    pub text: String,
}

/// Which end of the transcript a bounded read keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptSlice {
    /// The most recent exchanges — the default for "what was I doing here".
    Last,
    /// The opening exchanges — used when handing a session over, where the
    /// original request matters more than the latest tool chatter.
    First,
}

/// The CLI replaces `/` with `-` to build per-project transcript directories.
fn project_slug(directory: &str) -> String {
    directory.replace('/', "-")
}

/// Read up to `limit` exchanges (loosely, `limit * 2` messages) from the
/// transcript of `session_id` under `project_dir`.
///
/// Missing or unreadable transcripts yield an empty list; unparseable lines,
/// empty messages, and system-injected messages (text starting with `<`) are
/// skipped.
pub fn read_session_transcript(
    projects_dir: &Path,
    session_id: &str,
    project_dir: &str,
    limit: usize,
    slice: TranscriptSlice,
) -> Vec<TranscriptMessage> {
    let transcript_path = projects_dir
        .join(project_slug(project_dir))
        .join(format!("{session_id}.jsonl"));

    let raw = match fs::read_to_string(&transcript_path) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::debug!(
                session_id,
                path = %transcript_path.display(),
                error = %err,
                "session transcript not readable"
            );
            return Vec::new();
        }
    };

    let mut messages = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };

        let role = match value.get("type").and_then(Value::as_str) {
            Some("user") => TranscriptRole::User,
            Some("assistant") => TranscriptRole::Assistant,
            _ => continue,
        };

        let Some(message) = value.get("message").filter(|message| message.is_object()) else {
            continue;
        };
        let text = message_text(message);
        if text.is_empty() || text.starts_with('<') {
            continue;
        }

        messages.push(TranscriptMessage { role, text });
    }

    let keep = limit.saturating_mul(2);
    match slice {
        TranscriptSlice::Last => {
            if messages.len() > keep {
                messages.split_off(messages.len() - keep)
            } else {
                messages
            }
        }
        TranscriptSlice::First => {
            messages.truncate(keep);
            messages
        }
    }
}

/// Content may be a plain string or a block list; the first text block wins.
fn message_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(text)) => text.trim().to_owned(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .find_map(|block| {
                (block.get("type").and_then(Value::as_str) == Some("text"))
                    .then(|| block.get("text").and_then(Value::as_str))
                    .flatten()
            })
            .map(|text| text.trim().to_owned())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_transcript(projects_dir: &Path, project: &str, session_id: &str, lines: &[&str]) {
        let dir = projects_dir.join(project_slug(project));
        fs::create_dir_all(&dir).expect("create transcript dir");
        fs::write(dir.join(format!("{session_id}.jsonl")), lines.join("\n"))
            .expect("write transcript");
    }

    #[test]
    fn reads_user_and_assistant_messages_in_order() {
        let root = tempfile::tempdir().expect("temp dir");
        write_transcript(
            root.path(),
            "/w/p",
            "sess-1",
            &[
                r#"{"type":"user","message":{"content":"fix the bug"}}"#,
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"on it"}]}}"#,
                r#"{"type":"summary","summary":"ignored"}"#,
            ],
        );

        let messages = read_session_transcript(root.path(), "sess-1", "/w/p", 3, TranscriptSlice::Last);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, TranscriptRole::User);
        assert_eq!(messages[0].text, "fix the bug");
        assert_eq!(messages[1].role, TranscriptRole::Assistant);
        assert_eq!(messages[1].text, "on it");
    }

    #[test]
    fn skips_system_injected_and_empty_messages() {
        let root = tempfile::tempdir().expect("temp dir");
        write_transcript(
            root.path(),
            "/w/p",
            "sess-1",
            &[
                r#"{"type":"user","message":{"content":"<system-reminder>noise</system-reminder>"}}"#,
                r#"{"type":"user","message":{"content":"   "}}"#,
                r#"{"type":"user","message":{"content":"real question"}}"#,
            ],
        );

        let messages = read_session_transcript(root.path(), "sess-1", "/w/p", 3, TranscriptSlice::Last);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "real question");
    }

    #[test]
    fn last_slice_keeps_the_most_recent_exchanges() {
        let root = tempfile::tempdir().expect("temp dir");
        let lines: Vec<String> = (0..10)
            .map(|index| format!(r#"{{"type":"user","message":{{"content":"m{index}"}}}}"#))
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        write_transcript(root.path(), "/w/p", "sess-1", &refs);

        let messages = read_session_transcript(root.path(), "sess-1", "/w/p", 2, TranscriptSlice::Last);
        let texts: Vec<_> = messages.iter().map(|message| message.text.as_str()).collect();
        assert_eq!(texts, vec!["m6", "m7", "m8", "m9"]);
    }

    #[test]
    fn first_slice_keeps_the_opening_exchanges() {
        let root = tempfile::tempdir().expect("temp dir");
        let lines: Vec<String> = (0..10)
            .map(|index| format!(r#"{{"type":"user","message":{{"content":"m{index}"}}}}"#))
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        write_transcript(root.path(), "/w/p", "sess-1", &refs);

        let messages = read_session_transcript(root.path(), "sess-1", "/w/p", 2, TranscriptSlice::First);
        let texts: Vec<_> = messages.iter().map(|message| message.text.as_str()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3"]);
    }

    #[test]
    fn missing_transcript_is_empty() {
        let root = tempfile::tempdir().expect("temp dir");
        assert!(
            read_session_transcript(root.path(), "nope", "/w/p", 3, TranscriptSlice::Last)
                .is_empty()
        );
    }
}
