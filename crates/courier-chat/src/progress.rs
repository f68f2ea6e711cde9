use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_protocol::{StreamEvent, StreamSink};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use crate::api::{ChatApi, MessageHandle};
use crate::redact::redact_secrets;

pub const DEFAULT_EDIT_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4000;

const CONTINUED_MARKER: &str = "(continued…)";
const TOOL_RESULT_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct RendererConfig {
    pub edit_interval: Duration,
    pub max_message_len: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            edit_interval: DEFAULT_EDIT_INTERVAL,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Text,
    Tool,
    Thinking,
}

/// One line of the live activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub content: String,
    pub tool_name: String,
    pub tool_detail: String,
    pub tool_result: String,
    pub is_running: bool,
}

impl ActivityEntry {
    fn text(content: String) -> Self {
        Self {
            kind: ActivityKind::Text,
            content,
            tool_name: String::new(),
            tool_detail: String::new(),
            tool_result: String::new(),
            is_running: false,
        }
    }

    fn tool(tool_name: String, tool_detail: String) -> Self {
        Self {
            kind: ActivityKind::Tool,
            content: String::new(),
            tool_name,
            tool_detail,
            tool_result: String::new(),
            is_running: true,
        }
    }

    fn thinking() -> Self {
        Self {
            kind: ActivityKind::Thinking,
            content: "Thinking".to_owned(),
            tool_name: String::new(),
            tool_detail: String::new(),
            tool_result: String::new(),
            is_running: true,
        }
    }
}

struct RendererState {
    messages: Vec<MessageHandle>,
    activity: Vec<ActivityEntry>,
    /// First entry not yet shown in a frozen message.
    cursor_entry: usize,
    /// Chars of the cursor entry already shown in frozen messages
    /// (text entries can split across a rollover).
    cursor_offset: usize,
    last_edit: Option<Instant>,
    tick: u64,
    finalized: bool,
}

struct RenderedBlock {
    entry: usize,
    is_text: bool,
    body: String,
}

/// Rolling activity log rendered into persistent chat messages.
///
/// One message at a time is *active* and gets throttled in-place edits; when
/// its rendered form would exceed the platform budget the message is frozen
/// with a continuation marker and a new active message is opened. Frozen
/// messages are never edited again and no message is ever deleted.
pub struct ProgressRenderer {
    chat: Arc<dyn ChatApi>,
    config: RendererConfig,
    started: Instant,
    state: AsyncMutex<RendererState>,
}

impl ProgressRenderer {
    /// `initial` is the already-posted "Working…" message the renderer takes
    /// over.
    pub fn new(
        chat: Arc<dyn ChatApi>,
        initial: MessageHandle,
        config: RendererConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            chat,
            config,
            started: Instant::now(),
            state: AsyncMutex::new(RendererState {
                messages: vec![initial],
                activity: Vec::new(),
                cursor_entry: 0,
                cursor_offset: 0,
                last_edit: None,
                tick: 0,
                finalized: false,
            }),
        })
    }

    pub async fn message_handles(&self) -> Vec<MessageHandle> {
        self.state.lock().await.messages.clone()
    }

    /// Throttled re-render of the active tail message.
    pub async fn update(&self) {
        let mut state = self.state.lock().await;
        if state.finalized {
            return;
        }
        if let Some(last_edit) = state.last_edit {
            if last_edit.elapsed() < self.config.edit_interval {
                return;
            }
        }

        loop {
            let text = self.render_window(&state, false);
            if char_len(&text) <= self.config.max_message_len {
                let tail = state.messages.last().cloned().expect("renderer has a tail");
                if let Err(error) = self.chat.edit_message(&tail, &text).await {
                    tracing::debug!(error = %error, "progress edit failed");
                }
                break;
            }
            if !self.rollover(&mut state).await {
                break;
            }
        }

        state.tick += 1;
        state.last_edit = Some(Instant::now());
    }

    /// Close every entry, switch the header to done, and do one last
    /// unthrottled edit. Never rolls over and never deletes.
    pub async fn finalize(&self) {
        let mut state = self.state.lock().await;
        if state.finalized {
            return;
        }
        state.finalized = true;
        close_running_entry(&mut state.activity);
        for entry in &mut state.activity {
            entry.is_running = false;
        }

        let mut text = self.render_window(&state, true);
        if char_len(&text) > self.config.max_message_len {
            text = truncate_chars(&text, self.config.max_message_len.saturating_sub(1));
            text.push('…');
        }
        let tail = state.messages.last().cloned().expect("renderer has a tail");
        if let Err(error) = self.chat.edit_message(&tail, &text).await {
            tracing::debug!(error = %error, "final progress edit failed");
        }
    }

    fn header(&self, state: &RendererState, done: bool) -> String {
        let elapsed = self.started.elapsed().as_secs();
        let base = if done {
            format!("Done ({elapsed}s)")
        } else {
            format!("Working… ({elapsed}s)")
        };
        if state.messages.len() > 1 {
            format!("{base} (continued)")
        } else {
            base
        }
    }

    fn render_window(&self, state: &RendererState, done: bool) -> String {
        let header = self.header(state, done);
        let blocks = render_blocks(state, done);
        assemble(&header, &blocks)
    }

    /// Freeze the tail with as much of the window as fits plus a continuation
    /// marker, then open a fresh tail. Returns false when the new message
    /// could not be sent (cursor stays put so nothing is lost).
    async fn rollover(&self, state: &mut RendererState) -> bool {
        let header = self.header(state, false);
        let blocks = render_blocks(state, false);
        let marker_len = char_len(CONTINUED_MARKER) + 1;
        let budget = self.config.max_message_len.saturating_sub(marker_len);

        let mut frozen = header.clone();
        let mut previous_is_text: Option<bool> = None;
        let mut next_entry = state.cursor_entry;
        let mut next_offset = state.cursor_offset;
        let mut advanced = false;

        for block in &blocks {
            let separator = match previous_is_text {
                None => "\n\n",
                Some(previous) => {
                    if block.is_text && !previous {
                        "\n\n"
                    } else {
                        "\n"
                    }
                }
            };

            if char_len(&frozen) + char_len(separator) + char_len(&block.body) <= budget {
                frozen.push_str(separator);
                frozen.push_str(&block.body);
                previous_is_text = Some(block.is_text);
                next_entry = block.entry + 1;
                next_offset = 0;
                advanced = true;
                continue;
            }

            if block.is_text {
                let room = budget.saturating_sub(char_len(&frozen) + char_len(separator));
                if room > 0 {
                    let taken: String = block.body.chars().take(room).collect();
                    let taken_chars = char_len(&taken);
                    if taken_chars > 0 {
                        frozen.push_str(separator);
                        frozen.push_str(&taken);
                        let base_offset = if block.entry == state.cursor_entry {
                            state.cursor_offset
                        } else {
                            0
                        };
                        next_entry = block.entry;
                        next_offset = base_offset + taken_chars;
                        advanced = true;
                    }
                }
            }
            break;
        }

        if !advanced {
            // A single unsplittable block larger than the whole budget; skip
            // it rather than spin forever.
            next_entry = state.cursor_entry + 1;
            next_offset = 0;
        }

        frozen.push('\n');
        frozen.push_str(CONTINUED_MARKER);

        let tail = state.messages.last().cloned().expect("renderer has a tail");
        if let Err(error) = self.chat.edit_message(&tail, &frozen).await {
            tracing::debug!(error = %error, "freeze edit failed");
        }

        let elapsed = self.started.elapsed().as_secs();
        let opener = format!("Working… ({elapsed}s) (continued)");
        match self.chat.send_message(tail.chat_id, &opener).await {
            Ok(handle) => {
                state.messages.push(handle);
                state.cursor_entry = next_entry;
                state.cursor_offset = next_offset;
                true
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to open continuation message");
                false
            }
        }
    }
}

#[async_trait]
impl StreamSink for ProgressRenderer {
    async fn on_event(&self, event: StreamEvent) {
        {
            let mut state = self.state.lock().await;
            if state.finalized {
                return;
            }
            apply_event(&mut state.activity, event);
        }
        self.update().await;
    }
}

fn apply_event(activity: &mut Vec<ActivityEntry>, event: StreamEvent) {
    if !matches!(
        event,
        StreamEvent::ToolResult { .. } | StreamEvent::Thinking { .. }
    ) {
        close_running_entry(activity);
    }

    match event {
        StreamEvent::Text { content } => {
            if let Some(last) = activity.last_mut() {
                if last.kind == ActivityKind::Text {
                    last.content.push_str(&content);
                    return;
                }
            }
            activity.push(ActivityEntry::text(content));
        }
        StreamEvent::ToolUse { name, input, .. } => {
            let detail = summarize_tool_input(&name, &input);
            activity.push(ActivityEntry::tool(name, detail));
        }
        StreamEvent::Thinking { .. } => {
            let already_thinking = activity
                .last()
                .map(|entry| entry.kind == ActivityKind::Thinking && entry.is_running)
                .unwrap_or(false);
            if !already_thinking {
                activity.push(ActivityEntry::thinking());
            }
        }
        StreamEvent::ToolResult { content } => {
            if let Some(entry) = activity
                .iter_mut()
                .rev()
                .find(|entry| entry.kind == ActivityKind::Tool)
            {
                entry.tool_result = summarize_tool_result(&content);
            }
        }
        StreamEvent::Result { .. } | StreamEvent::Unknown => {}
    }
}

fn close_running_entry(activity: &mut [ActivityEntry]) {
    if let Some(entry) = activity.iter_mut().rev().find(|entry| entry.is_running) {
        entry.is_running = false;
        if entry.kind == ActivityKind::Thinking {
            entry.content = "Thinking (done)".to_owned();
        }
    }
}

fn render_blocks(state: &RendererState, done: bool) -> Vec<RenderedBlock> {
    let mut blocks = Vec::new();
    for (index, entry) in state.activity.iter().enumerate().skip(state.cursor_entry) {
        match entry.kind {
            ActivityKind::Text => {
                let body: String = if index == state.cursor_entry && state.cursor_offset > 0 {
                    entry.content.chars().skip(state.cursor_offset).collect()
                } else {
                    entry.content.clone()
                };
                if body.is_empty() {
                    continue;
                }
                blocks.push(RenderedBlock {
                    entry: index,
                    is_text: true,
                    body,
                });
            }
            ActivityKind::Tool => {
                let icon = tool_icon(&entry.tool_name);
                let detail = if entry.tool_detail.is_empty() {
                    String::new()
                } else {
                    format!(": {}", entry.tool_detail)
                };
                let spinner = if entry.is_running && !done { " ⏳" } else { "" };
                let mut body = format!("{icon} {}{detail}{spinner}", entry.tool_name);
                if !entry.tool_result.is_empty() {
                    body.push_str("\n  ⎿ ");
                    body.push_str(&entry.tool_result);
                }
                blocks.push(RenderedBlock {
                    entry: index,
                    is_text: false,
                    body,
                });
            }
            ActivityKind::Thinking => {
                let body = if entry.is_running && !done {
                    let dots = ".".repeat((state.tick % 3) as usize + 1);
                    format!("💭 Thinking{dots}")
                } else {
                    "💭 Thinking (done)".to_owned()
                };
                blocks.push(RenderedBlock {
                    entry: index,
                    is_text: false,
                    body,
                });
            }
        }
    }
    blocks
}

fn assemble(header: &str, blocks: &[RenderedBlock]) -> String {
    let mut out = header.to_owned();
    let mut previous_is_text: Option<bool> = None;
    for block in blocks {
        let separator = match previous_is_text {
            None => "\n\n",
            Some(previous) => {
                if block.is_text && !previous {
                    "\n\n"
                } else {
                    "\n"
                }
            }
        };
        out.push_str(separator);
        out.push_str(&block.body);
        previous_is_text = Some(block.is_text);
    }
    out
}

pub fn tool_icon(name: &str) -> &'static str {
    match name {
        "Read" => "📖",
        "Write" | "Edit" | "MultiEdit" => "✏️",
        "Bash" => "💻",
        "Glob" | "Grep" => "🔍",
        "LS" => "📂",
        "Task" | "TaskOutput" => "🧠",
        "WebFetch" | "WebSearch" => "🌐",
        "NotebookRead" | "NotebookEdit" => "📓",
        "TodoRead" | "TodoWrite" => "☑️",
        _ => "🔧",
    }
}

/// Short display summary of a tool invocation's input.
pub fn summarize_tool_input(tool_name: &str, input: &Value) -> String {
    let Some(map) = input.as_object() else {
        return String::new();
    };
    if map.is_empty() {
        return String::new();
    }

    let get = |key: &str| map.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());

    match tool_name {
        "Read" | "Write" | "Edit" | "MultiEdit" => {
            if let Some(path) = get("file_path").or_else(|| get("path")) {
                return path.rsplit('/').next().unwrap_or(path).to_owned();
            }
        }
        "Glob" | "Grep" => {
            if let Some(pattern) = get("pattern") {
                return truncate_chars(pattern, 60);
            }
        }
        "Bash" => {
            if let Some(command) = get("command") {
                return truncate_chars(&redact_secrets(&truncate_chars(command, 100)), 80);
            }
        }
        "WebFetch" | "WebSearch" => {
            if let Some(target) = get("url").or_else(|| get("query")) {
                return truncate_chars(target, 60);
            }
        }
        "Task" => {
            if let Some(description) = get("description") {
                return truncate_chars(description, 60);
            }
        }
        _ => {}
    }

    for value in map.values() {
        if let Some(text) = value.as_str() {
            if !text.is_empty() {
                return truncate_chars(text, 60);
            }
        }
    }
    String::new()
}

/// First non-empty line of a raw tool result, bounded and redacted.
pub fn summarize_tool_result(raw: &str) -> String {
    let first_line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    if first_line.is_empty() {
        return String::new();
    }
    let redacted = redact_secrets(first_line);
    if char_len(&redacted) > TOOL_RESULT_MAX_CHARS {
        format!("{}...", truncate_chars(&redacted, TOOL_RESULT_MAX_CHARS))
    } else {
        redacted
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if char_len(text) <= limit {
        text.to_owned()
    } else {
        text.chars().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::time::advance;

    use super::*;
    use crate::test_support::RecordingChat;

    async fn renderer_with_chat(
        config: RendererConfig,
    ) -> (Arc<RecordingChat>, Arc<ProgressRenderer>) {
        let chat = RecordingChat::new();
        let initial = chat
            .send_message(100, "Working…")
            .await
            .expect("post initial message");
        let renderer = ProgressRenderer::new(chat.clone(), initial, config);
        (chat, renderer)
    }

    fn text(content: &str) -> StreamEvent {
        StreamEvent::Text {
            content: content.to_owned(),
        }
    }

    fn tool(name: &str, input: Value) -> StreamEvent {
        StreamEvent::ToolUse {
            name: name.to_owned(),
            input,
            partial: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_stream_renders_in_order_and_finalizes_clean() {
        let (chat, renderer) = renderer_with_chat(RendererConfig::default()).await;

        let events = [
            text("Let me look."),
            tool("Read", json!({"file_path": "/x/foo.py"})),
            StreamEvent::ToolResult {
                content: "def main():\n    pass\n".to_owned(),
            },
            StreamEvent::Thinking {
                content: "I see…".to_owned(),
            },
            tool("Edit", json!({"file_path": "/x/foo.py"})),
            StreamEvent::ToolResult {
                content: "Applied 1 edit".to_owned(),
            },
            text("Done."),
        ];
        for event in events {
            renderer.on_event(event).await;
            advance(Duration::from_secs(3)).await;
        }
        renderer.finalize().await;

        let final_text = chat
            .last_text_for(&renderer.message_handles().await[0])
            .expect("final text");

        assert!(final_text.starts_with("Done ("));
        assert!(!final_text.contains('⏳'));
        assert!(final_text.contains("Let me look."));
        assert!(final_text.contains("📖 Read: foo.py"));
        assert!(final_text.contains("⎿ def main():"));
        assert!(final_text.contains("💭 Thinking (done)"));
        assert!(final_text.contains("✏️ Edit: foo.py"));
        assert!(final_text.contains("⎿ Applied 1 edit"));
        assert!(final_text.contains("Done."));

        // Order: prose, first tool, thinking, second tool, closing prose.
        let read_at = final_text.find("📖 Read").expect("read line");
        let think_at = final_text.find("💭 Thinking").expect("thinking line");
        let edit_at = final_text.find("✏️ Edit").expect("edit line");
        let closing = final_text.rfind("Done.").expect("closing prose");
        assert!(final_text.find("Let me look.").expect("prose") < read_at);
        assert!(read_at < think_at);
        assert!(think_at < edit_at);
        assert!(edit_at < closing);
    }

    #[tokio::test(start_paused = true)]
    async fn updates_are_throttled_to_the_edit_interval() {
        let (chat, renderer) = renderer_with_chat(RendererConfig::default()).await;

        renderer.on_event(text("one")).await;
        let edits_after_first = chat.edits().len();
        assert_eq!(edits_after_first, 1);

        // Within the interval: no further edits.
        advance(Duration::from_millis(500)).await;
        renderer.on_event(text("two")).await;
        assert_eq!(chat.edits().len(), 1);

        // Past the interval: the next event may edit again.
        advance(Duration::from_millis(1600)).await;
        renderer.on_event(text("three")).await;
        assert_eq!(chat.edits().len(), 2);

        let last = chat.edits().last().expect("second edit").1.clone();
        assert!(last.contains("onetwothree"));
    }

    #[tokio::test(start_paused = true)]
    async fn running_tool_shows_spinner_until_next_event() {
        let (chat, renderer) = renderer_with_chat(RendererConfig::default()).await;

        renderer.on_event(tool("Bash", json!({"command": "ls"}))).await;
        let running = chat.edits().last().expect("edit").1.clone();
        assert!(running.contains("💻 Bash: ls ⏳"));

        advance(Duration::from_secs(3)).await;
        renderer.on_event(text("done listing")).await;
        let after = chat.edits().last().expect("edit").1.clone();
        assert!(!after.contains('⏳'));
    }

    #[tokio::test(start_paused = true)]
    async fn thinking_dots_animate_and_close() {
        let (chat, renderer) = renderer_with_chat(RendererConfig::default()).await;

        renderer
            .on_event(StreamEvent::Thinking {
                content: "hmm".to_owned(),
            })
            .await;
        let first = chat.edits().last().expect("edit").1.clone();
        assert!(first.contains("💭 Thinking."));
        assert!(!first.contains("(done)"));

        advance(Duration::from_secs(3)).await;
        renderer
            .on_event(StreamEvent::Thinking {
                content: "more".to_owned(),
            })
            .await;
        let second = chat.edits().last().expect("edit").1.clone();
        assert!(second.contains("💭 Thinking.."));

        advance(Duration::from_secs(3)).await;
        renderer.on_event(text("answer")).await;
        let third = chat.edits().last().expect("edit").1.clone();
        assert!(third.contains("💭 Thinking (done)"));
    }

    #[tokio::test(start_paused = true)]
    async fn rollover_preserves_every_character_in_order() {
        let config = RendererConfig {
            edit_interval: DEFAULT_EDIT_INTERVAL,
            max_message_len: 120,
        };
        let (chat, renderer) = renderer_with_chat(config).await;

        let chunks: Vec<String> = (0..30)
            .map(|index| format!("{index:04}abcdefghijklmnop"))
            .collect();
        for chunk in &chunks {
            renderer.on_event(text(chunk)).await;
            advance(Duration::from_secs(3)).await;
        }
        renderer.finalize().await;

        let handles = renderer.message_handles().await;
        assert!(handles.len() >= 2, "expected a rollover, got {}", handles.len());

        // Tail length bound holds for every edit ever made.
        for (_, edit_text) in chat.edits() {
            assert!(edit_text.chars().count() <= config.max_message_len);
        }

        // Every message except the tail carries the continuation marker, and
        // concatenating the visible activity reproduces the input stream.
        let mut combined = String::new();
        for (position, handle) in handles.iter().enumerate() {
            let last = chat.last_text_for(handle).expect("message text");
            let mut lines: Vec<&str> = last.split('\n').collect();
            assert!(lines[0].starts_with("Working…") || lines[0].starts_with("Done ("));
            lines.remove(0);
            if !lines.is_empty() && lines[0].is_empty() {
                lines.remove(0);
            }
            if position + 1 < handles.len() {
                assert_eq!(lines.pop(), Some(CONTINUED_MARKER));
            }
            combined.push_str(&lines.join("\n"));
        }
        assert_eq!(combined, chunks.concat());

        // Frozen messages stay frozen: their last edit precedes any edit of
        // the next message.
        let edits = chat.edits();
        for window in handles.windows(2) {
            let frozen_last = edits
                .iter()
                .rposition(|(handle, _)| handle == &window[0])
                .expect("frozen message was edited");
            let successor_first = edits
                .iter()
                .position(|(handle, _)| handle == &window[1]);
            if let Some(successor_first) = successor_first {
                assert!(frozen_last < successor_first);
            }
        }

        // Send count matches the number of messages the renderer references.
        assert_eq!(chat.sends().len(), handles.len());
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_truncates_instead_of_rolling_over() {
        let config = RendererConfig {
            edit_interval: DEFAULT_EDIT_INTERVAL,
            max_message_len: 100,
        };
        let (chat, renderer) = renderer_with_chat(config).await;

        renderer.on_event(text("short")).await;
        // Throttled: this text never makes it into an update before finalize.
        renderer.on_event(text(&"x".repeat(300))).await;
        renderer.finalize().await;

        let handles = renderer.message_handles().await;
        assert_eq!(handles.len(), 1, "finalize must not roll over");
        let final_text = chat.last_text_for(&handles[0]).expect("final text");
        assert_eq!(final_text.chars().count(), config.max_message_len);
        assert!(final_text.ends_with('…'));
    }

    #[tokio::test(start_paused = true)]
    async fn edit_failures_are_swallowed() {
        let (chat, renderer) = renderer_with_chat(RendererConfig::default()).await;
        chat.fail_edits(true);

        renderer.on_event(text("hello")).await;
        renderer.finalize().await;

        // No panic, no further sends; the initial message is still the tail.
        assert_eq!(renderer.message_handles().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_after_finalize_are_ignored() {
        let (chat, renderer) = renderer_with_chat(RendererConfig::default()).await;
        renderer.on_event(text("before")).await;
        renderer.finalize().await;

        let edits_at_finalize = chat.edits().len();
        advance(Duration::from_secs(5)).await;
        renderer.on_event(text("after")).await;

        assert_eq!(chat.edits().len(), edits_at_finalize);
    }

    #[test]
    fn bash_summaries_are_redacted() {
        let summary = summarize_tool_input(
            "Bash",
            &json!({"command": "curl -H 'Authorization: Bearer abcdefghijklmnop' https://x"}),
        );
        assert!(!summary.contains("abcdefghijklmnop"));
        assert!(summary.contains("Bearer ***"));
    }

    #[test]
    fn file_tool_summaries_show_just_the_filename() {
        assert_eq!(
            summarize_tool_input("Read", &json!({"file_path": "/deep/path/to/main.rs"})),
            "main.rs"
        );
    }

    #[test]
    fn generic_tool_summaries_use_the_first_string_value() {
        assert_eq!(
            summarize_tool_input("Custom", &json!({"count": 3, "target": "the-thing"})),
            "the-thing"
        );
        assert_eq!(summarize_tool_input("Custom", &json!({})), "");
    }

    #[test]
    fn tool_result_summary_is_first_line_bounded() {
        let raw = format!("{}\nsecond line", "y".repeat(150));
        let summary = summarize_tool_result(&raw);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), TOOL_RESULT_MAX_CHARS + 3);
        assert_eq!(summarize_tool_result("\n\n"), "");
    }
}
