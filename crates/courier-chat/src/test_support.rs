//! In-memory chat platform for tests across the workspace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::api::{
    ChatAction, ChatApi, ChatError, ChatResult, InlineKeyboard, MessageHandle,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ChatOp {
    Send {
        handle: MessageHandle,
        text: String,
    },
    Edit {
        handle: MessageHandle,
        text: String,
    },
    Keyboard {
        handle: MessageHandle,
        text: String,
        keyboard: InlineKeyboard,
    },
    Action {
        chat_id: i64,
        action: ChatAction,
    },
    AnswerCallback {
        id: String,
    },
    Download {
        file_id: String,
    },
}

/// Records every platform call and serves canned file downloads.
pub struct RecordingChat {
    next_message_id: AtomicI64,
    ops: Mutex<Vec<ChatOp>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    fail_edits: AtomicBool,
    fail_sends: AtomicBool,
}

impl RecordingChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_message_id: AtomicI64::new(1),
            ops: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            fail_edits: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        })
    }

    pub fn set_file(&self, file_id: &str, bytes: Vec<u8>) {
        self.files
            .lock()
            .expect("files lock")
            .insert(file_id.to_owned(), bytes);
    }

    pub fn fail_edits(&self, fail: bool) {
        self.fail_edits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<ChatOp> {
        self.ops.lock().expect("ops lock").clone()
    }

    pub fn sends(&self) -> Vec<(MessageHandle, String)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                ChatOp::Send { handle, text } => Some((handle, text)),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageHandle, String)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                ChatOp::Edit { handle, text } => Some((handle, text)),
                ChatOp::Keyboard { handle, text, .. } => Some((handle, text)),
                _ => None,
            })
            .collect()
    }

    /// Latest visible text of a message: its last edit, else its send text.
    pub fn last_text_for(&self, handle: &MessageHandle) -> Option<String> {
        let mut result = None;
        for op in self.ops() {
            match op {
                ChatOp::Send { handle: h, text }
                | ChatOp::Edit { handle: h, text }
                | ChatOp::Keyboard { handle: h, text, .. } => {
                    if &h == handle {
                        result = Some(text);
                    }
                }
                _ => {}
            }
        }
        result
    }

    fn record(&self, op: ChatOp) {
        self.ops.lock().expect("ops lock").push(op);
    }

    fn allocate(&self, chat_id: i64) -> MessageHandle {
        MessageHandle {
            chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl ChatApi for RecordingChat {
    async fn send_message(&self, chat_id: i64, text: &str) -> ChatResult<MessageHandle> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("send failure injected".to_owned()));
        }
        let handle = self.allocate(chat_id);
        self.record(ChatOp::Send {
            handle: handle.clone(),
            text: text.to_owned(),
        });
        Ok(handle)
    }

    async fn send_message_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &InlineKeyboard,
    ) -> ChatResult<MessageHandle> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("send failure injected".to_owned()));
        }
        let handle = self.allocate(chat_id);
        self.record(ChatOp::Keyboard {
            handle: handle.clone(),
            text: text.to_owned(),
            keyboard: keyboard.clone(),
        });
        Ok(handle)
    }

    async fn edit_message(&self, handle: &MessageHandle, text: &str) -> ChatResult<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("edit failure injected".to_owned()));
        }
        self.record(ChatOp::Edit {
            handle: handle.clone(),
            text: text.to_owned(),
        });
        Ok(())
    }

    async fn edit_message_with_keyboard(
        &self,
        handle: &MessageHandle,
        text: &str,
        keyboard: &InlineKeyboard,
    ) -> ChatResult<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("edit failure injected".to_owned()));
        }
        self.record(ChatOp::Keyboard {
            handle: handle.clone(),
            text: text.to_owned(),
            keyboard: keyboard.clone(),
        });
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: i64, action: ChatAction) -> ChatResult<()> {
        self.record(ChatOp::Action { chat_id, action });
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> ChatResult<()> {
        self.record(ChatOp::AnswerCallback {
            id: callback_id.to_owned(),
        });
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> ChatResult<Vec<u8>> {
        self.record(ChatOp::Download {
            file_id: file_id.to_owned(),
        });
        self.files
            .lock()
            .expect("files lock")
            .get(file_id)
            .cloned()
            .ok_or_else(|| ChatError::Api(format!("unknown file id '{file_id}'")))
    }
}
