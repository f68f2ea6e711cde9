use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSource {
    Base64 { media_type: String, data: String },
    Text { media_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: MediaSource,
    },
    Document {
        source: MediaSource,
        title: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image_base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image {
            source: MediaSource::Base64 {
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }

    pub fn pdf_base64(data: impl Into<String>, title: impl Into<String>) -> Self {
        Self::Document {
            source: MediaSource::Base64 {
                media_type: "application/pdf".to_owned(),
                data: data.into(),
            },
            title: title.into(),
        }
    }

    pub fn text_document(data: impl Into<String>, title: impl Into<String>) -> Self {
        Self::Document {
            source: MediaSource::Text {
                media_type: "text/plain".to_owned(),
                data: data.into(),
            },
            title: title.into(),
        }
    }
}

/// One processed chat attachment, ready to be embedded in a user message.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub content_block: ContentBlock,
    pub filename: String,
    pub size_bytes: usize,
    pub media_type: String,
}

/// One unit of work submitted to a user's agent actor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Query {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(text: Option<String>, attachments: Vec<Attachment>) -> Self {
        Self { text, attachments }
    }

    /// Text block first (when present), then attachment blocks in order.
    pub fn to_content_blocks(&self) -> Vec<ContentBlock> {
        let mut blocks = Vec::with_capacity(self.attachments.len() + 1);
        if let Some(text) = self.text.as_ref().filter(|text| !text.is_empty()) {
            blocks.push(ContentBlock::text(text.clone()));
        }
        for attachment in &self.attachments {
            blocks.push(attachment.content_block.clone());
        }
        blocks
    }
}

/// Outcome of one completed query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub response_text: String,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub num_turns: u32,
    pub duration_ms: u64,
    pub is_error: bool,
}
