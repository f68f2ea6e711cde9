use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use courier_protocol::{Attachment, ContentBlock};

use crate::api::{ChatApi, ChatError, ChatResult, IncomingMessage};

const IMAGE_SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
];

const TEXT_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "cpp", "c", "h", "hpp", "cs", "go", "rs", "rb",
    "php", "swift", "kt", "scala", "r", "jl", "lua", "pl", "sh", "bash", "zsh", "fish", "ps1",
    "bat", "cmd", "md", "txt", "rst", "adoc", "json", "yml", "yaml", "toml", "xml", "ini",
    "cfg", "conf", "env", "html", "css", "scss", "sass", "less", "vue", "svelte", "csv", "tsv",
    "log", "sql", "dockerfile", "makefile", "cmake", "lock", "gitignore", "gitattributes",
    "editorconfig",
];

/// Magic-byte sniffing for the image formats the SDK accepts.
pub fn detect_image_media_type(data: &[u8]) -> Option<&'static str> {
    for (signature, media_type) in IMAGE_SIGNATURES {
        if data.starts_with(signature) {
            return Some(media_type);
        }
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

fn file_extension(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((_, extension)) => extension,
        None => "",
    }
}

/// Converts chat photos and documents into SDK content blocks.
///
/// No size limits are enforced here; the platform's download cap and the
/// SDK's own limits are the authoritative gates.
pub struct AttachmentProcessor {
    chat: Arc<dyn ChatApi>,
}

impl AttachmentProcessor {
    pub fn new(chat: Arc<dyn ChatApi>) -> Self {
        Self { chat }
    }

    pub async fn process(&self, message: &IncomingMessage) -> ChatResult<Attachment> {
        if let Some(file_id) = &message.photo_file_id {
            return self.process_photo(file_id).await;
        }
        if let Some(document) = &message.document {
            return self
                .process_document(
                    &document.file_id,
                    document.filename.as_deref().unwrap_or("document"),
                    document.mime_type.as_deref(),
                )
                .await;
        }
        Err(ChatError::Api(
            "message has neither a photo nor a document".to_owned(),
        ))
    }

    async fn process_photo(&self, file_id: &str) -> ChatResult<Attachment> {
        let data = self.chat.download_file(file_id).await?;
        let media_type = detect_image_media_type(&data).unwrap_or("image/jpeg");
        let filename = format!(
            "photo.{}",
            media_type.rsplit('/').next().unwrap_or("jpeg")
        );
        tracing::debug!(filename, media_type, size = data.len(), "processed photo");
        Ok(Attachment {
            content_block: ContentBlock::image_base64(media_type, B64.encode(&data)),
            filename,
            size_bytes: data.len(),
            media_type: media_type.to_owned(),
        })
    }

    async fn process_document(
        &self,
        file_id: &str,
        filename: &str,
        mime_type: Option<&str>,
    ) -> ChatResult<Attachment> {
        let data = self.chat.download_file(file_id).await?;

        // Magic bytes beat the declared MIME for images.
        if let Some(media_type) = detect_image_media_type(&data) {
            return Ok(Attachment {
                content_block: ContentBlock::image_base64(media_type, B64.encode(&data)),
                filename: filename.to_owned(),
                size_bytes: data.len(),
                media_type: media_type.to_owned(),
            });
        }

        if let Some(mime) = mime_type.filter(|mime| mime.starts_with("image/")) {
            return Ok(Attachment {
                content_block: ContentBlock::image_base64(mime, B64.encode(&data)),
                filename: filename.to_owned(),
                size_bytes: data.len(),
                media_type: mime.to_owned(),
            });
        }

        if mime_type == Some("application/pdf") || data.starts_with(b"%PDF-") {
            return Ok(Attachment {
                content_block: ContentBlock::pdf_base64(B64.encode(&data), filename),
                filename: filename.to_owned(),
                size_bytes: data.len(),
                media_type: "application/pdf".to_owned(),
            });
        }

        let extension = file_extension(filename).to_ascii_lowercase();
        let is_text_mime = mime_type
            .map(|mime| mime.starts_with("text/") || mime == "application/json")
            .unwrap_or(false);
        let is_text_extension = TEXT_EXTENSIONS.contains(&extension.as_str());

        if is_text_mime || is_text_extension {
            let text = String::from_utf8(data.clone()).map_err(|_| {
                ChatError::UnsupportedAttachment {
                    filename: filename.to_owned(),
                    mime_type: mime_type.unwrap_or("unknown").to_owned(),
                }
            })?;
            return Ok(Attachment {
                content_block: ContentBlock::text_document(text, filename),
                filename: filename.to_owned(),
                size_bytes: data.len(),
                media_type: mime_type.unwrap_or("text/plain").to_owned(),
            });
        }

        // Last resort: anything that is strictly UTF-8 goes in as text.
        match String::from_utf8(data.clone()) {
            Ok(text) => Ok(Attachment {
                content_block: ContentBlock::text_document(text, filename),
                filename: filename.to_owned(),
                size_bytes: data.len(),
                media_type: "text/plain".to_owned(),
            }),
            Err(_) => {
                tracing::warn!(filename, mime_type, "unsupported binary attachment");
                Err(ChatError::UnsupportedAttachment {
                    filename: filename.to_owned(),
                    mime_type: mime_type.unwrap_or("unknown").to_owned(),
                })
            }
        }
    }
}
