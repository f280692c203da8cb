//! Platform-neutral message types consumed by the conversation pipeline.

use async_trait::async_trait;

use crate::chatbot::error::{Error, Result};
use crate::chatbot::history::DIRECT_SCOPE;

/// The person who sent a message or invoked a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: i64,
    pub display_name: String,
    /// Platform handle, without `@`.
    pub username: Option<String>,
}

/// Where a message was posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Community id, `None` for direct messages.
    pub community_id: Option<i64>,
    pub community_name: Option<String>,
    pub channel_id: i64,
    pub channel_name: Option<String>,
}

impl Origin {
    pub fn scope_id(&self) -> i64 {
        self.community_id.unwrap_or(DIRECT_SCOPE)
    }

    pub fn scope_name(&self) -> &str {
        self.community_name.as_deref().unwrap_or("DM")
    }

    pub fn channel_name(&self) -> &str {
        self.channel_name.as_deref().unwrap_or("DM")
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Platform handle used to download the file.
    pub file_id: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn image(file_id: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            file_name: None,
            content_type: Some(content_type.into()),
        }
    }

    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }

    /// Fails with `UnresolvedAttachment` unless the declared type is an image.
    pub fn require_image(&self) -> Result<&Self> {
        if self.is_image() {
            Ok(self)
        } else {
            Err(Error::UnresolvedAttachment(self.file_id.clone()))
        }
    }

    /// Content type, defaulting for images whose type was not declared precisely.
    pub fn mime_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or("image/png")
    }
}

/// A member mentioned in a message, as resolved by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub id: i64,
    pub display_name: String,
}

/// The message being replied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepliedMessage {
    pub message_id: i64,
    pub author: Author,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

/// An incoming message with everything the pipeline reads from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: i64,
    pub origin: Origin,
    pub author: Author,
    /// Body with mentions as `<@id>` tokens.
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub mentions: Vec<Mention>,
    pub reply_to: Option<RepliedMessage>,
}

/// Downloads attachment bytes from the messaging platform.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>>;
}

/// Cut `s` to at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_id_for_direct_messages() {
        let origin = Origin {
            community_id: None,
            community_name: None,
            channel_id: 42,
            channel_name: None,
        };
        assert_eq!(origin.scope_id(), DIRECT_SCOPE);
        assert_eq!(origin.scope_name(), "DM");
        assert_eq!(origin.channel_name(), "DM");
    }

    #[test]
    fn test_scope_id_for_groups() {
        let origin = Origin {
            community_id: Some(-100123),
            community_name: Some("Rustaceans".to_string()),
            channel_id: -100123,
            channel_name: Some("general".to_string()),
        };
        assert_eq!(origin.scope_id(), -100123);
        assert_eq!(origin.scope_name(), "Rustaceans");
    }

    #[test]
    fn test_is_image() {
        assert!(Attachment::image("a", "image/jpeg").is_image());
        let doc = Attachment {
            file_id: "b".to_string(),
            file_name: Some("notes.pdf".to_string()),
            content_type: Some("application/pdf".to_string()),
        };
        assert!(!doc.is_image());
        let untyped = Attachment {
            content_type: None,
            ..doc
        };
        assert!(!untyped.is_image());
        assert!(matches!(
            untyped.require_image(),
            Err(Error::UnresolvedAttachment(id)) if id == "b"
        ));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 2), "he");
        // multi-byte characters are never split
        assert_eq!(truncate_chars("こんにちは", 3), "こんに");
    }
}
