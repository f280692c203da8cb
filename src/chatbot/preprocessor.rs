//! Turns an inbound message into question text and the images that go with it.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::chatbot::message::{Attachment, InboundMessage};

/// `<@id>`, `<@!id>` and role-style `<@&id>` tokens.
static MENTION_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<@[!&]?(\d+)>").unwrap());

/// Placeholder for each image on a replied-to message.
const IMAGE_MARKER: &str = "[Image]";

/// Body plus `[reply: author: content]` context when the message is a reply.
pub fn format_with_reply(message: &InboundMessage) -> String {
    let content = message.content.as_str();

    let Some(reply) = &message.reply_to else {
        return content.trim().to_string();
    };

    let image_count = reply.attachments.iter().filter(|a| a.is_image()).count();
    let mut replied = reply.content.clone();
    for _ in 0..image_count {
        replied.push(' ');
        replied.push_str(IMAGE_MARKER);
    }

    format!(
        "[reply: {}: {}] {}",
        reply.author.display_name,
        replied.trim(),
        content
    )
    .trim()
    .to_string()
}

/// Replace mention tokens with `@display name`.
///
/// Tokens for members the platform could not resolve are left as they are.
pub fn replace_mentions(message: &InboundMessage, content: &str) -> String {
    MENTION_TOKEN
        .replace_all(content, |caps: &Captures| {
            let resolved = caps[1]
                .parse::<i64>()
                .ok()
                .and_then(|id| message.mentions.iter().find(|m| m.id == id));
            match resolved {
                Some(member) => format!("@{}", member.display_name),
                None => {
                    debug!(token = &caps[0], "unresolved mention kept");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Question text for the model: reply context folded in, mentions resolved.
pub fn normalize(message: &InboundMessage) -> String {
    let question = format_with_reply(message);
    replace_mentions(message, &question)
}

/// Images of the message itself, then those of the message it replies to.
pub fn collect_images(message: &InboundMessage) -> Vec<Attachment> {
    let own = message.attachments.iter();
    let replied = message.reply_to.iter().flat_map(|r| r.attachments.iter());

    own.chain(replied)
        .filter_map(|attachment| match attachment.require_image() {
            Ok(image) => Some(image.clone()),
            Err(e) => {
                debug!("skipping attachment: {e}");
                None
            }
        })
        .collect()
}
