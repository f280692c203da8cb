//! Telegram side of the bot, using teloxide.

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InputFile, Me, MessageEntityKind, MessageEntityRef, MessageId, ReplyParameters, User,
    UserId,
};
use tracing::{info, warn};

use crate::chatbot::error::{Error, Result};
use crate::chatbot::message::{
    Attachment, AttachmentSource, Author, InboundMessage, Mention, Origin, RepliedMessage,
};
use crate::chatbot::speech::{Delivery, Destination};

/// The bot's own account, used to recognize messages addressed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: UserId,
    /// Handle without `@`.
    pub username: String,
}

impl BotIdentity {
    pub fn from_me(me: &Me) -> Self {
        Self {
            id: me.user.id,
            username: me.username().to_string(),
        }
    }

    /// `@handle` of the bot, or a text-mention of its account.
    fn is_mentioned_by(&self, entity: &MessageEntityRef<'_>) -> bool {
        match entity.kind() {
            MessageEntityKind::Mention => entity
                .text()
                .strip_prefix('@')
                .is_some_and(|handle| handle.eq_ignore_ascii_case(&self.username)),
            MessageEntityKind::TextMention { user } => user.id == self.id,
            _ => false,
        }
    }
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Delivery for TelegramClient {
    async fn send(&self, destination: &Destination, text: &str, audio: Option<Vec<u8>>) -> Result<()> {
        let chat_id = ChatId(destination.chat_id);
        let reply_params = destination
            .reply_to_message_id
            .map(|id| ReplyParameters::new(MessageId(id as i32)));

        let mut request = self.bot.send_message(chat_id, text);
        if let Some(ref params) = reply_params {
            request = request.reply_parameters(params.clone());
        }
        request.await.map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            Error::Delivery(msg)
        })?;

        if let Some(audio) = audio {
            info!("🔊 Sending audio to chat {} ({} bytes)", destination.chat_id, audio.len());
            let input_file = InputFile::memory(audio).file_name("response.wav");
            let mut request = self.bot.send_audio(chat_id, input_file);
            if let Some(params) = reply_params {
                request = request.reply_parameters(params);
            }
            request.await.map_err(|e| {
                let msg = format!("Failed to send audio: {e}");
                warn!("{}", msg);
                Error::Delivery(msg)
            })?;
        }

        Ok(())
    }

    /// Bots cannot join Telegram voice chats.
    fn is_voice_playback_connected(&self, _scope_id: i64) -> bool {
        false
    }

    async fn play_audio(&self, scope_id: i64, _audio: Vec<u8>) -> Result<()> {
        warn!("No voice playback on Telegram (scope {scope_id})");
        Ok(())
    }

    fn mention(&self, author: &Author) -> String {
        match &author.username {
            Some(username) => format!("@{username}"),
            None => author.display_name.clone(),
        }
    }
}

#[async_trait]
impl AttachmentSource for TelegramClient {
    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(FileId(attachment.file_id.clone()))
            .await
            .map_err(|e| Error::Delivery(format!("Failed to get file info: {e}")))?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| Error::Delivery(format!("Failed to download file: {e}")))?;

        info!("📥 Downloaded attachment ({} bytes, {})", data.len(), attachment.mime_type());
        Ok(data)
    }
}

fn author(user: Option<&User>) -> Author {
    match user {
        Some(user) => Author {
            id: user.id.0 as i64,
            display_name: user.full_name(),
            username: user.username.clone(),
        },
        None => Author {
            id: 0,
            display_name: "unknown".to_string(),
            username: None,
        },
    }
}

/// The largest photo size plus any document, in that order.
fn attachments(msg: &Message) -> Vec<Attachment> {
    let mut attachments = Vec::new();
    if let Some(largest) = msg.photo().and_then(|sizes| sizes.last()) {
        // Telegram re-encodes photos as JPEG
        attachments.push(Attachment::image(largest.file.id.0.clone(), "image/jpeg"));
    }
    if let Some(doc) = msg.document() {
        attachments.push(Attachment {
            file_id: doc.file.id.0.clone(),
            file_name: doc.file_name.clone(),
            content_type: doc.mime_type.as_ref().map(|m| m.to_string()),
        });
    }
    attachments
}

fn entities(msg: &Message) -> Vec<MessageEntityRef<'_>> {
    msg.parse_entities()
        .or_else(|| msg.parse_caption_entities())
        .unwrap_or_default()
}

/// Rewrite text-mentions as `<@id>` tokens and drop mentions of the bot itself.
fn rewrite_mentions(
    text: &str,
    entities: &[MessageEntityRef<'_>],
    bot: &BotIdentity,
    mentions: &mut Vec<Mention>,
) -> String {
    let mut body = String::with_capacity(text.len());
    let mut cursor = 0;
    for entity in entities {
        let range = entity.range();
        if range.start < cursor {
            continue;
        }
        let replacement = if bot.is_mentioned_by(entity) {
            String::new()
        } else if let MessageEntityKind::TextMention { user } = entity.kind() {
            mentions.push(Mention {
                id: user.id.0 as i64,
                display_name: user.full_name(),
            });
            format!("<@{}>", user.id.0)
        } else {
            continue;
        };
        body.push_str(&text[cursor..range.start]);
        body.push_str(&replacement);
        cursor = range.end;
    }
    body.push_str(&text[cursor..]);
    body.trim().to_string()
}

/// Text or caption of `msg`, mentions rewritten.
fn body(msg: &Message, bot: &BotIdentity, mentions: &mut Vec<Mention>) -> String {
    let text = msg.text().or_else(|| msg.caption()).unwrap_or("");
    rewrite_mentions(text, &entities(msg), bot, mentions)
}

/// Convert a Telegram message into the platform-neutral form.
pub fn to_inbound(msg: &Message, bot: &BotIdentity) -> InboundMessage {
    let mut mentions = Vec::new();
    let content = body(msg, bot, &mut mentions);

    let reply_to = msg.reply_to_message().map(|reply| RepliedMessage {
        message_id: reply.id.0 as i64,
        author: author(reply.from.as_ref()),
        content: body(reply, bot, &mut mentions),
        attachments: attachments(reply),
    });

    let title = msg.chat.title().map(str::to_string);
    let origin = Origin {
        community_id: (!msg.chat.is_private()).then_some(msg.chat.id.0),
        community_name: title.clone(),
        channel_id: msg.chat.id.0,
        channel_name: title,
    };

    InboundMessage {
        message_id: msg.id.0 as i64,
        origin,
        author: author(msg.from.as_ref()),
        content,
        attachments: attachments(msg),
        mentions,
        reply_to,
    }
}

/// Author of a command message.
pub fn command_author(msg: &Message) -> Author {
    author(msg.from.as_ref())
}

/// Whether the bot should answer a plain message: any DM, an `@bot`
/// mention, or a reply to one of the bot's own messages.
pub fn addresses_bot(msg: &Message, bot: &BotIdentity) -> bool {
    if msg.chat.is_private() {
        return true;
    }

    let replies_to_bot = msg
        .reply_to_message()
        .and_then(|reply| reply.from.as_ref())
        .is_some_and(|user| user.id == bot.id);
    if replies_to_bot {
        return true;
    }

    entities(msg).iter().any(|entity| bot.is_mentioned_by(entity))
}

/// Reply target for a message.
pub fn destination(msg: &Message, scope_id: i64) -> Destination {
    Destination {
        chat_id: msg.chat.id.0,
        scope_id,
        reply_to_message_id: Some(msg.id.0 as i64),
    }
}
