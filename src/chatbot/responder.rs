//! Answers questions: history in, model call, clean-up, history out.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::chatbot::error::Result;
use crate::chatbot::history::{ChatHistory, ConversationTurn, current_time};
use crate::chatbot::message::{Attachment, AttachmentSource, Author, InboundMessage, Origin};
use crate::chatbot::preprocessor;
use crate::chatbot::text::remove_time_tag;

/// Text and image generation backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a reply to `messages`, oldest first. The last entry is the new prompt.
    async fn generate_text(&self, messages: &[ConversationTurn]) -> Result<String>;

    /// Describe an image, steered by `prompt`.
    async fn describe_image(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String>;

    fn set_system_prompt(&self, prompt: String);

    fn set_model(&self, model: String);
}

/// What triggered an answer.
#[derive(Debug, Clone, Copy)]
pub enum AnswerSource<'a> {
    /// A chat message addressed to the bot.
    Message(&'a InboundMessage),
    /// A command carrying the question as its argument.
    Command {
        origin: &'a Origin,
        author: &'a Author,
        text: &'a str,
    },
}

impl AnswerSource<'_> {
    fn origin(&self) -> &Origin {
        match self {
            Self::Message(m) => &m.origin,
            Self::Command { origin, .. } => origin,
        }
    }

    fn author(&self) -> &Author {
        match self {
            Self::Message(m) => &m.author,
            Self::Command { author, .. } => author,
        }
    }
}

const GRAMMAR_PROMPT: &str = "You are a helpful editor. Rewrite the user's text with correct grammar, \
spelling, and natural phrasing. Preserve the original meaning and tone, and point out what was wrong. \
The text may be in Japanese, Chinese, English or another language.";

pub struct Responder {
    llm: Arc<dyn LanguageModel>,
    attachments: Arc<dyn AttachmentSource>,
    history: Arc<ChatHistory>,
    bot_name: String,
}

impl Responder {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        attachments: Arc<dyn AttachmentSource>,
        history: Arc<ChatHistory>,
        bot_name: String,
    ) -> Self {
        Self {
            llm,
            attachments,
            history,
            bot_name,
        }
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn set_system_prompt(&self, prompt: String) {
        self.llm.set_system_prompt(prompt);
    }

    pub fn set_model(&self, model: String) {
        self.llm.set_model(model);
    }

    /// Answer a message or command using the scope's recent history.
    ///
    /// The scope stays locked for the whole turn, so concurrent turns in one
    /// scope are recorded in arrival order. Upstream errors propagate as-is.
    pub async fn get_answer(&self, source: AnswerSource<'_>, add_to_history: bool) -> Result<String> {
        let origin = source.origin();
        let speaker = &source.author().display_name;

        let (question, images) = match source {
            AnswerSource::Message(message) => (
                preprocessor::normalize(message),
                preprocessor::collect_images(message),
            ),
            AnswerSource::Command { text, .. } => (text.trim().to_string(), Vec::new()),
        };

        let mut scope = self.history.lock_scope(origin.scope_id()).await;
        let mut messages = scope.latest_history();
        debug!(scope = origin.scope_id(), turns = messages.len(), images = images.len(), "answering");

        let prompt = format!("{speaker}: {question}");
        let prompt = if images.is_empty() {
            prompt
        } else {
            let descriptions = self.describe_each(&images, &prompt).await?;
            format!("{}\n{prompt}", descriptions.join("\n"))
        };
        messages.push(ConversationTurn::user(prompt));

        let answer = self.llm.generate_text(&messages).await?;
        let answer = remove_time_tag(&answer);

        let is_image = !images.is_empty();
        if add_to_history {
            let stored = if is_image {
                format!("[sent image] {question}")
            } else {
                question.clone()
            };
            scope.add_user_message(speaker, &stored);
            scope.add_assistant_message(&self.bot_name, &answer);
        }
        drop(scope);

        let marker = if is_image { "(image) " } else { "" };
        info!(
            scope = origin.scope_name(),
            channel = origin.channel_name(),
            time = %current_time(),
            speaker = %speaker,
            question = %format!("{marker}{question}"),
            answer = %answer,
            "💬 Answered"
        );

        Ok(answer)
    }

    /// Keep a message the bot does not answer as context for later turns.
    pub async fn record(&self, message: &InboundMessage) {
        let question = preprocessor::normalize(message);
        let stored = if preprocessor::collect_images(message).is_empty() {
            question
        } else {
            format!("[sent image] {question}")
        };
        if stored.is_empty() {
            return;
        }

        let origin = &message.origin;
        self.history
            .add_user_message(origin.scope_id(), &message.author.display_name, &stored)
            .await;
        debug!(scope = origin.scope_name(), speaker = %message.author.display_name, "recorded message");
    }

    /// `[Image (n) description: ...]` for each image, in order.
    async fn describe_each(&self, images: &[Attachment], prompt: &str) -> Result<Vec<String>> {
        let mut descriptions = Vec::with_capacity(images.len());
        for (idx, image) in images.iter().enumerate() {
            let bytes = self.attachments.download(image).await?;
            let description = self
                .llm
                .describe_image(&bytes, image.mime_type(), prompt)
                .await?;
            let description = remove_time_tag(&description);
            descriptions.push(format!("[Image ({}) description: {}]", idx + 1, description.trim()));
        }
        Ok(descriptions)
    }

    /// Describe images on their own, without touching history.
    pub async fn describe(&self, images: &[Attachment], text: &str) -> Result<String> {
        let mut descriptions = Vec::with_capacity(images.len());
        for image in images {
            let bytes = self.attachments.download(image).await?;
            let description = self.llm.describe_image(&bytes, image.mime_type(), text).await?;
            descriptions.push(remove_time_tag(&description));
        }
        Ok(descriptions.join("\n\n"))
    }

    /// Grammar and style correction of `text`.
    pub async fn fix_grammar(&self, text: &str) -> Result<String> {
        let prompt = format!("{GRAMMAR_PROMPT}\n\nText: {text}");
        let answer = self.llm.generate_text(&[ConversationTurn::user(prompt)]).await?;
        Ok(remove_time_tag(&answer))
    }
}
