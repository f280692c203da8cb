//! Speech delivery: synthesize an answer, back it up, play it, post it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

use crate::chatbot::error::Result;
use crate::chatbot::message::{Author, truncate_chars};
use crate::chatbot::text::speech_text;
use crate::chatbot::voice_config::VoiceVoxConfig;

/// Longest text posted in one reply.
pub const MAX_REPLY_CHARS: usize = 1800;

/// Speech synthesis backend with a two-step query/synthesis protocol.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn fetch_query_template(&self, text: &str, speaker: i64) -> Result<Value>;

    async fn synthesize(&self, query: &Value, speaker: i64) -> Result<Vec<u8>>;
}

/// Where a reply goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub chat_id: i64,
    pub scope_id: i64,
    pub reply_to_message_id: Option<i64>,
}

/// Outbound side of the messaging platform.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send(&self, destination: &Destination, text: &str, audio: Option<Vec<u8>>) -> Result<()>;

    fn is_voice_playback_connected(&self, scope_id: i64) -> bool;

    /// Stop whatever is playing in the scope and play `audio`.
    async fn play_audio(&self, scope_id: i64, audio: Vec<u8>) -> Result<()>;

    /// How to address `author` in a posted message.
    fn mention(&self, author: &Author) -> String {
        format!("<@{}>", author.id)
    }
}

/// Write-once storage for generated audio and text.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn store_audio(&self, audio: &[u8], speaker: i64, scope_id: i64, timestamp: &str) -> Result<PathBuf>;

    async fn store_text(&self, text: &str, speaker: i64, scope_id: i64, timestamp: &str) -> Result<PathBuf>;
}

/// Which artifacts are backed up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupPolicy {
    pub audio: bool,
    pub text: bool,
}

/// Synthesizes and posts answers. Speaker, backups and mentions can be
/// switched at runtime and restored to the configured defaults.
pub struct SpeechDelivery {
    synthesizer: Arc<dyn Synthesizer>,
    delivery: Arc<dyn Delivery>,
    backup: Arc<dyn BackupStore>,
    voice_config: Arc<RwLock<VoiceVoxConfig>>,
    default_speaker: i64,
    speaker: AtomicI64,
    backup_audio: AtomicBool,
    backup_text: AtomicBool,
    mention_user: AtomicBool,
}

impl SpeechDelivery {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        delivery: Arc<dyn Delivery>,
        backup: Arc<dyn BackupStore>,
        policy: BackupPolicy,
        voice_config: Arc<RwLock<VoiceVoxConfig>>,
        speaker: i64,
    ) -> Self {
        Self {
            synthesizer,
            delivery,
            backup,
            voice_config,
            default_speaker: speaker,
            speaker: AtomicI64::new(speaker),
            backup_audio: AtomicBool::new(policy.audio),
            backup_text: AtomicBool::new(policy.text),
            mention_user: AtomicBool::new(true),
        }
    }

    pub fn speaker(&self) -> i64 {
        self.speaker.load(Ordering::Relaxed)
    }

    pub fn set_speaker(&self, speaker: i64) {
        self.speaker.store(speaker, Ordering::Relaxed);
    }

    /// Back to the configured speaker, which is returned.
    pub fn reset_speaker(&self) -> i64 {
        self.set_speaker(self.default_speaker);
        self.default_speaker
    }

    pub fn backup_policy(&self) -> BackupPolicy {
        BackupPolicy {
            audio: self.backup_audio.load(Ordering::Relaxed),
            text: self.backup_text.load(Ordering::Relaxed),
        }
    }

    /// Flip audio backups, returning the new state.
    pub fn toggle_backup_audio(&self) -> bool {
        !self.backup_audio.fetch_xor(true, Ordering::Relaxed)
    }

    /// Flip text backups, returning the new state.
    pub fn toggle_backup_text(&self) -> bool {
        !self.backup_text.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn mentions_user(&self) -> bool {
        self.mention_user.load(Ordering::Relaxed)
    }

    /// Flip the author mention on posted answers, returning the new state.
    pub fn toggle_mention(&self) -> bool {
        !self.mention_user.fetch_xor(true, Ordering::Relaxed)
    }

    /// Configured speaker, mentions on. Backup switches are left alone.
    pub fn reset_controls(&self) {
        self.reset_speaker();
        self.mention_user.store(true, Ordering::Relaxed);
    }

    pub fn voice_config(&self) -> &Arc<RwLock<VoiceVoxConfig>> {
        &self.voice_config
    }

    /// Audio for `text` with the current parameters merged into the engine query.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let speaker = self.speaker();
        let template = self.synthesizer.fetch_query_template(text, speaker).await?;
        let query = self.voice_config.read().await.apply_to_query(&template);
        self.synthesizer.synthesize(&query, speaker).await
    }

    /// Speak `answer` and post it to `destination`.
    ///
    /// `mention`, when given and mentions are on, is prefixed to the posted
    /// text only.
    pub async fn deliver(
        &self,
        destination: &Destination,
        answer: &str,
        attach_audio: bool,
        mention: Option<&Author>,
    ) -> Result<()> {
        let speaker = self.speaker();
        let audio = self.synthesize(&speech_text(answer)).await?;

        let displayed = match mention.filter(|_| self.mentions_user()) {
            Some(author) => format!("{} {answer}", self.delivery.mention(author)),
            None => answer.to_string(),
        };

        let policy = self.backup_policy();
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        if policy.audio {
            let path = self
                .backup
                .store_audio(&audio, speaker, destination.scope_id, &timestamp)
                .await?;
            info!("Backed up audio to {:?}", path);
        }
        if policy.text {
            let path = self
                .backup
                .store_text(&displayed, speaker, destination.scope_id, &timestamp)
                .await?;
            info!("Backed up text to {:?}", path);
        }

        if self.delivery.is_voice_playback_connected(destination.scope_id) {
            self.delivery.play_audio(destination.scope_id, audio.clone()).await?;
        }

        let text = truncate_chars(&displayed, MAX_REPLY_CHARS);
        let attachment = attach_audio.then_some(audio);
        self.delivery.send(destination, text, attachment).await
    }
}
