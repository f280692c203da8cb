//! Services shared by every handler, built once at startup.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::chatbot::history::ChatHistory;
use crate::chatbot::responder::Responder;
use crate::chatbot::speech::SpeechDelivery;
use crate::chatbot::voice_config::VoiceVoxConfig;

/// Range accepted by `/history_length`.
pub const HISTORY_LENGTH_RANGE: std::ops::RangeInclusive<usize> = 1..=50;

pub struct AppContext {
    pub responder: Responder,
    pub speech: SpeechDelivery,
    /// Where `/voice_config` changes are persisted.
    pub voice_config_path: PathBuf,
    /// Prompt restored by `/reset_system_prompt`.
    default_system_prompt: String,
    /// Answer every message instead of only those addressed to the bot.
    listen_all: AtomicBool,
}

impl AppContext {
    pub fn new(
        responder: Responder,
        speech: SpeechDelivery,
        voice_config_path: PathBuf,
        default_system_prompt: String,
    ) -> Self {
        Self {
            responder,
            speech,
            voice_config_path,
            default_system_prompt,
            listen_all: AtomicBool::new(false),
        }
    }

    pub fn history(&self) -> &ChatHistory {
        self.responder.history()
    }

    pub fn listens_to_all(&self) -> bool {
        self.listen_all.load(Ordering::Relaxed)
    }

    /// Flip listening to every message, returning the new state.
    pub fn toggle_listen(&self) -> bool {
        !self.listen_all.fetch_xor(true, Ordering::Relaxed)
    }

    /// Other bots are only answered while listening to all.
    pub fn should_answer(&self, from_bot: bool, addressed: bool) -> bool {
        self.listens_to_all() || (addressed && !from_bot)
    }

    pub fn reset_system_prompt(&self) {
        self.responder.set_system_prompt(self.default_system_prompt.clone());
    }

    /// Apply `edit` to the voice parameters and persist the result.
    pub async fn update_voice_config<T>(
        &self,
        edit: impl FnOnce(&mut VoiceVoxConfig) -> crate::chatbot::Result<T> + Send,
    ) -> crate::chatbot::Result<T> {
        let mut config = self.speech.voice_config().write().await;
        let out = edit(&mut config)?;
        config.save(&self.voice_config_path)?;
        Ok(out)
    }

    /// Forget the scope's history and put prompt, voice, speaker, mentions and
    /// listening back to their defaults.
    pub async fn reset_all(&self, scope_id: i64) -> crate::chatbot::Result<()> {
        self.history().clear(scope_id).await;
        self.reset_system_prompt();
        self.speech.reset_controls();
        self.listen_all.store(false, Ordering::Relaxed);
        self.update_voice_config(|config| {
            config.reset();
            Ok(())
        })
        .await?;
        info!(scope = scope_id, "All settings reset");
        Ok(())
    }
}

pub type SharedContext = Arc<AppContext>;
