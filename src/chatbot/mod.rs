//! Chatbot module - answers chat messages with Gemini and speaks them with VOICEVOX.

pub mod backup;
pub mod commands;
pub mod context;
pub mod error;
pub mod gemini;
pub mod history;
pub mod message;
pub mod preprocessor;
pub mod responder;
pub mod speech;
pub mod telegram;
pub mod text;
pub mod voice_config;
pub mod voicevox;


pub use backup::FileBackup;
pub use commands::{Command, handle_command};
pub use context::{AppContext, SharedContext};
pub use error::{Error, Result};
pub use gemini::GeminiClient;
pub use history::ChatHistory;
pub use responder::{AnswerSource, Responder};
pub use speech::SpeechDelivery;
pub use telegram::TelegramClient;
pub use voice_config::VoiceVoxConfig;
pub use voicevox::VoiceVoxClient;
