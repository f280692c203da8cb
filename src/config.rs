use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chatbot::context::HISTORY_LENGTH_RANGE;
use crate::chatbot::gemini::DEFAULT_MODEL;
use crate::chatbot::speech::BackupPolicy;
use crate::chatbot::voicevox::DEFAULT_ENDPOINT;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {source}", path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    #[serde(default)]
    gemini_api_key: String,
    gemini_model: Option<String>,
    /// File holding the model's system prompt.
    system_prompt_file: Option<String>,
    voicevox_host: Option<String>,
    #[serde(default = "default_speaker")]
    voicevox_speaker: i64,
    voicevox_config_path: Option<String>,
    #[serde(default = "default_latest_n")]
    latest_n_history: usize,
    /// Directory for state files (logs, backups). Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default)]
    backup_audio: bool,
    #[serde(default)]
    backup_text: bool,
    backup_dir: Option<String>,
}

fn default_speaker() -> i64 {
    1
}

fn default_latest_n() -> usize {
    10
}

pub struct Config {
    pub telegram_bot_token: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    /// `None` when no prompt file is configured or it cannot be read.
    pub system_prompt: Option<String>,
    pub voicevox_host: String,
    pub voicevox_speaker: i64,
    pub voicevox_config_path: PathBuf,
    /// Exchanges kept per chat.
    pub latest_n_history: usize,
    pub data_dir: PathBuf,
    pub backup: BackupPolicy,
    pub backup_dir: PathBuf,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.gemini_api_key.is_empty() {
            return Err(ConfigError::Validation("gemini_api_key is required".into()));
        }
        if !HISTORY_LENGTH_RANGE.contains(&file.latest_n_history) {
            return Err(ConfigError::Validation(format!(
                "latest_n_history must be between {} and {}",
                HISTORY_LENGTH_RANGE.start(),
                HISTORY_LENGTH_RANGE.end()
            )));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let system_prompt = file.system_prompt_file.and_then(|p| {
            std::fs::read_to_string(p)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        });

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            gemini_api_key: file.gemini_api_key,
            gemini_model: file.gemini_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt,
            voicevox_host: file.voicevox_host.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            voicevox_speaker: file.voicevox_speaker,
            voicevox_config_path: file
                .voicevox_config_path
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("voicevox_config.json")),
            latest_n_history: file.latest_n_history,
            backup: BackupPolicy {
                audio: file.backup_audio,
                text: file.backup_text,
            },
            backup_dir: file
                .backup_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("storage/backup")),
            data_dir,
        })
    }
}
