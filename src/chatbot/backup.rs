//! On-disk backups of generated speech and text.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::chatbot::error::{Error, Result};
use crate::chatbot::speech::BackupStore;

/// Writes `<base>/{audio,text}/<speaker>/<scope>_<timestamp>.{wav,txt}`.
pub struct FileBackup {
    base_dir: PathBuf,
}

impl FileBackup {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    async fn write(&self, kind: &str, speaker: i64, file_name: String, data: &[u8]) -> Result<PathBuf> {
        let dir = self.base_dir.join(kind).join(speaker.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::persistence(&dir, e))?;
        let path = dir.join(file_name);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| Error::persistence(&path, e))?;
        Ok(path)
    }
}

#[async_trait]
impl BackupStore for FileBackup {
    async fn store_audio(&self, audio: &[u8], speaker: i64, scope_id: i64, timestamp: &str) -> Result<PathBuf> {
        self.write("audio", speaker, format!("{scope_id}_{timestamp}.wav"), audio)
            .await
    }

    async fn store_text(&self, text: &str, speaker: i64, scope_id: i64, timestamp: &str) -> Result<PathBuf> {
        self.write("text", speaker, format!("{scope_id}_{timestamp}.txt"), text.as_bytes())
            .await
    }
}
