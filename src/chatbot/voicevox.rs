//! Text-to-speech using a VOICEVOX engine.
//!
//! Two calls per utterance: `/audio_query` returns the synthesis query for
//! the text, `/synthesis` renders that (possibly adjusted) query to WAV.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::chatbot::error::{Error, Result};
use crate::chatbot::speech::Synthesizer;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:50021";

/// TTS client for the VOICEVOX HTTP API.
pub struct VoiceVoxClient {
    endpoint: String,
    client: reqwest::Client,
}

impl VoiceVoxClient {
    /// `endpoint` is the engine base URL, e.g. "http://127.0.0.1:50021".
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn check(response: reqwest::Response, step: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::upstream("voicevox", format!("{step} error {status}: {body}")))
    }
}

#[async_trait]
impl Synthesizer for VoiceVoxClient {
    async fn fetch_query_template(&self, text: &str, speaker: i64) -> Result<Value> {
        let preview: String = text.chars().take(50).collect();
        info!("TTS: \"{}\" (speaker {})", preview, speaker);

        let response = self
            .client
            .post(format!("{}/audio_query", self.endpoint))
            .query(&[("speaker", speaker.to_string()), ("text", text.to_string())])
            .send()
            .await
            .map_err(|e| Error::upstream("voicevox", format!("audio_query request failed: {e}")))?;

        Self::check(response, "audio_query")
            .await?
            .json::<Value>()
            .await
            .map_err(|e| Error::upstream("voicevox", format!("invalid audio_query response: {e}")))
    }

    async fn synthesize(&self, query: &Value, speaker: i64) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(format!("{}/synthesis", self.endpoint))
            .query(&[("speaker", speaker.to_string())])
            .json(query)
            .send()
            .await
            .map_err(|e| Error::upstream("voicevox", format!("synthesis request failed: {e}")))?;

        let wav = Self::check(response, "synthesis")
            .await?
            .bytes()
            .await
            .map_err(|e| Error::upstream("voicevox", format!("failed to read audio: {e}")))?;

        debug!("Got {} bytes of WAV audio", wav.len());
        Ok(wav.to_vec())
    }
}
