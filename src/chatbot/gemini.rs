//! Gemini API client for chat and image understanding.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chatbot::error::{Error, Result};
use crate::chatbot::history::{ConversationTurn, Role};
use crate::chatbot::responder::LanguageModel;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const NO_RESPONSE: &str = "No response.";
const NO_DESCRIPTION: &str = "No description.";

pub struct GeminiClient {
    api_key: String,
    model: RwLock<String>,
    system_prompt: RwLock<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

/// Gemini calls the assistant side `model`.
fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

/// Transport failure with the request URL stripped.
fn http_error(context: &str, e: reqwest::Error) -> Error {
    Error::upstream("gemini", format!("{context}: {}", e.without_url()))
}

/// Model ids end up in the request path, so only plain id characters pass.
pub fn is_valid_model_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
}

/// Concatenated text of the first candidate, if any.
fn response_text(response: &GenerateResponse) -> Option<String> {
    let parts = &response.candidates.as_ref()?.first()?.content.as_ref()?.parts;
    let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, system_prompt: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::upstream("gemini", format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key,
            model: RwLock::new(model),
            system_prompt: RwLock::new(system_prompt.unwrap_or_default()),
            client,
        })
    }

    pub fn model(&self) -> String {
        self.model
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn system_prompt(&self) -> String {
        self.system_prompt
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn system_instruction(&self) -> Option<Content> {
        let prompt = self.system_prompt();
        (!prompt.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(prompt)],
        })
    }

    /// The API key goes in a header, never in the URL.
    fn request(&self, request: &GenerateRequest) -> reqwest::RequestBuilder {
        let url = format!("{GEMINI_API_BASE}/{}:generateContent", self.model());
        self.client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let response = self
            .request(request)
            .send()
            .await
            .map_err(|e| http_error("HTTP error", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| http_error("failed to read response", e))?;

        debug!("Gemini response status: {status}");

        if !status.is_success() {
            return Err(Error::upstream("gemini", format!("API error {status}: {body}")));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| Error::upstream("gemini", format!("failed to parse response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(Error::upstream("gemini", error.message));
        }

        if let Some(ref usage) = parsed.usage_metadata {
            info!(
                prompt = usage.prompt_token_count,
                completion = usage.candidates_token_count,
                total = usage.total_token_count,
                "Gemini tokens used"
            );
        }

        Ok(parsed)
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate_text(&self, messages: &[ConversationTurn]) -> Result<String> {
        let request = GenerateRequest {
            system_instruction: self.system_instruction(),
            contents: messages
                .iter()
                .map(|turn| Content {
                    role: Some(gemini_role(turn.role)),
                    parts: vec![Part::text(turn.content.clone())],
                })
                .collect(),
        };

        let response = self.generate(&request).await?;
        Ok(response_text(&response).unwrap_or_else(|| NO_RESPONSE.to_string()))
    }

    async fn describe_image(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String> {
        info!("🖼️ Describing image ({} bytes, {})", image.len(), mime_type);

        let request = GenerateRequest {
            system_instruction: self.system_instruction(),
            contents: vec![Content {
                role: Some("user"),
                parts: vec![
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: mime_type.to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        }),
                    },
                    Part::text(format!("Describe this image in detail. {prompt}")),
                ],
            }],
        };

        let response = self.generate(&request).await?;
        Ok(response_text(&response).unwrap_or_else(|| NO_DESCRIPTION.to_string()))
    }

    fn set_system_prompt(&self, prompt: String) {
        *self
            .system_prompt
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = prompt;
        info!("System prompt updated");
    }

    fn set_model(&self, model: String) {
        info!("Gemini model changed to {model}");
        *self
            .model
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = model;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(system_prompt: Option<&str>) -> GeminiClient {
        GeminiClient::new(
            "key".to_string(),
            DEFAULT_MODEL.to_string(),
            system_prompt.map(str::to_string),
        )
        .unwrap()
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateRequest {
            system_instruction: client(Some("be brief")).system_instruction(),
            contents: vec![
                Content {
                    role: Some(gemini_role(Role::User)),
                    parts: vec![Part::text("hi")],
                },
                Content {
                    role: Some(gemini_role(Role::Assistant)),
                    parts: vec![Part::text("hello")],
                },
            ],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][1]["role"], "model");
        assert!(json["contents"][1]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn test_empty_system_prompt_is_omitted() {
        let request = GenerateRequest {
            system_instruction: client(None).system_instruction(),
            contents: vec![],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_set_system_prompt() {
        let gemini = client(None);
        gemini.set_system_prompt("speak like a cat".to_string());
        assert_eq!(gemini.system_prompt(), "speak like a cat");
    }

    #[test]
    fn test_api_key_sent_as_header() {
        let gemini = GeminiClient::new("SECRET_KEY".to_string(), DEFAULT_MODEL.to_string(), None).unwrap();
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![],
        };
        let built = gemini.request(&request).build().unwrap();

        assert!(!built.url().as_str().contains("SECRET_KEY"));
        assert!(built.url().query().is_none());
        assert_eq!(built.headers()["x-goog-api-key"], "SECRET_KEY");
        assert!(built.url().path().ends_with("/gemini-2.0-flash:generateContent"));
    }

    #[tokio::test]
    async fn test_transport_error_hides_url() {
        // nothing listens on port 1
        let err = reqwest::Client::new()
            .post("http://127.0.0.1:1/models?key=SECRET_KEY")
            .send()
            .await
            .unwrap_err();
        let err = http_error("HTTP error", err);

        assert!(matches!(err, Error::Upstream { service: "gemini", .. }));
        assert!(!err.to_string().contains("SECRET_KEY"));
    }

    #[test]
    fn test_set_model() {
        let gemini = client(None);
        gemini.set_model("gemini-2.5-flash".to_string());
        assert_eq!(gemini.model(), "gemini-2.5-flash");

        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![],
        };
        let built = gemini.request(&request).build().unwrap();
        assert!(built.url().path().ends_with("/gemini-2.5-flash:generateContent"));
    }

    #[test]
    fn test_model_name_validation() {
        assert!(is_valid_model_name("gemini-2.0-flash"));
        assert!(is_valid_model_name("gemini-1.5-pro_latest"));
        assert!(!is_valid_model_name(""));
        assert!(!is_valid_model_name("../files"));
        assert!(!is_valid_model_name("gemini flash"));
    }

    #[test]
    fn test_response_text() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}],"role":"model"}}],
                "usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2,"totalTokenCount":5}}"#,
        )
        .unwrap();
        assert_eq!(response_text(&response).as_deref(), Some("Hello world"));
    }

    #[test]
    fn test_response_text_empty() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#).unwrap();
        assert_eq!(response_text(&response), None);

        let response: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert_eq!(response_text(&response), None);
    }
}
