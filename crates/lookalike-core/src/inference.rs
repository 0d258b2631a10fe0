//! Name inference via a multimodal Gemini model.
//!
//! Sends the subject image with a fixed instruction and extracts the
//! free-text reply. The reply has no guaranteed structure; it is only
//! trimmed and checked for emptiness before use as a search key.

use crate::types::EncodedImage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Fixed instruction: identify face shape, hairstyle, eyes, nose, mouth and
/// cheekbones, pick a similar-looking celebrity, answer with the name only.
pub const INSTRUCTION: &str = "첨부한 이미지의 인물의 얼굴형, 머리스타일, 눈, 코, 입, 광대 부분을 식별해서 닮은 연예인을 선정하고 이름을 알려줘. 이름만 말해줘.";

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("no candidate in response (block reason: {block_reason:?})")]
    NoCandidate { block_reason: Option<String> },
    #[error("model returned an empty name")]
    EmptyName,
    #[error("{0}")]
    Other(String),
}

/// Turns a subject image into the name of a similar-looking public figure.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn analyze(&self, image: &EncodedImage) -> Result<String, AnalysisError>;
}

// --- generateContent wire types ---

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 2],
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn build_request(image: &EncodedImage) -> GenerateContentRequest<'_> {
    GenerateContentRequest {
        contents: [Content {
            parts: [
                Part::Text { text: INSTRUCTION },
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: image.mime(),
                        data: image.payload(),
                    },
                },
            ],
        }],
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: GenerateContentResponse) -> Result<String, AnalysisError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(AnalysisError::NoCandidate {
            block_reason: response.prompt_feedback.and_then(|f| f.block_reason),
        });
    };

    Ok(candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default())
}

/// Prefer the service's own error message; fall back to the raw body.
fn service_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Trim whitespace and wrapping quotes from the model's reply.
///
/// Anything else (multi-word explanations, trailing punctuation) passes
/// through unchanged.
pub fn normalize_candidate_name(raw: &str) -> Result<String, AnalysisError> {
    const QUOTES: &[char] = &['"', '\'', '“', '”', '‘', '’', '「', '」'];

    let name = raw.trim().trim_matches(QUOTES).trim();
    if name.is_empty() {
        return Err(AnalysisError::EmptyName);
    }
    Ok(name.to_string())
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn analyze(&self, image: &EncodedImage) -> Result<String, AnalysisError> {
        if image.payload().is_empty() {
            return Err(AnalysisError::Other("image payload is empty".into()));
        }

        tracing::debug!(
            model = %self.model,
            mime = image.mime(),
            payload_len = image.payload().len(),
            "sending generateContent request"
        );

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(image))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = service_message(&body);
            tracing::warn!(status = status.as_u16(), %message, "generateContent failed");
            return Err(AnalysisError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        let raw = extract_text(parsed)?;
        tracing::info!(reply = %raw.trim(), "model replied");

        normalize_candidate_name(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let image = EncodedImage::from_bytes(b"abc", "image/png");
        let json = serde_json::to_value(build_request(&image)).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], INSTRUCTION);
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "YWJj");
        // Data URI prefix must never be transmitted.
        assert!(!parts[1]["inlineData"]["data"].as_str().unwrap().starts_with("data:"));
    }

    #[test]
    fn test_extract_text_concatenates_parts() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Tom "},{"text":"Hanks\n"}],"role":"model"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Tom Hanks\n");
    }

    #[test]
    fn test_extract_text_blocked_prompt() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        match extract_text(response) {
            Err(AnalysisError::NoCandidate { block_reason }) => {
                assert_eq!(block_reason.as_deref(), Some("SAFETY"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_extract_text_candidate_without_content() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert_eq!(extract_text(response).unwrap(), "");
    }

    #[test]
    fn test_service_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(service_message(body), "API key not valid.");
        assert_eq!(service_message("  upstream down \n"), "upstream down");
    }

    #[test]
    fn test_normalize_candidate_name() {
        assert_eq!(normalize_candidate_name(" Tom Hanks\n").unwrap(), "Tom Hanks");
        assert_eq!(normalize_candidate_name("\"공유\"").unwrap(), "공유");
        assert_eq!(
            normalize_candidate_name("It looks like Tom Hanks.").unwrap(),
            "It looks like Tom Hanks."
        );
        assert!(matches!(normalize_candidate_name("  \n"), Err(AnalysisError::EmptyName)));
        assert!(matches!(normalize_candidate_name("\"\""), Err(AnalysisError::EmptyName)));
    }

    #[test]
    fn test_endpoint() {
        let client = GeminiClient::new("k").with_base_url("http://localhost:9/").with_model("m");
        assert_eq!(client.endpoint(), "http://localhost:9/v1beta/models/m:generateContent");
    }
}
