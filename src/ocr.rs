use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::{ConfigError, ModelSettings};

const API_VERSION: &str = "2023-06-01";

/// Phrases upstream services use when a session or token has lapsed.
const EXPIRED_CREDENTIAL_MARKERS: &[&str] = &[
    "session has expired",
    "expiredtoken",
    "expired token",
    "invalidclienttokenid",
    "security token included in the request is expired",
    "please reauthenticate",
];

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("Model credentials expired or were rejected: {0}")]
    CredentialsExpired(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Check your internet connection and try again.")]
    Connection,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model request failed ({status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("Model response did not include text content")]
    EmptyResponse,

    #[error("Could not read model response: {0}")]
    InvalidResponse(String),
}

impl CollaboratorError {
    pub fn is_credentials_expired(&self) -> bool {
        matches!(self, CollaboratorError::CredentialsExpired(_))
    }
}

/// A vision-capable model that turns a receipt image into text.
pub trait VisionModel: Send + Sync {
    fn transcribe(&self, image: &[u8], media_type: &str, prompt: &str) -> Result<String, CollaboratorError>;
}

pub fn looks_like_expired_credentials(message: &str) -> bool {
    let lower = message.to_lowercase();
    EXPIRED_CREDENTIAL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Map a non-2xx response onto the error a caller can act on.
pub fn classify_failure(status: u16, body: String) -> CollaboratorError {
    if status == 401 || status == 403 || looks_like_expired_credentials(&body) {
        CollaboratorError::CredentialsExpired(if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            body
        })
    } else {
        CollaboratorError::Upstream { status, body }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    media_type: &'a str,
    data: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Join every text block and trim; nothing left means the model gave us nothing usable.
fn collect_text(response: MessagesResponse) -> Result<String, CollaboratorError> {
    let text = response
        .content
        .into_iter()
        .map(|b| b.text.unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if text.is_empty() {
        Err(CollaboratorError::EmptyResponse)
    } else {
        Ok(text.to_string())
    }
}

/// HTTP client for a messages-style multimodal API.
pub struct MessagesClient {
    settings: ModelSettings,
    client: Client,
}

impl MessagesClient {
    pub fn new(settings: ModelSettings) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;
        Ok(Self { settings, client })
    }

    fn url(&self) -> String {
        format!("{}/v1/messages", self.settings.endpoint.trim_end_matches('/'))
    }
}

impl VisionModel for MessagesClient {
    fn transcribe(&self, image: &[u8], media_type: &str, prompt: &str) -> Result<String, CollaboratorError> {
        let body = MessagesRequest {
            model: &self.settings.model_id,
            max_tokens: self.settings.max_tokens,
            temperature: 0.0,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type,
                            data: BASE64.encode(image),
                        },
                    },
                    ContentBlock::Text { text: prompt },
                ],
            }],
        };

        tracing::debug!(model = %self.settings.model_id, bytes = image.len(), "calling vision model");
        let response = self
            .client
            .post(self.url())
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    CollaboratorError::Connection
                } else {
                    CollaboratorError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "vision model request failed");
            return Err(classify_failure(status.as_u16(), body));
        }

        let parsed: MessagesResponse = response
            .json()
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;
        collect_text(parsed)
    }
}
