use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::settings::AppSettings;
use crate::services::staging_store::StagedDocument;

// Base URL for the Gemini API
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const GEMINI_MODEL: &str = "gemini-2.0-flash-exp";

/// Fixed instruction sent with every staged PDF. The model is asked for a
/// bare JSON array of {item, info} objects; the sanitizer strips any code
/// fences it wraps the array in anyway.
const MENU_EXTRACTION_PROMPT: &str = r#"Extract all menu items from this nutrition guide PDF and return them as a JSON array. Each menu item should include the item name and all its nutrition facts, ingredients, allergens, and prices in a single info field.

Return ONLY a JSON array like this:
[
  {
    "item": "Item Name",
    "info": "All nutrition facts, ingredients, allergens, prices, etc. as a single string"
  }
]

Include all menu items from the PDF. Infer ingredients and allergen info if not listed. Include prices if available. Just return the JSON array, no other text."#;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Gemini API key is not configured")]
    Unconfigured,
    #[error("Gemini rate limit still exceeded after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },
    #[error("Gemini request failed: {0}")]
    Service(String),
}

/// Outcome of a single request attempt, before retry classification.
#[derive(Debug)]
pub enum AttemptError {
    RateLimited(String),
    Fatal(String),
}

// Gemini Generate Content Request Structs
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiGenerateRequest {
    pub contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiContent {
    pub role: String,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiInlineData {
    pub mime_type: String,
    pub data: String,
}

// Gemini Generate Content Response Structs
#[skip_serializing_none]
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerateResponse {
    pub candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    pub content: GeminiResponseContent,
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub index: i32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GeminiResponseContent {
    pub parts: Option<Vec<GeminiResponsePart>>,
    pub role: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GeminiResponsePart {
    pub text: String,
}

/// Backoff schedule applied when Gemini answers with HTTP 429. Any other
/// failure is surfaced immediately without retrying.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before re-submitting after `attempt` failed attempts:
    /// 2^attempt * base_delay, i.e. 20s, 40s, 80s with the default base.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Runs `operation` under the policy: rate-limited attempts are retried with
/// exponential backoff until the attempt cap, fatal errors abort immediately.
pub async fn retry_on_rate_limit<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, ExtractionError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, AttemptError>>,
{
    for attempt in 1..=policy.max_attempts {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(msg)) => return Err(ExtractionError::Service(msg)),
            Err(AttemptError::RateLimited(msg)) => {
                if attempt == policy.max_attempts {
                    warn!("Attempt {} of {} rate limited, giving up: {}", attempt, policy.max_attempts, msg);
                    break;
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    "Attempt {} of {} rate limited, waiting {:?} before retry: {}",
                    attempt, policy.max_attempts, delay, msg
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(ExtractionError::RateLimitExhausted {
        attempts: policy.max_attempts,
    })
}

/// Abstraction over the inference call so the pipeline can be exercised
/// without the network.
#[async_trait]
pub trait MenuExtractor: Send + Sync {
    async fn extract_menu(&self, document: &StagedDocument) -> Result<String, ExtractionError>;
}

// Gemini Client
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: crate::clients::http_client::new_api_client(),
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Builds a client from settings, failing when no credential is present.
    /// Callers treat the error as the pipeline's preflight failure.
    pub fn from_settings(settings: &AppSettings) -> Result<Self, ExtractionError> {
        let api_key = settings
            .api_keys
            .gemini_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ExtractionError::Unconfigured)?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_request(&self, document: &StagedDocument) -> GeminiGenerateRequest {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&document.content);

        GeminiGenerateRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![
                    GeminiPart::Text {
                        text: MENU_EXTRACTION_PROMPT.to_string(),
                    },
                    GeminiPart::InlineData {
                        inline_data: GeminiInlineData {
                            mime_type: document.mime_type.clone(),
                            data: encoded,
                        },
                    },
                ],
            }],
        }
    }

    async fn send_generate(&self, request: &GeminiGenerateRequest) -> Result<String, AttemptError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, GEMINI_MODEL);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::Fatal(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response".to_string());
            let message = format!("Gemini request failed with status {}: {}", status, error_text);

            if status.as_u16() == 429 {
                return Err(AttemptError::RateLimited(message));
            }
            return Err(AttemptError::Fatal(message));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| AttemptError::Fatal(format!("Failed to get response text: {}", e)))?;

        let result = serde_json::from_str::<GeminiGenerateResponse>(&response_text).map_err(|e| {
            error!("Gemini deserialization failed: {} | Response: {}", e, response_text);
            AttemptError::Fatal(format!("Gemini deserialization failed: {}", e))
        })?;

        let text = result
            .candidates
            .first()
            .and_then(|candidate| candidate.content.parts.as_ref())
            .map(|parts| {
                parts
                    .iter()
                    .map(|part| part.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|text| !text.is_empty());

        match text {
            Some(text) => Ok(text),
            None => {
                let finish_reason = result
                    .candidates
                    .first()
                    .and_then(|candidate| candidate.finish_reason.as_deref())
                    .unwrap_or("unknown");
                Err(AttemptError::Fatal(format!(
                    "Gemini returned a response without content parts (finish_reason: {})",
                    finish_reason
                )))
            }
        }
    }
}

#[async_trait]
impl MenuExtractor for GeminiClient {
    #[instrument(skip(self, document), fields(file_name = %document.file_name, size = document.size))]
    async fn extract_menu(&self, document: &StagedDocument) -> Result<String, ExtractionError> {
        let request = self.build_request(document);
        let request_ref = &request;

        debug!(
            "Sending menu PDF to Gemini ({:.2} MB)",
            document.size as f64 / 1024.0 / 1024.0
        );

        let raw = retry_on_rate_limit(&self.retry, move |attempt| async move {
            debug!("Attempt {} - generating JSON from PDF", attempt);
            self.send_generate(request_ref).await
        })
        .await?;

        info!("Gemini extraction successful ({} chars of raw output)", raw.len());
        Ok(raw)
    }
}
