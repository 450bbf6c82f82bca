//! Pure Gemini REST API client
//!
//! A minimal client for the `generateContent` endpoint with no domain-specific
//! logic. The API key is passed per call so callers can rotate credentials.
//!
//! # Example
//!
//! ```rust,ignore
//! use gemini_client::{GeminiClient, GenerateContentRequest};
//!
//! let client = GeminiClient::new();
//! let response = client
//!     .generate_content(api_key, "gemini-2.5-flash", GenerateContentRequest::from_prompt("Hello!"))
//!     .await?;
//! println!("{}", response.text);
//! ```

pub mod error;
pub mod types;

pub use error::{GeminiError, Result};
pub use types::*;

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Pure Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    http_client: Client,
    base_url: String,
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiClient {
    /// Create a client against the public endpoint.
    pub fn new() -> Self {
        Self {
            http_client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeminiError::Config(e.to_string()))?;
        Ok(Self {
            http_client,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Set a custom base URL (proxies, test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Call `models/{model}:generateContent`.
    pub async fn generate_content(
        &self,
        api_key: &str,
        model: &str,
        request: GenerateContentRequest,
    ) -> Result<GenerateResponse> {
        if api_key.is_empty() {
            return Err(GeminiError::Config("empty API key".into()));
        }

        let start = std::time::Instant::now();

        let response = self
            .http_client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Gemini request failed");
                GeminiError::from_transport(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Gemini API error");
            return Err(GeminiError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let raw: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GeminiError::Parse(e.to_string()))?;

        let text = raw
            .text()
            .ok_or_else(|| GeminiError::Parse("No candidate text in Gemini response".into()))?;

        debug!(
            model = %model,
            duration_ms = start.elapsed().as_millis(),
            "Gemini generateContent"
        );

        Ok(GenerateResponse {
            text,
            usage: raw.usage_metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = GeminiClient::new().with_base_url("https://proxy.example.com");
        assert_eq!(client.base_url(), "https://proxy.example.com");
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let request = GenerateContentRequest::from_prompt("hi")
            .temperature(0.7)
            .max_output_tokens(512);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn test_response_text_joins_parts() {
        let raw: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Hello " }, { "text": "world" }] },
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        assert_eq!(raw.text().as_deref(), Some("Hello world"));
    }

    #[test]
    fn test_empty_candidates_has_no_text() {
        let raw: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({ "candidates": [] })).unwrap();
        assert!(raw.text().is_none());
    }

    #[tokio::test]
    async fn test_empty_key_is_config_error() {
        let client = GeminiClient::new();
        let err = client
            .generate_content("", "gemini-2.5-flash", GenerateContentRequest::from_prompt("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GeminiError::Config(_)));
    }
}
