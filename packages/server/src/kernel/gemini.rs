//! Gemini adapter for the generation provider seam.

use async_trait::async_trait;
use gemini_client::{GeminiClient, GeminiError, GenerateContentRequest};

use super::credential::Credential;
use super::traits::{BaseGenerationProvider, ProviderError};

pub struct GeminiProvider {
    client: GeminiClient,
    model: String,
}

impl GeminiProvider {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl BaseGenerationProvider for GeminiProvider {
    async fn generate(
        &self,
        prompt: &str,
        credential: &Credential,
    ) -> Result<String, ProviderError> {
        self.client
            .generate_content(
                credential.expose(),
                &self.model,
                GenerateContentRequest::from_prompt(prompt),
            )
            .await
            .map(|response| response.text)
            .map_err(classify)
    }
}

/// Map a client error onto the provider taxonomy the key pool understands.
pub fn classify(error: GeminiError) -> ProviderError {
    match error {
        GeminiError::Timeout => ProviderError::Timeout,
        GeminiError::Api { status: 429, message } => ProviderError::RateLimited(message),
        GeminiError::Api {
            status: 401 | 403,
            message,
        } => ProviderError::Forbidden(message),
        GeminiError::Api {
            status: 400 | 404,
            message,
        } => ProviderError::BadRequest(message),
        // Quota exhaustion sometimes comes back with a non-429 status.
        GeminiError::Api { message, .. } if message.to_lowercase().contains("quota") => {
            ProviderError::RateLimited(message)
        }
        GeminiError::Api { status, message } => {
            ProviderError::ServerError(format!("HTTP {}: {}", status, message))
        }
        GeminiError::Config(message) => ProviderError::BadRequest(message),
        GeminiError::Network(message) | GeminiError::Parse(message) => {
            ProviderError::ServerError(message)
        }
    }
}
