//! Single-request generation wrapper: acquire a key, call the provider under
//! a hard timeout, report the outcome, retry on another key.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::key_pool::{KeyOutcome, KeyPool, KeyPoolError};
use super::traits::{BaseGenerationProvider, ProviderError};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Keys(#[from] KeyPoolError),

    #[error("generation failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: ProviderError },
}

impl GenerationError {
    /// Worth retrying the chunk on a later run rather than failing it.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Keys(KeyPoolError::NoKeyAvailable { .. }) => true,
            GenerationError::Keys(KeyPoolError::NoKeysConfigured) => false,
            GenerationError::RetriesExhausted { last, .. } => {
                matches!(last, ProviderError::Timeout | ProviderError::RateLimited(_))
            }
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, GenerationError::Keys(KeyPoolError::NoKeysConfigured))
    }
}

fn outcome_for(error: &ProviderError) -> KeyOutcome {
    match error {
        ProviderError::RateLimited(_) => KeyOutcome::RateLimited,
        ProviderError::Timeout => KeyOutcome::Neutral,
        ProviderError::Forbidden(_) | ProviderError::BadRequest(_) | ProviderError::ServerError(_) => {
            KeyOutcome::RequestFailed
        }
    }
}

pub struct GenerationClient {
    keys: Arc<KeyPool>,
    provider: Arc<dyn BaseGenerationProvider>,
    timeout: Duration,
}

impl GenerationClient {
    pub fn new(
        keys: Arc<KeyPool>,
        provider: Arc<dyn BaseGenerationProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            keys,
            provider,
            timeout,
        }
    }

    pub fn key_pool(&self) -> &Arc<KeyPool> {
        &self.keys
    }

    /// max(10, 3 x keys)
    pub fn max_attempts(&self) -> usize {
        (self.keys.key_count() * 3).max(10)
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let max_attempts = self.max_attempts();
        let mut last = None;

        for attempt in 1..=max_attempts {
            let lease = self.keys.acquire().await?;

            let result =
                match tokio::time::timeout(self.timeout, self.provider.generate(prompt, &lease.credential))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout),
                };

            match result {
                Ok(text) => {
                    self.keys.report(lease.id, KeyOutcome::Success);
                    debug!(key = %lease.label, attempt, "Generation succeeded");
                    return Ok(text);
                }
                Err(e) => {
                    self.keys.report(lease.id, outcome_for(&e));
                    warn!(
                        key = %lease.label,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Generation attempt failed"
                    );
                    last = Some(e);
                }
            }
        }

        Err(GenerationError::RetriesExhausted {
            attempts: max_attempts,
            last: last.unwrap_or(ProviderError::Timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::key_pool::{KeyConfig, KeyTier};
    use crate::kernel::test_dependencies::MockGenerationProvider;

    fn pool(n: usize, tier: KeyTier) -> Arc<KeyPool> {
        Arc::new(KeyPool::new(
            (0..n)
                .map(|i| KeyConfig::new(format!("key-{}", i), tier))
                .collect(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_on_another_key_after_rate_limit() {
        let provider = Arc::new(
            MockGenerationProvider::new()
                .with_error(ProviderError::RateLimited("quota".into()))
                .with_reply("done"),
        );
        let keys = pool(2, KeyTier::Standard);
        let client = GenerationClient::new(keys.clone(), provider.clone(), Duration::from_secs(5));

        assert_eq!(client.generate("prompt").await.unwrap(), "done");
        assert_eq!(provider.credentials_used(), vec!["key-0", "key-1"]);
        assert!(keys.snapshot()[0].cooldown_secs.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_does_not_penalise_the_key() {
        let provider = Arc::new(
            MockGenerationProvider::new()
                .with_delay(Duration::from_secs(60))
                .with_reply("late"),
        );
        let keys = pool(1, KeyTier::Elevated);
        let client = GenerationClient::new(keys.clone(), provider, Duration::from_secs(1));

        let err = client.generate("prompt").await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::RetriesExhausted {
                attempts: 10,
                last: ProviderError::Timeout
            }
        ));
        assert!(err.is_transient());
        let key = &keys.snapshot()[0];
        assert_eq!(key.consecutive_failures, 0);
        assert!(key.cooldown_secs.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_the_attempt_ceiling() {
        let mut provider = MockGenerationProvider::new();
        for _ in 0..20 {
            provider = provider.with_error(ProviderError::Forbidden("revoked".into()));
        }
        let provider = Arc::new(provider);
        let client = GenerationClient::new(
            pool(4, KeyTier::Elevated),
            provider.clone(),
            Duration::from_secs(5),
        );
        assert_eq!(client.max_attempts(), 12);

        let err = client.generate("prompt").await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(provider.call_count(), 12);
    }

    #[tokio::test]
    async fn no_keys_is_a_configuration_error() {
        let client = GenerationClient::new(
            Arc::new(KeyPool::new(Vec::new())),
            Arc::new(MockGenerationProvider::new()),
            Duration::from_secs(5),
        );
        let err = client.generate("prompt").await.unwrap_err();
        assert!(err.is_configuration());
        assert!(!err.is_transient());
    }
}
