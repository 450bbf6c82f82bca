// TestDependencies - mock implementations for testing
//
// Provides mock collaborators that can be injected into ServerDeps for tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::credential::Credential;
use super::generation::GenerationClient;
use super::key_pool::{KeyConfig, KeyPool, KeyTier};
use super::run_queue::{RunQueue, RunTask};
use super::{
    AlertKind, BaseGenerationProvider, BaseLiveLog, BaseNotifier, BaseSourceFetcher,
    BaseTagHandler, FetchError, LogLevel, ProviderError, ServerDeps,
};
use crate::config::PipelineConfig;
use crate::domains::crawl_jobs::models::{JobId, NewUnit, WorkId};
use crate::domains::crawl_jobs::store::CrawlStore;
use crate::domains::crawl_jobs::tags::Tag;

// =============================================================================
// Mock Generation Provider
// =============================================================================

/// Reply used once the scripted responses run out.
pub const DEFAULT_REPLY: &str =
    r#"Rewritten chapter ||| ["Tu Tiên", "Huyền Huyễn"] ||| A short summary. ||| The rewritten body."#;

pub struct MockGenerationProvider {
    responses: Arc<Mutex<VecDeque<Result<String, ProviderError>>>>,
    delay: Option<Duration>,
    prompts: Arc<Mutex<Vec<String>>>,
    credentials: Arc<Mutex<Vec<String>>>,
}

impl MockGenerationProvider {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            delay: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
            credentials: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_reply(self, reply: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(reply.to_string()));
        self
    }

    pub fn with_error(self, error: ProviderError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a response on a provider that is already shared.
    pub fn push_response(&self, response: Result<String, ProviderError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn credentials_used(&self) -> Vec<String> {
        self.credentials.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl Default for MockGenerationProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseGenerationProvider for MockGenerationProvider {
    async fn generate(
        &self,
        prompt: &str,
        credential: &Credential,
    ) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.credentials
            .lock()
            .unwrap()
            .push(credential.expose().to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DEFAULT_REPLY.to_string()))
    }
}

// =============================================================================
// Mock Source Fetcher
// =============================================================================

pub struct MockSourceFetcher {
    listing: Arc<Mutex<Result<Vec<NewUnit>, FetchError>>>,
    failures: Arc<Mutex<HashMap<String, FetchError>>>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MockSourceFetcher {
    pub fn new() -> Self {
        Self {
            listing: Arc::new(Mutex::new(Ok(Vec::new()))),
            failures: Arc::new(Mutex::new(HashMap::new())),
            fetched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Listing with units `1..=count`.
    pub fn with_units(self, count: i32) -> Self {
        self.set_units(count);
        self
    }

    pub fn with_listing_error(self, error: FetchError) -> Self {
        *self.listing.lock().unwrap() = Err(error);
        self
    }

    /// Fetching `url` fails until [`clear_failures`](Self::clear_failures).
    pub fn with_fetch_error(self, url: &str, error: FetchError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), error);
        self
    }

    /// Replace the listing, e.g. to simulate newly published units.
    pub fn set_units(&self, count: i32) {
        *self.listing.lock().unwrap() = Ok((1..=count).map(unit).collect());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Default for MockSourceFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// URL the mock listing uses for `ordinal`.
pub fn unit_url(ordinal: i32) -> String {
    format!("https://source.test/tien-nghich/chuong-{}/", ordinal)
}

fn unit(ordinal: i32) -> NewUnit {
    NewUnit {
        ordinal,
        title: Some(format!("Title {}", ordinal)),
        source_url: unit_url(ordinal),
    }
}

#[async_trait]
impl BaseSourceFetcher for MockSourceFetcher {
    async fn list_units(&self, _source_url: &str) -> Result<Vec<NewUnit>, FetchError> {
        self.listing.lock().unwrap().clone()
    }

    async fn fetch_content(&self, url: &str) -> Result<String, FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if let Some(error) = self.failures.lock().unwrap().get(url) {
            return Err(error.clone());
        }
        Ok(format!("Content of {}", url))
    }
}

// =============================================================================
// Mock Notifier
// =============================================================================

pub struct MockNotifier {
    alerts: Arc<Mutex<Vec<(AlertKind, String)>>>,
    fail: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            alerts: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    /// Record alerts but report delivery failure.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn alerts(&self) -> Vec<(AlertKind, String)> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn alerts_of(&self, kind: AlertKind) -> Vec<String> {
        self.alerts()
            .into_iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, message)| message)
            .collect()
    }
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseNotifier for MockNotifier {
    async fn send_alert(&self, kind: AlertKind, message: &str) -> Result<()> {
        self.alerts.lock().unwrap().push((kind, message.to_string()));
        if self.fail {
            anyhow::bail!("notification channel unavailable");
        }
        Ok(())
    }
}

// =============================================================================
// Mock Tag Handler
// =============================================================================

pub struct MockTagHandler {
    calls: Arc<Mutex<Vec<(WorkId, Vec<String>)>>>,
    fail: bool,
}

impl MockTagHandler {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> Vec<(WorkId, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockTagHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseTagHandler for MockTagHandler {
    async fn handle(&self, work_id: WorkId, tags: &[Tag]) -> Result<()> {
        let names = tags.iter().map(|t| t.as_str().to_string()).collect();
        self.calls.lock().unwrap().push((work_id, names));
        if self.fail {
            anyhow::bail!("tag sink unavailable");
        }
        Ok(())
    }
}

// =============================================================================
// Mock Live Log
// =============================================================================

#[derive(Default)]
pub struct MockLiveLog {
    entries: Mutex<Vec<(LogLevel, String, Option<JobId>)>>,
}

impl MockLiveLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message, _)| message.clone())
            .collect()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _, _)| *l == level)
            .count()
    }
}

impl BaseLiveLog for MockLiveLog {
    fn emit(&self, level: LogLevel, message: &str, job_id: Option<JobId>) {
        self.entries
            .lock()
            .unwrap()
            .push((level, message.to_string(), job_id));
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub generation: Arc<MockGenerationProvider>,
    pub fetcher: Arc<MockSourceFetcher>,
    pub notifier: Arc<MockNotifier>,
    pub tag_handler: Arc<MockTagHandler>,
    pub live_log: Arc<MockLiveLog>,
    pub keys: Vec<KeyConfig>,
    pub pipeline: PipelineConfig,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            generation: Arc::new(MockGenerationProvider::new()),
            fetcher: Arc::new(MockSourceFetcher::new()),
            notifier: Arc::new(MockNotifier::new()),
            tag_handler: Arc::new(MockTagHandler::new()),
            live_log: Arc::new(MockLiveLog::new()),
            keys: vec![
                KeyConfig::new("test-key-1", KeyTier::Elevated),
                KeyConfig::new("test-key-2", KeyTier::Elevated),
            ],
            pipeline: PipelineConfig {
                inter_unit_delay: Duration::ZERO,
                ..PipelineConfig::default()
            },
        }
    }

    /// Set a mock generation provider
    pub fn mock_generation(mut self, provider: MockGenerationProvider) -> Self {
        self.generation = Arc::new(provider);
        self
    }

    /// Set a mock source fetcher
    pub fn mock_fetcher(mut self, fetcher: MockSourceFetcher) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    /// Set a mock notifier
    pub fn mock_notifier(mut self, notifier: MockNotifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    /// Set a mock tag handler
    pub fn mock_tags(mut self, handler: MockTagHandler) -> Self {
        self.tag_handler = Arc::new(handler);
        self
    }

    /// Replace the generation keys
    pub fn keys(mut self, keys: Vec<KeyConfig>) -> Self {
        self.keys = keys;
        self
    }

    /// Convert into ServerDeps for testing. The receiver collects run tasks
    /// submitted by the actions under test.
    pub fn into_server_deps(
        self,
        store: Arc<dyn CrawlStore>,
    ) -> (ServerDeps, mpsc::Receiver<RunTask>) {
        let key_pool = Arc::new(KeyPool::new(self.keys.clone()));
        let generation = Arc::new(GenerationClient::new(
            key_pool,
            self.generation,
            Duration::from_secs(5),
        ));
        let (run_queue, receiver) = RunQueue::new(64);

        let deps = ServerDeps::new(
            store,
            generation,
            self.fetcher,
            self.notifier,
            self.tag_handler,
            self.live_log,
            run_queue,
            self.keys,
            self.pipeline,
        );
        (deps, receiver)
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
