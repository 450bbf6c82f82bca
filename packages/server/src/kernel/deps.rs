//! Server dependencies for pipeline actions (using traits for testability)
//!
//! This module provides the central dependency container used by all crawl
//! actions. All external services use trait abstractions to enable testing.

use anyhow::Result;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::domains::crawl_jobs::settings;
use crate::domains::crawl_jobs::store::CrawlStore;
use crate::kernel::{
    generation::GenerationClient,
    key_pool::{KeyConfig, KeyPool},
    run_queue::RunQueue,
    BaseLiveLog, BaseNotifier, BaseSourceFetcher, BaseTagHandler,
};

/// Server dependencies accessible to actions (using traits for testability)
#[derive(Clone)]
pub struct ServerDeps {
    pub store: Arc<dyn CrawlStore>,
    pub generation: Arc<GenerationClient>,
    pub fetcher: Arc<dyn BaseSourceFetcher>,
    pub notifier: Arc<dyn BaseNotifier>,
    pub tag_handler: Arc<dyn BaseTagHandler>,
    pub live_log: Arc<dyn BaseLiveLog>,
    /// Hand-off for background discovery and repair re-triggers
    pub run_queue: RunQueue,
    /// Keys from the environment, merged with the settings table on reload
    pub env_keys: Vec<KeyConfig>,
    pub pipeline: PipelineConfig,
}

impl ServerDeps {
    /// Create new ServerDeps with the given dependencies
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CrawlStore>,
        generation: Arc<GenerationClient>,
        fetcher: Arc<dyn BaseSourceFetcher>,
        notifier: Arc<dyn BaseNotifier>,
        tag_handler: Arc<dyn BaseTagHandler>,
        live_log: Arc<dyn BaseLiveLog>,
        run_queue: RunQueue,
        env_keys: Vec<KeyConfig>,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            store,
            generation,
            fetcher,
            notifier,
            tag_handler,
            live_log,
            run_queue,
            env_keys,
            pipeline,
        }
    }

    pub fn key_pool(&self) -> &Arc<KeyPool> {
        self.generation.key_pool()
    }

    /// Re-read keys from settings and the environment and reset the pool.
    /// Returns the number of distinct keys loaded.
    pub async fn reload_keys(&self) -> Result<usize> {
        let keys = settings::load_keys(self.store.as_ref(), &self.env_keys).await?;
        self.key_pool().reset(keys);
        Ok(self.key_pool().key_count())
    }
}
