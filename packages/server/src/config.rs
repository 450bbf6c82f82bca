use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::kernel::key_pool::{parse_key_list, KeyConfig, KeyTier};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Standard-tier keys from `GEMINI_API_KEYS`, falling back to `GEMINI_API_KEY`.
    pub gemini_api_keys: Vec<String>,
    pub gemini_elevated_api_keys: Vec<String>,
    pub gemini_model: String,
    pub generation_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Upper bound on listing pages walked per discovery or poll.
    pub max_listing_pages: u32,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Cron expression (with seconds) for the processing tick.
    pub process_schedule: String,
    /// Cron expression (with seconds) for new-unit discovery.
    pub discovery_schedule: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let gemini_api_keys = env::var("GEMINI_API_KEYS")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env::var("GEMINI_API_KEY").ok())
            .map(|v| split_list(&v))
            .unwrap_or_default();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            gemini_api_keys,
            gemini_elevated_api_keys: env::var("GEMINI_ELEVATED_API_KEYS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            generation_timeout: Duration::from_secs(
                env::var("GENERATION_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()
                    .context("GENERATION_TIMEOUT_SECS must be a number of seconds")?,
            ),
            fetch_timeout: Duration::from_secs(
                env::var("FETCH_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("FETCH_TIMEOUT_SECS must be a number of seconds")?,
            ),
            max_listing_pages: env::var("MAX_LISTING_PAGES")
                .unwrap_or_else(|_| "200".to_string())
                .parse()
                .context("MAX_LISTING_PAGES must be a number")?,
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok().filter(|v| !v.is_empty()),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok().filter(|v| !v.is_empty()),
            process_schedule: env::var("PROCESS_SCHEDULE")
                .unwrap_or_else(|_| "0 */2 * * * *".to_string()),
            discovery_schedule: env::var("DISCOVERY_SCHEDULE")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),
        })
    }

    /// Keys from the environment, standard tier first.
    pub fn env_keys(&self) -> Vec<KeyConfig> {
        let mut keys = parse_key_list(&self.gemini_api_keys.join(","), KeyTier::Standard);
        keys.extend(parse_key_list(
            &self.gemini_elevated_api_keys.join(","),
            KeyTier::Elevated,
        ));
        keys
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Runtime tunables for the processing pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// A processing run whose heartbeat is older than this is reclaimed.
    pub stale_run_after: Duration,
    /// Crawling/summarizing units untouched for this long count as stuck.
    pub stuck_unit_after: Duration,
    /// Pause between unit fetches inside one chunk.
    pub inter_unit_delay: Duration,
    /// Transient chunk failures tolerated before the chunk is failed.
    pub max_chunk_retries: i32,
    /// Send a progress alert every this many summarized units.
    pub progress_alert_every: i32,
    /// Length of the fallback short summary.
    pub summary_prefix_chars: usize,
    /// Chunks processed by a repair re-trigger.
    pub repair_chunk_limit: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stale_run_after: Duration::from_secs(15 * 60),
            stuck_unit_after: Duration::from_secs(10 * 60),
            inter_unit_delay: Duration::from_secs(1),
            max_chunk_retries: 3,
            progress_alert_every: 50,
            summary_prefix_chars: 200,
            repair_chunk_limit: 10,
        }
    }
}

/// Tunables for the periodic processing tick.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Ready jobs processed per tick.
    pub jobs_per_tick: i64,
    /// Chunks run per job per tick.
    pub chunks_per_job: i32,
    /// Consecutive empty ticks before going to sleep.
    pub idle_ticks_before_sleep: u32,
    /// Ticks skipped while asleep.
    pub sleep_ticks: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jobs_per_tick: 3,
            chunks_per_job: 1,
            idle_ticks_before_sleep: 5,
            sleep_ticks: 10,
        }
    }
}
