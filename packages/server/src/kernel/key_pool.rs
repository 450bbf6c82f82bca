//! Rate-limited round-robin selection over generation provider keys.
//!
//! Each key carries its own per-minute and per-day budget. `acquire()` hands
//! out the next key in rotation that still has budget left, or waits for the
//! earliest key to recover. Rate-limit reports push a key into a backoff drawn
//! from its tier's table; nothing short of a pool reset removes a key.
//!
//! All bookkeeping happens under one short-lived lock that is never held
//! across an await point.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::credential::Credential;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

const STANDARD_BACKOFF: [Duration; 5] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(120),
    Duration::from_secs(300),
    Duration::from_secs(600),
];

const ELEVATED_BACKOFF: [Duration; 5] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
    Duration::from_secs(30),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyTier {
    #[default]
    Standard,
    Elevated,
}

impl KeyTier {
    pub fn minute_budget(&self) -> u32 {
        match self {
            KeyTier::Standard => 10,
            KeyTier::Elevated => 1000,
        }
    }

    pub fn day_budget(&self) -> u32 {
        match self {
            KeyTier::Standard => 250,
            KeyTier::Elevated => 10_000,
        }
    }

    /// Cooldown after the `failures`-th consecutive rate limit (1-based).
    pub fn rate_limit_backoff(&self, failures: u32) -> Duration {
        let table = match self {
            KeyTier::Standard => &STANDARD_BACKOFF,
            KeyTier::Elevated => &ELEVATED_BACKOFF,
        };
        let idx = (failures.max(1) as usize - 1).min(table.len() - 1);
        table[idx]
    }
}

#[derive(Debug, Clone)]
pub struct KeyConfig {
    pub credential: Credential,
    pub tier: KeyTier,
}

impl KeyConfig {
    pub fn new(credential: impl Into<Credential>, tier: KeyTier) -> Self {
        Self {
            credential: credential.into(),
            tier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyPoolConfig {
    /// Floor for a single wait so an almost-ready key cannot cause a tight loop.
    pub min_wait: Duration,
    /// Ceiling for one `acquire()` call.
    pub max_total_wait: Duration,
    /// Cooldown for auth, bad-request and server-error failures.
    pub failure_cooldown: Duration,
}

impl Default for KeyPoolConfig {
    fn default() -> Self {
        Self {
            min_wait: Duration::from_secs(1),
            max_total_wait: Duration::from_secs(10 * 60),
            failure_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyPoolError {
    #[error("no generation keys configured")]
    NoKeysConfigured,

    #[error("no generation key became available within {waited:?}")]
    NoKeyAvailable { waited: Duration },
}

/// Identifies a key across `acquire`/`report`. Reports against a key from
/// before the last reset are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyId {
    index: usize,
    generation: u64,
}

/// A key handed out by `acquire()`. Its budget has already been charged.
#[derive(Debug, Clone)]
pub struct KeyLease {
    pub id: KeyId,
    pub credential: Credential,
    pub label: String,
    pub tier: KeyTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Success,
    RateLimited,
    /// Auth, bad request or provider-side error.
    RequestFailed,
    /// Not the key's fault (e.g. a timeout). Leaves the key untouched.
    Neutral,
}

/// Point-in-time view of one key, safe to expose.
#[derive(Debug, Clone, Serialize)]
pub struct KeySnapshot {
    pub label: String,
    pub tier: KeyTier,
    pub minute_used: u32,
    pub minute_budget: u32,
    pub day_used: u32,
    pub day_budget: u32,
    pub cooldown_secs: Option<u64>,
    pub consecutive_failures: u32,
    pub dead: bool,
}

struct KeyState {
    credential: Credential,
    label: String,
    tier: KeyTier,
    minute_budget: u32,
    minute_used: u32,
    minute_start: Instant,
    day_budget: u32,
    day_used: u32,
    day_start: Instant,
    cooldown_until: Option<Instant>,
    consecutive_failures: u32,
    dead: bool,
}

impl KeyState {
    fn new(config: KeyConfig, position: usize, now: Instant) -> Self {
        let dead = !config.credential.is_well_formed();
        Self {
            label: format!("#{} {}", position + 1, config.credential.masked()),
            credential: config.credential,
            tier: config.tier,
            minute_budget: config.tier.minute_budget(),
            minute_used: 0,
            minute_start: now,
            day_budget: config.tier.day_budget(),
            day_used: 0,
            day_start: now,
            cooldown_until: None,
            consecutive_failures: 0,
            dead,
        }
    }

    fn roll_windows(&mut self, now: Instant) {
        if now.saturating_duration_since(self.minute_start) >= MINUTE {
            self.minute_start = now;
            self.minute_used = 0;
        }
        if now.saturating_duration_since(self.day_start) >= DAY {
            self.day_start = now;
            self.day_used = 0;
        }
    }

    /// `None` when the key can serve a request right now, otherwise how long
    /// until it can.
    fn wait_time(&mut self, now: Instant) -> Option<Duration> {
        if let Some(until) = self.cooldown_until {
            if until > now {
                return Some(until - now);
            }
            self.cooldown_until = None;
        }

        self.roll_windows(now);

        if self.day_used >= self.day_budget {
            let until = self.day_start + DAY;
            self.cooldown_until = Some(until);
            return Some(until.saturating_duration_since(now));
        }
        if self.minute_used >= self.minute_budget {
            return Some((self.minute_start + MINUTE).saturating_duration_since(now));
        }
        None
    }
}

#[derive(Default)]
struct PoolState {
    keys: Vec<KeyState>,
    next_index: usize,
    generation: u64,
}

enum Selection {
    Acquired(KeyLease),
    Wait(Duration),
    Unusable,
}

pub struct KeyPool {
    state: Mutex<PoolState>,
    config: KeyPoolConfig,
}

impl KeyPool {
    pub fn new(keys: Vec<KeyConfig>) -> Self {
        Self::with_config(keys, KeyPoolConfig::default())
    }

    pub fn with_config(keys: Vec<KeyConfig>, config: KeyPoolConfig) -> Self {
        let pool = Self {
            state: Mutex::new(PoolState::default()),
            config,
        };
        pool.reset(keys);
        pool
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace every key, dropping usage counters and cooldowns. Duplicate
    /// credentials keep their first occurrence.
    pub fn reset(&self, keys: Vec<KeyConfig>) {
        let now = Instant::now();
        let mut seen = HashSet::new();
        let keys: Vec<KeyState> = keys
            .into_iter()
            .filter(|k| seen.insert(k.credential.expose().to_string()))
            .enumerate()
            .map(|(position, config)| KeyState::new(config, position, now))
            .collect();

        let dead = keys.iter().filter(|k| k.dead).count();
        if dead > 0 {
            warn!(dead, "Malformed generation keys loaded as unusable");
        }

        let mut state = self.state();
        state.generation += 1;
        state.next_index = 0;
        state.keys = keys;
        info!(keys = state.keys.len(), "Key pool initialised");
    }

    pub fn key_count(&self) -> usize {
        self.state().keys.len()
    }

    fn select(&self) -> Selection {
        let now = Instant::now();
        let mut guard = self.state();
        let state = &mut *guard;
        let count = state.keys.len();
        let start = state.next_index;
        let mut min_wait: Option<Duration> = None;

        for offset in 0..count {
            let index = (start + offset) % count;
            let key = &mut state.keys[index];
            if key.dead {
                continue;
            }
            if let Some(wait) = key.wait_time(now) {
                min_wait = Some(min_wait.map_or(wait, |m| m.min(wait)));
                continue;
            }

            key.minute_used += 1;
            key.day_used += 1;
            let lease = KeyLease {
                id: KeyId {
                    index,
                    generation: state.generation,
                },
                credential: key.credential.clone(),
                label: key.label.clone(),
                tier: key.tier,
            };
            state.next_index = (index + 1) % count;
            return Selection::Acquired(lease);
        }

        match min_wait {
            Some(wait) => Selection::Wait(wait),
            None => Selection::Unusable,
        }
    }

    /// Return a key with remaining budget, waiting for one to recover if
    /// necessary. Fails immediately when no usable key is configured and
    /// after `max_total_wait` when every key stays exhausted.
    pub async fn acquire(&self) -> Result<KeyLease, KeyPoolError> {
        let started = Instant::now();
        loop {
            let wait = match self.select() {
                Selection::Acquired(lease) => return Ok(lease),
                Selection::Unusable => return Err(KeyPoolError::NoKeysConfigured),
                Selection::Wait(wait) => wait,
            };

            let waited = started.elapsed();
            if waited >= self.config.max_total_wait {
                warn!(?waited, "No generation key became available");
                return Err(KeyPoolError::NoKeyAvailable { waited });
            }

            let wait = wait
                .max(self.config.min_wait)
                .min(self.config.max_total_wait - waited);
            debug!(?wait, "All generation keys exhausted, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    pub fn report(&self, id: KeyId, outcome: KeyOutcome) {
        let now = Instant::now();
        let failure_cooldown = self.config.failure_cooldown;
        let mut state = self.state();
        if state.generation != id.generation {
            return;
        }
        let Some(key) = state.keys.get_mut(id.index) else {
            return;
        };

        match outcome {
            KeyOutcome::Success => key.consecutive_failures = 0,
            KeyOutcome::RateLimited => {
                key.consecutive_failures += 1;
                let backoff = key.tier.rate_limit_backoff(key.consecutive_failures);
                key.cooldown_until = Some(now + backoff);
                warn!(
                    key = %key.label,
                    failures = key.consecutive_failures,
                    ?backoff,
                    "Generation key rate limited"
                );
            }
            KeyOutcome::RequestFailed => {
                key.consecutive_failures += 1;
                key.cooldown_until = Some(now + failure_cooldown);
                warn!(key = %key.label, cooldown = ?failure_cooldown, "Generation key cooling down after failure");
            }
            KeyOutcome::Neutral => {}
        }
    }

    pub fn snapshot(&self) -> Vec<KeySnapshot> {
        let now = Instant::now();
        let mut state = self.state();
        state
            .keys
            .iter_mut()
            .map(|key| {
                key.roll_windows(now);
                KeySnapshot {
                    label: key.label.clone(),
                    tier: key.tier,
                    minute_used: key.minute_used,
                    minute_budget: key.minute_budget,
                    day_used: key.day_used,
                    day_budget: key.day_budget,
                    cooldown_secs: key
                        .cooldown_until
                        .filter(|until| *until > now)
                        .map(|until| (until - now).as_secs()),
                    consecutive_failures: key.consecutive_failures,
                    dead: key.dead,
                }
            })
            .collect()
    }
}

/// Parse the `gemini_api_keys` setting: either a JSON array of
/// `{"key": "...", "tier": "standard|elevated"}` or a comma-separated list of
/// standard keys.
pub fn parse_key_setting(raw: &str) -> Vec<KeyConfig> {
    #[derive(Deserialize)]
    struct Entry {
        key: String,
        #[serde(default)]
        tier: KeyTier,
    }

    let raw = raw.trim();
    if raw.starts_with('[') {
        match serde_json::from_str::<Vec<Entry>>(raw) {
            Ok(entries) => {
                return entries
                    .into_iter()
                    .filter(|e| !e.key.trim().is_empty())
                    .map(|e| KeyConfig::new(e.key.trim(), e.tier))
                    .collect()
            }
            Err(e) => warn!(error = %e, "Key setting is not valid JSON, reading as a list"),
        }
    }
    parse_key_list(raw, KeyTier::Standard)
}

/// Comma-separated keys, blanks dropped.
pub fn parse_key_list(raw: &str, tier: KeyTier) -> Vec<KeyConfig> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty() && !k.starts_with('['))
        .map(|k| KeyConfig::new(k, tier))
        .collect()
}
