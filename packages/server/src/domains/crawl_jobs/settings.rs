//! Operator settings stored in `system_settings`.
//!
//! Boolean flags are on only when the stored value is exactly `"true"`.

use anyhow::Result;

use super::store::CrawlStore;
use crate::kernel::key_pool::{parse_key_setting, KeyConfig};
use crate::kernel::AlertKind;

pub const AUTO_MODE_ENABLED: &str = "crawl_auto_mode_enabled";
pub const GEMINI_API_KEYS: &str = "gemini_api_keys";
pub const TELEGRAM_BOT_TOKEN: &str = "telegram_bot_token";
pub const TELEGRAM_CHAT_ID: &str = "telegram_chat_id";
pub const TELEGRAM_ALERTS_ENABLED: &str = "telegram_alerts_enabled";

pub fn alert_flag_key(kind: AlertKind) -> String {
    format!("telegram_alert_on_{}", kind.as_str())
}

pub async fn flag_enabled(store: &dyn CrawlStore, key: &str) -> Result<bool> {
    Ok(store.get_setting(key).await?.as_deref() == Some("true"))
}

/// Global switch for the periodic processing tick.
pub async fn auto_mode_enabled(store: &dyn CrawlStore) -> Result<bool> {
    flag_enabled(store, AUTO_MODE_ENABLED).await
}

/// Alerts of `kind` go out only when both the global and the per-kind flag are on.
pub async fn alert_enabled(store: &dyn CrawlStore, kind: AlertKind) -> Result<bool> {
    Ok(flag_enabled(store, TELEGRAM_ALERTS_ENABLED).await?
        && flag_enabled(store, &alert_flag_key(kind)).await?)
}

/// Keys from settings first, then the environment. Deduplication happens in
/// the pool.
pub async fn load_keys(store: &dyn CrawlStore, env_keys: &[KeyConfig]) -> Result<Vec<KeyConfig>> {
    let mut keys = store
        .get_setting(GEMINI_API_KEYS)
        .await?
        .map(|raw| parse_key_setting(&raw))
        .unwrap_or_default();
    keys.extend(env_keys.iter().cloned());
    Ok(keys)
}
