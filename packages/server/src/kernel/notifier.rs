//! Operator alert channels.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use telegram::TelegramService;
use tracing::{debug, info};

use super::traits::{AlertKind, BaseNotifier};
use crate::domains::crawl_jobs::settings;
use crate::domains::crawl_jobs::store::CrawlStore;

fn headline(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::Error => "❌ *Auto-Crawl Alert*",
        AlertKind::Complete => "✅ *Auto-Crawl Alert*",
        AlertKind::Progress => "📊 *Auto-Crawl Alert*",
    }
}

/// Sends Markdown alerts to a Telegram chat, gated by the alert settings.
pub struct TelegramNotifier {
    service: TelegramService,
    store: Arc<dyn CrawlStore>,
}

impl TelegramNotifier {
    pub fn new(service: TelegramService, store: Arc<dyn CrawlStore>) -> Self {
        Self { service, store }
    }
}

#[async_trait]
impl BaseNotifier for TelegramNotifier {
    async fn send_alert(&self, kind: AlertKind, message: &str) -> Result<()> {
        if !settings::alert_enabled(self.store.as_ref(), kind).await? {
            debug!(kind = kind.as_str(), "Telegram alert suppressed by settings");
            return Ok(());
        }

        let text = format!("{}\n\n{}", headline(kind), message);
        self.service
            .send_markdown(&text)
            .await
            .map_err(|e| anyhow!("Telegram alert failed: {}", e))?;

        info!(kind = kind.as_str(), "Telegram alert sent");
        Ok(())
    }
}

/// Fallback when no bot is configured: alerts only reach the log.
pub struct LogNotifier;

#[async_trait]
impl BaseNotifier for LogNotifier {
    async fn send_alert(&self, kind: AlertKind, message: &str) -> Result<()> {
        info!(kind = kind.as_str(), "[Telegram disabled] {}", message);
        Ok(())
    }
}
