// Main entry point for the crawl pipeline server

use std::sync::Arc;

use anyhow::{Context, Result};
use digest_core::domains::crawl_jobs::actions::CrawlTaskHandler;
use digest_core::domains::crawl_jobs::settings;
use digest_core::domains::crawl_jobs::store::{CrawlStore, PostgresCrawlStore};
use digest_core::domains::crawl_jobs::tags::StoreTagHandler;
use digest_core::kernel::{
    start_scheduler, BaseNotifier, GeminiProvider, GenerationClient, HttpSourceFetcher, KeyPool,
    LiveLogHub, LogNotifier, ProcessingScheduler, RunQueue, RunWorker, ServerDeps,
    TelegramNotifier,
};
use digest_core::server::{build_app, AxumAppState};
use digest_core::{Config, PipelineConfig, SchedulerConfig};
use gemini_client::GeminiClient;
use sqlx::postgres::PgPoolOptions;
use telegram::{TelegramOptions, TelegramService};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Telegram credentials from settings, falling back to the environment.
async fn build_notifier(
    store: Arc<dyn CrawlStore>,
    config: &Config,
) -> Result<Arc<dyn BaseNotifier>> {
    let bot_token = store
        .get_setting(settings::TELEGRAM_BOT_TOKEN)
        .await?
        .filter(|v| !v.is_empty())
        .or_else(|| config.telegram_bot_token.clone());
    let chat_id = store
        .get_setting(settings::TELEGRAM_CHAT_ID)
        .await?
        .filter(|v| !v.is_empty())
        .or_else(|| config.telegram_chat_id.clone());

    match (bot_token, chat_id) {
        (Some(bot_token), Some(chat_id)) => {
            tracing::info!("Telegram alerts configured");
            let service = TelegramService::new(TelegramOptions { bot_token, chat_id });
            Ok(Arc::new(TelegramNotifier::new(service, store)))
        }
        _ => {
            tracing::warn!("Telegram not configured, alerts will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,digest_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting crawl pipeline server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let store: Arc<dyn CrawlStore> = Arc::new(PostgresCrawlStore::new(pool.clone()));

    // Generation keys: settings table first, environment as fallback
    let env_keys = config.env_keys();
    let keys = settings::load_keys(store.as_ref(), &env_keys).await?;
    let key_pool = Arc::new(KeyPool::new(keys));
    if key_pool.key_count() == 0 {
        tracing::warn!("No generation keys configured; processing runs will be rejected");
    } else {
        tracing::info!(keys = key_pool.key_count(), "Generation key pool ready");
    }

    let gemini = GeminiClient::with_timeout(config.generation_timeout)
        .context("Failed to create Gemini client")?;
    let generation = Arc::new(GenerationClient::new(
        key_pool,
        Arc::new(GeminiProvider::new(gemini, config.gemini_model.clone())),
        config.generation_timeout,
    ));

    let fetcher = Arc::new(
        HttpSourceFetcher::new(config.fetch_timeout)
            .context("Failed to create source fetcher")?
            .with_max_listing_pages(config.max_listing_pages),
    );
    let notifier = build_notifier(store.clone(), &config).await?;
    let live_log = LiveLogHub::new();
    let (run_queue, run_receiver) = RunQueue::new(64);

    let deps = ServerDeps::new(
        store.clone(),
        generation,
        fetcher,
        notifier,
        Arc::new(StoreTagHandler::new(store.clone())),
        Arc::new(live_log.clone()),
        run_queue,
        env_keys,
        PipelineConfig::default(),
    );

    // Background run worker
    let shutdown = CancellationToken::new();
    let worker = RunWorker::new(
        run_receiver,
        Arc::new(CrawlTaskHandler::new(deps.clone())),
        Arc::new(live_log.clone()),
    );
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    // Scheduled tasks
    let scheduler = Arc::new(ProcessingScheduler::new(
        deps.clone(),
        SchedulerConfig::default(),
    ));
    let mut cron = start_scheduler(scheduler.clone(), &config)
        .await
        .context("Failed to start scheduled tasks")?;

    // Build application
    let app = build_app(AxumAppState {
        deps,
        scheduler,
        live_log,
        db_pool: Some(pool),
    });

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = cron.shutdown().await {
        tracing::warn!("Scheduler shutdown failed: {}", e);
    }
    if let Err(e) = worker_handle.await {
        tracing::warn!("Run worker ended abnormally: {}", e);
    }

    Ok(())
}
