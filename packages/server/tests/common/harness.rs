//! Postgres harness for the store tests.
//!
//! One container is started for the whole run. Migrations are applied once
//! to a template database, and every test gets its own database cloned from
//! that template, so tests never see each other's jobs or settings.

use anyhow::{Context, Result};
use digest_core::domains::crawl_jobs::store::PostgresCrawlStore;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

const TEMPLATE_DB: &str = "crawl_template";

struct Container {
    /// Server address without a database name, e.g. `postgresql://u:p@host:port`.
    base_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static CONTAINER: OnceCell<Container> = OnceCell::const_new();

impl Container {
    fn url(&self, database: &str) -> String {
        format!("{}/{}", self.base_url, database)
    }

    async fn start() -> Result<Self> {
        // RUST_LOG=digest_core=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("starting postgres container")?;
        let base_url = format!(
            "postgresql://postgres:postgres@{}:{}",
            postgres.get_host().await?,
            postgres.get_host_port_ipv4(5432).await?
        );
        let container = Self {
            base_url,
            _postgres: postgres,
        };

        let admin = PgPool::connect(&container.url("postgres")).await?;
        admin
            .execute(format!("CREATE DATABASE {}", TEMPLATE_DB).as_str())
            .await
            .context("creating template database")?;
        admin.close().await;

        // The template must have no open sessions once tests start cloning it.
        let template = PgPool::connect(&container.url(TEMPLATE_DB)).await?;
        sqlx::migrate!("./migrations")
            .run(&template)
            .await
            .context("migrating template database")?;
        template.close().await;

        Ok(container)
    }

    async fn shared() -> &'static Self {
        CONTAINER
            .get_or_init(|| async { Self::start().await.expect("postgres test container") })
            .await
    }
}

/// A migrated, private database per test.
///
/// ```ignore
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let store = ctx.store();
/// }
/// ```
pub struct TestHarness {
    pub db_pool: PgPool,
    database: String,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("test database")
    }

    async fn teardown(self) {
        self.db_pool.close().await;
        let container = Container::shared().await;
        if let Ok(admin) = PgPool::connect(&container.url("postgres")).await {
            let _ = admin
                .execute(format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", self.database).as_str())
                .await;
            admin.close().await;
        }
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let container = Container::shared().await;
        let database = format!("crawl_test_{}", Uuid::new_v4().simple());

        let admin = PgPool::connect(&container.url("postgres")).await?;
        admin
            .execute(format!("CREATE DATABASE {} TEMPLATE {}", database, TEMPLATE_DB).as_str())
            .await
            .with_context(|| format!("cloning {}", TEMPLATE_DB))?;
        admin.close().await;

        let db_pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&container.url(&database))
            .await
            .with_context(|| format!("connecting to {}", database))?;

        Ok(Self { db_pool, database })
    }

    pub fn store(&self) -> PostgresCrawlStore {
        PostgresCrawlStore::new(self.db_pool.clone())
    }
}
