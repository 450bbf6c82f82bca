//! In-memory pipeline fixture: mock collaborators, the memory store and a
//! synchronous drain of the run queue.

use std::sync::Arc;

use digest_core::domains::crawl_jobs::actions::{self, CrawlTaskHandler, InitJobRequest};
use digest_core::domains::crawl_jobs::models::{Job, JobId, Unit};
use digest_core::domains::crawl_jobs::store::{CrawlStore, MemoryCrawlStore};
use digest_core::kernel::run_queue::{RunTask, RunTaskHandler};
use digest_core::kernel::{ServerDeps, TestDependencies};
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct Pipeline {
    pub store: Arc<MemoryCrawlStore>,
    pub deps: ServerDeps,
    pub mocks: TestDependencies,
    runs: mpsc::Receiver<RunTask>,
}

impl Pipeline {
    pub fn new(mocks: TestDependencies) -> Self {
        let store = Arc::new(MemoryCrawlStore::new());
        let (deps, runs) = mocks.clone().into_server_deps(store.clone());
        Self {
            store,
            deps,
            mocks,
            runs,
        }
    }

    /// Execute queued run tasks, including any they queue, until none are left.
    pub async fn drain(&mut self) -> Vec<anyhow::Result<()>> {
        let handler = CrawlTaskHandler::new(self.deps.clone());
        let mut results = Vec::new();
        while let Ok(task) = self.runs.try_recv() {
            results.push(handler.execute(task).await);
        }
        results
    }

    /// Create a job for a fresh work and run its discovery.
    pub async fn discovered_job(&mut self, merge_size: i32) -> Job {
        self.discovered_job_with(InitJobRequest {
            work_id: Uuid::new_v4(),
            source_url: "https://source.test/tien-nghich/".to_string(),
            title: Some("Tiên Nghịch".to_string()),
            merge_size: Some(merge_size),
            start: None,
            end: None,
            auto_mode: false,
        })
        .await
    }

    pub async fn discovered_job_with(&mut self, request: InitJobRequest) -> Job {
        let job = actions::init_job(request, &self.deps)
            .await
            .expect("init_job");
        for result in self.drain().await {
            result.expect("discovery");
        }
        self.job(job.id).await
    }

    pub async fn job(&self, id: JobId) -> Job {
        self.store.get_job(id).await.unwrap().expect("job exists")
    }

    pub async fn units(&self, id: JobId) -> Vec<Unit> {
        self.store.list_units(id).await.unwrap()
    }

    pub async fn unit(&self, id: JobId, ordinal: i32) -> Unit {
        self.units(id)
            .await
            .into_iter()
            .find(|u| u.ordinal == ordinal)
            .expect("unit exists")
    }

    /// Queue a batch and run it to completion.
    pub async fn run_batch(&mut self, id: JobId, chunk_count: i32) -> Job {
        actions::process_batch(id, chunk_count, None, &self.deps)
            .await
            .expect("process_batch");
        for result in self.drain().await {
            result.expect("run");
        }
        self.job(id).await
    }
}
