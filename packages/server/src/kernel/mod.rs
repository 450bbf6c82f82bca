//! Kernel module - server infrastructure and dependencies.

pub mod credential;
pub mod deps;
pub mod gemini;
pub mod generation;
pub mod key_pool;
pub mod live_log;
pub mod notifier;
pub mod run_queue;
pub mod scheduled_tasks;
pub mod source_fetcher;
pub mod test_dependencies;
pub mod traits;

pub use credential::Credential;
pub use deps::ServerDeps;
pub use gemini::GeminiProvider;
pub use generation::{GenerationClient, GenerationError};
pub use key_pool::{KeyConfig, KeyPool, KeyTier};
pub use live_log::{LiveLogHub, LogEntry};
pub use notifier::{LogNotifier, TelegramNotifier};
pub use run_queue::{RunQueue, RunTask, RunWorker};
pub use scheduled_tasks::{start_scheduler, ProcessingScheduler};
pub use source_fetcher::HttpSourceFetcher;
pub use test_dependencies::TestDependencies;
pub use traits::*;
