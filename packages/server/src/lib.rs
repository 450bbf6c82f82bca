// Serialized-work digest pipeline - API Core
//
// Crawls chapter listings, merges consecutive chapters into chunks, rewrites
// each chunk through a rate-limited generation key pool and stores the
// merged outputs.
//
// Pipeline actions live in domains/crawl_jobs/actions; infrastructure seams
// in kernel/.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
