//! Crawl jobs domain - discovery, chunked rewriting and repair of serialized works.

pub mod actions;
pub mod alerts;
pub mod error;
pub mod models;
pub mod planner;
pub mod prompts;
pub mod reply;
pub mod settings;
pub mod store;
pub mod tags;

pub use error::{ChunkError, ControlError, ControlResult};
pub use models::*;
