//! Crawl pipeline models

pub mod job;
pub mod merged_output;
pub mod unit;

pub use job::*;
pub use merged_output::*;
pub use unit::*;
