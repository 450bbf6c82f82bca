// Common test utilities

pub mod harness;
pub mod pipeline;

pub use harness::*;
pub use pipeline::*;
