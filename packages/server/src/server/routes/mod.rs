// HTTP routes
pub mod crawl;
pub mod health;
pub mod stream;

pub use health::*;
pub use stream::*;
