// Business domains
pub mod crawl_jobs;
