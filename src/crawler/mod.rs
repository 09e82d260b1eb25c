//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - The frontier: FIFO queue, visited set and page budgets
//! - Per-domain request pacing
//! - HTTP fetching with retry logic
//! - HTML and stylesheet link extraction
//! - The worker pool and overall run coordination

mod coordinator;
mod extractor;
mod fetcher;
mod frontier;
mod throttle;
mod worker;

pub use coordinator::{run_crawl, Coordinator, RunOutcome};
pub use extractor::{extract, extract_css_urls, extract_stylesheet, Extracted, ExtractedDocument};
pub use fetcher::{build_http_client, build_robots_client, FetchResult, Fetcher};
pub use frontier::{Admission, Frontier, FrontierEntry, FrontierLimits, FrontierSnapshot, Lease};
pub use throttle::DomainThrottle;
pub use worker::{run_workers, WorkerContext};
