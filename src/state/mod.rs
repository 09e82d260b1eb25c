//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `ResourceKind`: Classification of a fetched resource (page, css, js, image, other)
//! - `FetchOutcome`: Terminal outcome of a frontier entry (ok, failed, skipped)
//! - `RunState`: Lifecycle of the run controller
//! - `DomainState`: Per-domain politeness state used by the domain throttle

mod domain_state;
mod resource;
mod run_state;

// Re-export main types
pub use domain_state::DomainState;
pub use resource::{FetchOutcome, ResourceKind};
pub use run_state::RunState;
