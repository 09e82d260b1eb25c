//! Output module for run statistics and summaries
//!
//! This module handles:
//! - Recording crawl statistics while a run is active
//! - Deriving per-run breakdowns from the record index
//! - Generating the markdown summary packed into each archive

mod markdown;
pub mod stats;

pub use markdown::format_markdown_summary;
pub use stats::{load_breakdown, CompressionReport, RunBreakdown, Stats, StatsTracker};
