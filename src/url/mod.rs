//! URL handling module for Sumi-Scroll
//!
//! This module provides URL normalization (the crawl's dedup key) and
//! domain extraction (the key for politeness and per-domain budgets).

mod domain;
mod normalize;

// Re-export main functions
pub use domain::extract_domain;
pub use normalize::normalize_url;
