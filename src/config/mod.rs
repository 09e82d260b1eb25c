//! Configuration module for Sumi-Scroll
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_scroll::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Crawl starts at: {}", config.crawl.start_url);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, FetchConfig, OutputConfig, ServiceConfig, UserAgentConfig,
};

// Re-export parser and validation functions
pub use parser::{
    compute_config_hash, compute_crawl_config_hash, load_config, load_config_with_hash,
    parse_config,
};
pub use validation::validate_crawl_config;
