//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.
//! It respects robots.txt directives when crawling websites.

mod cache;
mod parser;

pub use cache::RobotsCache;
pub use parser::ParsedRobots;

use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Fetches robots.txt for a domain
///
/// Never fails: a non-2xx response, a network error or an unreadable body
/// all yield [`ParsedRobots::allow_all`].
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `scheme` - `http` or `https`, taken from the URL being checked
/// * `domain` - Host, with port if non-default
/// * `timeout` - Request timeout
pub async fn fetch_robots(
    client: &Client,
    scheme: &str,
    domain: &str,
    timeout: Duration,
) -> ParsedRobots {
    let robots_url = format!("{}://{}/robots.txt", scheme, domain);

    let response = match client.get(&robots_url).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!("robots.txt unreachable for {}: {}", domain, e);
            return ParsedRobots::allow_all();
        }
    };

    if !response.status().is_success() {
        debug!(
            "robots.txt for {} returned {}, allowing all",
            domain,
            response.status()
        );
        return ParsedRobots::allow_all();
    }

    match response.text().await {
        Ok(body) => {
            debug!("Loaded robots.txt for {} ({} bytes)", domain, body.len());
            ParsedRobots::from_content(&body)
        }
        Err(e) => {
            debug!("Failed to read robots.txt body for {}: {}", domain, e);
            ParsedRobots::allow_all()
        }
    }
}
