//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - GET requests returning raw bytes, capped at a maximum body size
//! - Retry with exponential backoff for transient failures
//! - Error classification
//!
//! Page requests never follow redirects on their own: a 3xx comes back as
//! [`FetchResult::Redirect`] so the worker can check robots.txt and the
//! domain throttle before the next hop.

use crate::config::{FetchConfig, UserAgentConfig};
use reqwest::{redirect::Policy, Client, ClientBuilder, Response, StatusCode};
use std::time::Duration;
use url::Url;

/// Redirect hops followed when fetching robots.txt
const ROBOTS_MAX_REDIRECTS: usize = 5;

/// Result of a fetch operation
///
/// A failed fetch is a value rather than an `Err`: the caller records it
/// and the run continues.
#[derive(Debug)]
pub enum FetchResult {
    /// Successfully fetched the resource
    Success {
        /// URL the body was served from
        final_url: String,
        /// HTTP status code
        status_code: u16,
        /// Content-Type header value, if present
        content_type: Option<String>,
        /// Raw response body
        body: Vec<u8>,
        /// Number of attempts made, including the successful one
        attempts: u32,
    },

    /// The server answered with a redirect
    Redirect {
        /// `Location`, resolved against the requested URL
        location: Url,
        /// HTTP status code
        status_code: u16,
        /// Number of attempts made
        attempts: u32,
    },

    /// Gave up after retries, or hit a non-retryable error
    Failed {
        /// Error description
        error: String,
        /// HTTP status code, if a response was received
        status_code: Option<u16>,
        /// Number of attempts made
        attempts: u32,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::Redirect { attempts, .. }
            | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

fn client_builder(config: &UserAgentConfig, fetch: &FetchConfig) -> ClientBuilder {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(Duration::from_secs(fetch.timeout_secs))
        .connect_timeout(Duration::from_secs(fetch.connect_timeout_secs))
        .gzip(true)
        .brotli(true)
}

/// Builds the HTTP client used for page and asset requests
///
/// Redirects are not followed; see [`FetchResult::Redirect`].
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `fetch` - Timeouts for individual requests
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use sumi_scroll::config::{FetchConfig, UserAgentConfig};
/// use sumi_scroll::crawler::build_http_client;
///
/// let client = build_http_client(&UserAgentConfig::default(), &FetchConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    fetch: &FetchConfig,
) -> Result<Client, reqwest::Error> {
    client_builder(config, fetch).redirect(Policy::none()).build()
}

/// Builds the HTTP client used for robots.txt, which follows redirects
pub fn build_robots_client(
    config: &UserAgentConfig,
    fetch: &FetchConfig,
) -> Result<Client, reqwest::Error> {
    client_builder(config, fetch)
        .redirect(Policy::limited(ROBOTS_MAX_REDIRECTS))
        .build()
}

/// Outcome of a single attempt
enum Attempt {
    Done(FetchResult),
    Retry { error: String, status_code: Option<u16> },
}

/// Fetches URLs with bounded retries
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | 2xx | Success |
/// | 3xx with `Location` | Redirect, not followed |
/// | HTTP 5xx | Retry with backoff |
/// | Timeout | Retry with backoff |
/// | Connection error | Retry with backoff |
/// | Body read error | Retry with backoff |
/// | Body larger than `max_body_bytes` | Immediate failure |
/// | Other 3xx/4xx (including 429) | Immediate failure |
///
/// The backoff before attempt `n + 1` is `backoff_base * 2^(n - 1)`.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    max_retries: u32,
    backoff_base: Duration,
    max_body_bytes: u64,
}

impl Fetcher {
    pub fn new(client: Client, max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            client,
            max_retries,
            backoff_base,
            max_body_bytes: FetchConfig::default().max_body_bytes,
        }
    }

    pub fn from_config(client: Client, fetch: &FetchConfig) -> Self {
        Self::new(
            client,
            fetch.max_retries,
            Duration::from_millis(fetch.backoff_base_ms),
        )
        .with_max_body_bytes(fetch.max_body_bytes)
    }

    /// Caps the response body size; larger responses fail
    pub fn with_max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetches a URL, retrying transient failures
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to fetch
    ///
    /// # Returns
    ///
    /// A FetchResult indicating success, a redirect, or the final failure
    pub async fn fetch(&self, url: &str) -> FetchResult {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.attempt(url, attempt).await {
                Attempt::Done(result) => return result,
                Attempt::Retry { error, status_code } => {
                    if attempt >= max_attempts {
                        tracing::debug!("Giving up on {} after {} attempts: {}", url, attempt, error);
                        return FetchResult::Failed {
                            error,
                            status_code,
                            attempts: attempt,
                        };
                    }

                    let backoff = self.backoff(attempt);
                    tracing::debug!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempt,
                        url,
                        error,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }

    async fn attempt(&self, url: &str, attempt: u32) -> Attempt {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return classify_error(e, attempt),
        };

        let status = response.status();
        let final_url = response.url().to_string();

        if status.is_server_error() {
            return Attempt::Retry {
                error: format!("HTTP {}", status.as_u16()),
                status_code: Some(status.as_u16()),
            };
        }

        if status.is_redirection() {
            if let Some(location) = redirect_target(&response) {
                return Attempt::Done(FetchResult::Redirect {
                    location,
                    status_code: status.as_u16(),
                    attempts: attempt,
                });
            }
        }

        if !status.is_success() {
            let error = if status == StatusCode::TOO_MANY_REQUESTS {
                "Rate limited (HTTP 429)".to_string()
            } else {
                format!("HTTP {}", status.as_u16())
            };
            return Attempt::Done(FetchResult::Failed {
                error,
                status_code: Some(status.as_u16()),
                attempts: attempt,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match self.read_body(response).await {
            Ok(body) => Attempt::Done(FetchResult::Success {
                final_url,
                status_code: status.as_u16(),
                content_type,
                body,
                attempts: attempt,
            }),
            Err(BodyError::TooLarge) => Attempt::Done(FetchResult::Failed {
                error: format!("Body exceeds {} bytes", self.max_body_bytes),
                status_code: Some(status.as_u16()),
                attempts: attempt,
            }),
            Err(BodyError::Read(e)) => Attempt::Retry {
                error: format!("Failed to read body: {}", e),
                status_code: Some(status.as_u16()),
            },
        }
    }

    /// Reads the body chunk by chunk, stopping once it passes the cap
    async fn read_body(&self, mut response: Response) -> Result<Vec<u8>, BodyError> {
        if response.content_length().is_some_and(|len| len > self.max_body_bytes) {
            return Err(BodyError::TooLarge);
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(BodyError::Read)? {
            if (body.len() + chunk.len()) as u64 > self.max_body_bytes {
                return Err(BodyError::TooLarge);
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

enum BodyError {
    TooLarge,
    Read(reqwest::Error),
}

/// The absolute target of a redirect response
fn redirect_target(response: &Response) -> Option<Url> {
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)?
        .to_str()
        .ok()?;
    let target = response.url().join(location.trim()).ok()?;
    matches!(target.scheme(), "http" | "https").then_some(target)
}

fn classify_error(e: reqwest::Error, attempt: u32) -> Attempt {
    if e.is_timeout() {
        Attempt::Retry {
            error: "Request timeout".to_string(),
            status_code: None,
        }
    } else if e.is_connect() {
        Attempt::Retry {
            error: "Connection failed".to_string(),
            status_code: None,
        }
    } else if e.is_builder() {
        Attempt::Done(FetchResult::Failed {
            error: e.to_string(),
            status_code: None,
            attempts: attempt,
        })
    } else {
        Attempt::Retry {
            error: e.to_string(),
            status_code: None,
        }
    }
}
