use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Sumi-Scroll
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawl: CrawlConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Config {
    /// Splits off the process-level settings that outlive a single run
    pub fn service(&self) -> ServiceConfig {
        ServiceConfig {
            user_agent: self.user_agent.clone(),
            output: self.output.clone(),
            fetch: self.fetch.clone(),
        }
    }
}

/// Everything the run controller needs besides the per-run crawl settings
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    pub fetch: FetchConfig,
}

/// Per-run crawl settings
///
/// A snapshot of this struct is stored with every run and serialized into the
/// run's archive metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// URL the crawl starts from
    #[serde(rename = "start-url")]
    pub start_url: String,

    /// Maximum link depth from the start URL
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of pages admitted for the whole run
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,

    /// Maximum number of pages admitted per domain
    #[serde(rename = "max-pages-per-domain", default = "default_max_pages_per_domain")]
    pub max_pages_per_domain: u32,

    /// Number of concurrent fetch workers
    #[serde(rename = "max-workers", default = "default_max_workers")]
    pub max_workers: u32,

    /// Minimum time between requests to the same domain (seconds)
    #[serde(rename = "request-delay", default = "default_request_delay")]
    pub request_delay: f64,

    #[serde(rename = "respect-robots-txt", default = "default_true")]
    pub respect_robots_txt: bool,

    /// Only follow hyperlinks; never fetch stylesheets, scripts or images
    #[serde(rename = "skip-assets", default)]
    pub skip_assets: bool,

    /// JPEG quality used when re-encoding images (1-100)
    #[serde(rename = "image-quality", default = "default_image_quality")]
    pub image_quality: u32,

    /// Images wider than this are downscaled (pixels)
    #[serde(rename = "max-image-width", default = "default_max_image_width")]
    pub max_image_width: u32,

    /// Zstandard level used for the run archive (1-22)
    #[serde(rename = "compression-level", default = "default_compression_level")]
    pub compression_level: i32,
}

impl CrawlConfig {
    /// Creates a crawl configuration with default limits for the given start URL
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            max_pages_per_domain: default_max_pages_per_domain(),
            max_workers: default_max_workers(),
            request_delay: default_request_delay(),
            respect_robots_txt: true,
            skip_assets: false,
            image_quality: default_image_quality(),
            max_image_width: default_max_image_width(),
            compression_level: default_compression_level(),
        }
    }

    /// Configured politeness delay as a `Duration`
    ///
    /// Negative or non-finite values (rejected by validation) map to zero.
    pub fn request_delay_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_delay).unwrap_or(Duration::ZERO)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler, also the token matched against robots.txt groups
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "SumiScroll".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        }
    }
}

impl UserAgentConfig {
    /// Full user agent header value
    ///
    /// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output locations
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Working directory: run index database plus per-run object stores
    #[serde(rename = "data-dir")]
    pub data_dir: String,

    /// Directory the finished `.tar.zst` archives are written to
    #[serde(rename = "archive-dir")]
    pub archive_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: "./scraped_data".to_string(),
            archive_dir: "./archives".to_string(),
        }
    }
}

impl OutputConfig {
    /// Path of the SQLite run index
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("index.db")
    }

    /// Directory holding the object store of a single run
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        PathBuf::from(&self.data_dir).join("runs").join(run_id)
    }

    /// Path of the archive for a run
    pub fn archive_path(&self, run_id: &str) -> PathBuf {
        PathBuf::from(&self.archive_dir).join(format!("{}.tar.zst", run_id))
    }
}

/// HTTP fetch behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Timeout for robots.txt requests, kept short so a slow host cannot stall workers
    #[serde(rename = "robots-timeout-secs", default = "default_robots_timeout_secs")]
    pub robots_timeout_secs: u64,

    /// Retries after the first attempt for transient failures
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff between retries (milliseconds)
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Responses with a larger body are recorded as failed
    #[serde(rename = "max-body-bytes", default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            robots_timeout_secs: default_robots_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_pages() -> u32 {
    100
}

fn default_max_pages_per_domain() -> u32 {
    50
}

fn default_max_workers() -> u32 {
    10
}

fn default_request_delay() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_image_quality() -> u32 {
    85
}

fn default_max_image_width() -> u32 {
    1920
}

fn default_compression_level() -> i32 {
    19
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_robots_timeout_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_max_body_bytes() -> u64 {
    10 * 1024 * 1024
}
