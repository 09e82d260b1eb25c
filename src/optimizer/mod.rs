//! Content optimization before storage
//!
//! The optimizer is a pure function of its input bytes and configuration:
//! identical inputs always produce identical outputs, which keeps content
//! addresses stable. Failures never escape it; they come back as the
//! original bytes plus a `soft_failure` note for the record.

mod minify;
mod raster;

pub use minify::{minify_css, minify_html, minify_js, minify_svg};
pub use raster::optimize_image;

use crate::config::CrawlConfig;
use crate::state::ResourceKind;
use thiserror::Error;

/// Why an optimization fell back to the original bytes
#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("Image codec error: {0}")]
    Image(#[from] ::image::ImageError),

    #[error("Content is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("Minification failed: {0}")]
    Minify(String),
}

/// Output of the optimizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Optimized {
    /// Bytes to store
    pub bytes: Vec<u8>,

    /// Replacement content type when the format changed (e.g. PNG to JPEG)
    pub content_type: Option<String>,

    /// Set when optimization failed and `bytes` are the original input
    pub soft_failure: Option<String>,
}

impl Optimized {
    /// The input, untouched
    pub fn unchanged(bytes: &[u8], soft_failure: Option<String>) -> Self {
        Self {
            bytes: bytes.to_vec(),
            content_type: None,
            soft_failure,
        }
    }

    fn text(text: String) -> Self {
        Self {
            bytes: text.into_bytes(),
            content_type: None,
            soft_failure: None,
        }
    }
}

/// Per-run optimizer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Optimizer {
    image_quality: u32,
    max_image_width: u32,
}

impl Optimizer {
    pub fn new(image_quality: u32, max_image_width: u32) -> Self {
        Self {
            image_quality,
            max_image_width,
        }
    }

    pub fn from_config(config: &CrawlConfig) -> Self {
        Self::new(config.image_quality, config.max_image_width)
    }

    /// Optimizes one fetched resource
    ///
    /// # Arguments
    ///
    /// * `bytes` - Raw response body
    /// * `kind` - Final classification of the resource
    /// * `content_type` - Declared content type, used to spot SVG
    pub fn optimize(&self, bytes: &[u8], kind: ResourceKind, content_type: Option<&str>) -> Optimized {
        let result = match kind {
            ResourceKind::Page => text_pass(bytes, minify_html),
            ResourceKind::Css => text_pass(bytes, minify_css),
            ResourceKind::Js => text_pass(bytes, minify_js),
            ResourceKind::Image if is_svg(bytes, content_type) => text_pass(bytes, minify_svg),
            ResourceKind::Image => optimize_image(bytes, self.image_quality, self.max_image_width),
            ResourceKind::Other => return Optimized::unchanged(bytes, None),
        };

        match result {
            Ok(optimized) => optimized,
            Err(e) => {
                tracing::debug!("Optimization of {} resource fell back to original: {}", kind, e);
                Optimized::unchanged(bytes, Some(e.to_string()))
            }
        }
    }
}

fn text_pass(
    bytes: &[u8],
    minify: fn(&str) -> Result<String, OptimizeError>,
) -> Result<Optimized, OptimizeError> {
    let text = std::str::from_utf8(bytes)?;
    minify(text).map(Optimized::text)
}

fn is_svg(bytes: &[u8], content_type: Option<&str>) -> bool {
    if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("svg")) {
        return true;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
    let head = head.trim_start();
    head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))
}
