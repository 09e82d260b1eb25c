/// Classification and outcome types for stored records
///
/// Every artifact record carries a `ResourceKind` (what was fetched) and a
/// `FetchOutcome` (how the fetch ended).
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// What kind of resource a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// An HTML document reached through a hyperlink
    Page,
    Css,
    Js,
    Image,
    /// Anything else, including documents that could not be parsed
    Other,
}

impl ResourceKind {
    /// Returns true for HTML pages, the only kind that counts against page budgets
    pub fn is_page(&self) -> bool {
        matches!(self, Self::Page)
    }

    /// Determines the final classification of a fetched resource
    ///
    /// The declared content type wins when it is specific. Ambiguous types
    /// (`text/plain`, `application/octet-stream`, missing) fall back to the
    /// URL's file extension, and finally to the hint the resource was
    /// discovered with.
    ///
    /// # Arguments
    ///
    /// * `hint` - Kind assigned when the URL was discovered
    /// * `content_type` - Declared `Content-Type` header, if any
    /// * `url` - The fetched URL
    pub fn classify(hint: ResourceKind, content_type: Option<&str>, url: &Url) -> ResourceKind {
        content_type
            .and_then(Self::from_content_type)
            .or_else(|| Self::from_extension(url.path()))
            .unwrap_or(hint)
    }

    /// Maps a MIME type to a kind; `None` when the type says nothing useful
    pub fn from_content_type(content_type: &str) -> Option<ResourceKind> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "" | "text/plain" | "application/octet-stream" | "binary/octet-stream" => None,
            "text/html" | "application/xhtml+xml" => Some(Self::Page),
            "text/css" => Some(Self::Css),
            "application/javascript"
            | "text/javascript"
            | "application/x-javascript"
            | "application/ecmascript"
            | "text/ecmascript" => Some(Self::Js),
            m if m.starts_with("image/") => Some(Self::Image),
            _ => Some(Self::Other),
        }
    }

    /// Maps a URL path's file extension to a kind
    pub fn from_extension(path: &str) -> Option<ResourceKind> {
        let file_name = path.rsplit('/').next().unwrap_or("");
        let (_, ext) = file_name.rsplit_once('.')?;

        match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" | "xhtml" => Some(Self::Page),
            "css" => Some(Self::Css),
            "js" | "mjs" => Some(Self::Js),
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "svg" | "ico" | "avif" => {
                Some(Self::Image)
            }
            _ => None,
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Css => "css",
            Self::Js => "js",
            Self::Image => "image",
            Self::Other => "other",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "page" => Some(Self::Page),
            "css" => Some(Self::Css),
            "js" => Some(Self::Js),
            "image" => Some(Self::Image),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Terminal outcome of one frontier entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchOutcome {
    /// Fetched and stored; the record references an artifact
    Ok,
    /// Fetch or store failed after retries
    Failed,
    /// Never fetched (disallowed by robots.txt)
    Skipped,
}

impl FetchOutcome {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_content_type_wins() {
        let kind = ResourceKind::classify(
            ResourceKind::Image,
            Some("text/css; charset=utf-8"),
            &url("https://example.com/style"),
        );
        assert_eq!(kind, ResourceKind::Css);
    }

    #[test]
    fn test_ambiguous_content_type_uses_extension() {
        let kind = ResourceKind::classify(
            ResourceKind::Page,
            Some("application/octet-stream"),
            &url("https://example.com/logo.PNG"),
        );
        assert_eq!(kind, ResourceKind::Image);
    }

    #[test]
    fn test_falls_back_to_hint() {
        let kind = ResourceKind::classify(ResourceKind::Js, None, &url("https://example.com/app"));
        assert_eq!(kind, ResourceKind::Js);
    }

    #[test]
    fn test_unknown_specific_type_is_other() {
        let kind = ResourceKind::classify(
            ResourceKind::Page,
            Some("application/pdf"),
            &url("https://example.com/report"),
        );
        assert_eq!(kind, ResourceKind::Other);
    }

    #[test]
    fn test_javascript_variants() {
        for ct in ["application/javascript", "text/javascript", "application/x-javascript"] {
            assert_eq!(ResourceKind::from_content_type(ct), Some(ResourceKind::Js));
        }
    }

    #[test]
    fn test_extension_ignores_directories() {
        assert_eq!(ResourceKind::from_extension("/v1.2/page"), None);
        assert_eq!(ResourceKind::from_extension("/a/b/index.html"), Some(ResourceKind::Page));
    }

    #[test]
    fn test_only_pages_count_as_pages() {
        assert!(ResourceKind::Page.is_page());
        assert!(!ResourceKind::Css.is_page());
        assert!(!ResourceKind::Other.is_page());
    }

    #[test]
    fn test_db_strings() {
        assert_eq!(ResourceKind::from_db_string("image"), Some(ResourceKind::Image));
        assert_eq!(ResourceKind::from_db_string("bogus"), None);
        assert_eq!(FetchOutcome::from_db_string("skipped"), Some(FetchOutcome::Skipped));
        assert_eq!(FetchOutcome::Failed.to_string(), "failed");
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ResourceKind::Css).unwrap();
        assert_eq!(json, "\"css\"");
        let outcome: FetchOutcome = serde_json::from_str("\"ok\"").unwrap();
        assert_eq!(outcome, FetchOutcome::Ok);
    }
}
