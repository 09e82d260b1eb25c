//! Reading finished archives
//!
//! Archives are zstd-compressed tar streams, so every lookup is a forward
//! scan. `open` reads the metadata and entry list once; artifact reads scan
//! again and stop at the first match.

use super::{ArchiveError, ArchiveResult, RunMetadata, METADATA_ENTRY, SUMMARY_ENTRY};
use crate::storage::{ContentHash, SqliteStorage, Storage};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// One entry of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
}

/// Read-only view of a run archive
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    path: PathBuf,
    metadata: RunMetadata,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveReader {
    /// Opens an archive and loads its metadata document
    pub fn open(path: impl AsRef<Path>) -> ArchiveResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut metadata = None;
        let mut entries = Vec::new();

        scan(&path, |name, size, data| {
            if name == METADATA_ENTRY {
                let mut buf = Vec::with_capacity(size as usize);
                data.read_to_end(&mut buf)?;
                metadata = Some(serde_json::from_slice::<RunMetadata>(&buf)?);
            }
            entries.push(ArchiveEntry { name, size });
            Ok(true)
        })?;

        let metadata = metadata.ok_or(ArchiveError::MissingMetadata)?;
        tracing::debug!(
            "Opened archive {} ({} entries, {} records)",
            path.display(),
            entries.len(),
            metadata.records.len()
        );

        Ok(Self {
            path,
            metadata,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.metadata.run_id
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Returns true if the archive holds an object for the hash
    pub fn contains(&self, hash: &ContentHash) -> bool {
        let name = hash.entry_name();
        self.entries.iter().any(|e| e.name == name)
    }

    /// Reads an artifact by content hash
    pub fn artifact(&self, hash: &ContentHash) -> ArchiveResult<Vec<u8>> {
        self.read_entry(&hash.entry_name())?
            .ok_or_else(|| ArchiveError::MissingArtifact(hash.to_string()))
    }

    /// Reads an artifact together with the content type recorded for it
    pub fn artifact_with_type(
        &self,
        hash: &ContentHash,
    ) -> ArchiveResult<(Vec<u8>, Option<String>)> {
        let content_type = self
            .metadata
            .record_for_hash(hash.as_str())
            .and_then(|r| r.content_type.clone());
        Ok((self.artifact(hash)?, content_type))
    }

    /// The archive's markdown summary
    pub fn summary(&self) -> ArchiveResult<String> {
        let bytes = self
            .read_entry(SUMMARY_ENTRY)?
            .ok_or_else(|| ArchiveError::MissingArtifact(SUMMARY_ENTRY.to_string()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Renders a stored HTML page for display
    ///
    /// A `<base>` tag is inserted right after `<head>` so relative references
    /// resolve against `base_href` (the page's own URL if `None`).
    pub fn preview(&self, url: &str, base_href: Option<&str>) -> ArchiveResult<String> {
        let record = self
            .metadata
            .record_for_url(url)
            .filter(|r| r.has_artifact() && r.is_html())
            .ok_or_else(|| ArchiveError::MissingArtifact(url.to_string()))?;
        let hash = record
            .content_hash
            .as_deref()
            .and_then(ContentHash::parse)
            .ok_or_else(|| ArchiveError::MissingArtifact(url.to_string()))?;

        let html = String::from_utf8_lossy(&self.artifact(&hash)?).into_owned();
        Ok(insert_base_tag(&html, base_href.unwrap_or(&record.url)))
    }

    /// Re-hashes every object and checks that each stored record has one
    ///
    /// # Returns
    ///
    /// The number of objects verified.
    pub fn verify(&self) -> ArchiveResult<usize> {
        let mut present = HashSet::new();

        scan(&self.path, |name, _, data| {
            if let Some(expected) = ContentHash::from_entry_name(&name) {
                let mut hasher = Sha256::new();
                io::copy(data, &mut hasher)?;
                let actual = hex::encode(hasher.finalize());
                if actual != expected.as_str() {
                    return Err(ArchiveError::HashMismatch {
                        entry: name,
                        actual,
                    });
                }
                present.insert(actual);
            }
            Ok(true)
        })?;

        for hash in self.metadata.artifact_hashes() {
            if !present.contains(&hash) {
                return Err(ArchiveError::MissingArtifact(hash));
            }
        }
        Ok(present.len())
    }

    /// Unpacks the archive into a directory
    pub fn extract_to(&self, dir: &Path) -> ArchiveResult<()> {
        fs::create_dir_all(dir)?;
        let decoder = zstd::Decoder::new(File::open(&self.path)?)?;
        tar::Archive::new(decoder).unpack(dir)?;
        Ok(())
    }

    /// Loads the run and its records into an in-memory index for querying
    pub fn index(&self) -> ArchiveResult<SqliteStorage> {
        let mut index = SqliteStorage::new_in_memory()?;
        let archive_path = self.path.to_string_lossy();
        index.import_run(&self.metadata.to_run_record(Some(&*archive_path)))?;
        for record in &self.metadata.records {
            index.append_record(record)?;
        }
        Ok(index)
    }

    fn read_entry(&self, wanted: &str) -> ArchiveResult<Option<Vec<u8>>> {
        let mut found = None;
        scan(&self.path, |name, size, data| {
            if name != wanted {
                return Ok(true);
            }
            let mut buf = Vec::with_capacity(size as usize);
            data.read_to_end(&mut buf)?;
            found = Some(buf);
            Ok(false)
        })?;
        Ok(found)
    }
}

/// Walks the entries of an archive in order
///
/// `visit` receives each entry's name, size and reader, and returns `false`
/// to stop early.
fn scan<F>(path: &Path, mut visit: F) -> ArchiveResult<()>
where
    F: FnMut(String, u64, &mut dyn Read) -> ArchiveResult<bool>,
{
    let decoder = zstd::Decoder::new(File::open(path)?)?;
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().replace('\\', "/");
        let size = entry.size();
        if !visit(name, size, &mut entry)? {
            break;
        }
    }
    Ok(())
}

/// Inserts `<base href>` after the opening `<head>` tag, or at the start
pub(crate) fn insert_base_tag(html: &str, href: &str) -> String {
    let tag = format!("<base href=\"{}\">", href.replace('"', "&quot;"));
    let lower = html.to_ascii_lowercase();

    let mut search = 0;
    while let Some(found) = lower[search..].find("<head") {
        let start = search + found;
        let after = start + "<head".len();
        match lower.as_bytes().get(after) {
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') => {
                if let Some(close) = lower[after..].find('>') {
                    let insert_at = after + close + 1;
                    return format!("{}{}{}", &html[..insert_at], tag, &html[insert_at..]);
                }
                break;
            }
            _ => search = after,
        }
    }

    format!("{}{}", tag, html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{build_archive, FORMAT_VERSION};
    use crate::config::CrawlConfig;
    use crate::output::Stats;
    use crate::state::{FetchOutcome, ResourceKind};
    use crate::storage::{ArtifactRecord, ContentStore, PageQuery, RunStatus};
    use tempfile::TempDir;

    fn record(url: &str, hash: &ContentHash, kind: ResourceKind, ct: &str) -> ArtifactRecord {
        ArtifactRecord {
            seq: 0,
            run_id: "r1".to_string(),
            url: url.to_string(),
            domain: "a.com".to_string(),
            depth: 0,
            content_hash: Some(hash.to_string()),
            size: 0,
            original_size: 0,
            content_type: Some(ct.to_string()),
            fetched_at: "2024-01-01T00:00:00.000Z".to_string(),
            kind,
            outcome: FetchOutcome::Ok,
            title: None,
            soft_failure: None,
            error_message: None,
        }
    }

    fn build(dir: &TempDir) -> (PathBuf, ContentHash, ContentHash) {
        let store = ContentStore::open(dir.path().join("run")).unwrap();
        let (page, _) = store
            .put(b"<html><HEAD><title>t</title></HEAD><body><img src=\"a.png\"></body></html>")
            .unwrap();
        let (css, _) = store.put(b"body{color:red}").unwrap();

        let metadata = RunMetadata {
            format_version: FORMAT_VERSION,
            run_id: "r1".to_string(),
            started_at: "2024-01-01T00:00:00Z".to_string(),
            finished_at: Some("2024-01-01T00:00:05Z".to_string()),
            start_url: "https://a.com/".to_string(),
            status: RunStatus::Completed,
            config: CrawlConfig::new("https://a.com/"),
            config_hash: "h".to_string(),
            stats: Stats::default(),
            error: None,
            records: vec![
                record("https://a.com/", &page, ResourceKind::Page, "text/html"),
                record("https://a.com/s.css", &css, ResourceKind::Css, "text/css"),
            ],
        };

        let out = dir.path().join("r1.tar.zst");
        build_archive(&metadata, &store, &out, 3).unwrap();
        (out, page, css)
    }

    #[test]
    fn test_entries_and_artifacts() {
        let dir = TempDir::new().unwrap();
        let (out, page, css) = build(&dir);
        let reader = ArchiveReader::open(&out).unwrap();

        assert_eq!(reader.entries()[0].name, METADATA_ENTRY);
        assert_eq!(reader.entries()[1].name, SUMMARY_ENTRY);
        assert_eq!(reader.entries().len(), 4);
        assert!(reader.contains(&page));

        let (bytes, content_type) = reader.artifact_with_type(&css).unwrap();
        assert_eq!(bytes, b"body{color:red}".to_vec());
        assert_eq!(content_type.as_deref(), Some("text/css"));

        let missing = ContentHash::of(b"nope");
        assert!(matches!(
            reader.artifact(&missing),
            Err(ArchiveError::MissingArtifact(_))
        ));
        assert!(reader.summary().unwrap().contains("r1"));
    }

    #[test]
    fn test_preview_inserts_base_tag() {
        let dir = TempDir::new().unwrap();
        let (out, _, _) = build(&dir);
        let reader = ArchiveReader::open(&out).unwrap();

        let html = reader.preview("https://a.com/", None).unwrap();
        assert!(html.starts_with("<html><HEAD><base href=\"https://a.com/\"><title>"));

        let html = reader.preview("https://a.com/", Some("/static/r1/")).unwrap();
        assert!(html.contains("<base href=\"/static/r1/\">"));

        // Stylesheets are not previewable
        assert!(reader.preview("https://a.com/s.css", None).is_err());
    }

    #[test]
    fn test_insert_base_tag_without_head() {
        assert_eq!(insert_base_tag("<p>x</p>", "https://a.com/"), "<base href=\"https://a.com/\"><p>x</p>");
        assert_eq!(
            insert_base_tag("<header>h</header><head lang=\"en\">", "/"),
            "<header>h</header><head lang=\"en\"><base href=\"/\">"
        );
    }

    #[test]
    fn test_extract_and_index() {
        let dir = TempDir::new().unwrap();
        let (out, page, _) = build(&dir);
        let reader = ArchiveReader::open(&out).unwrap();

        let target = dir.path().join("unpacked");
        reader.extract_to(&target).unwrap();
        assert!(target.join(METADATA_ENTRY).is_file());
        assert!(target.join(page.relative_path()).is_file());

        let index = reader.index().unwrap();
        let listing = index.list_records("r1", &PageQuery::default().search("CSS")).unwrap();
        assert_eq!(listing.total, 1);
        assert_eq!(index.get_run("r1").unwrap().status, RunStatus::Completed);
    }

    #[test]
    fn test_missing_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.tar.zst");
        let file = File::create(&path).unwrap();
        let encoder = zstd::Encoder::new(file, 3).unwrap();
        let builder = tar::Builder::new(encoder);
        builder.into_inner().unwrap().finish().unwrap();

        assert!(matches!(
            ArchiveReader::open(&path),
            Err(ArchiveError::MissingMetadata)
        ));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path().join("run")).unwrap();
        let (hash, _) = store.put(b"original").unwrap();
        // Overwrite the object so its bytes no longer match its name
        fs::write(store.path_for(&hash), b"tampered").unwrap();

        let mut metadata = ArchiveReader::open(build(&dir).0).unwrap().metadata().clone();
        metadata.records = vec![record("https://a.com/x", &hash, ResourceKind::Other, "text/plain")];
        let out = dir.path().join("bad.tar.zst");
        build_archive(&metadata, &store, &out, 3).unwrap();

        let reader = ArchiveReader::open(&out).unwrap();
        assert!(matches!(
            reader.verify(),
            Err(ArchiveError::HashMismatch { .. })
        ));
    }
}
