//! Archive assembly

use super::{ArchiveError, ArchiveResult, RunMetadata, METADATA_ENTRY, SUMMARY_ENTRY};
use crate::output::{format_markdown_summary, CompressionReport};
use crate::storage::{ContentHash, ContentStore};
use chrono::DateTime;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};

/// Outcome of writing an archive
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveReport {
    pub path: PathBuf,
    /// Distinct objects packed
    pub objects: usize,
    pub compression: CompressionReport,
}

/// Packages a run into a `.tar.zst` archive
///
/// The archive is written next to `out_path` under a `.partial` name and
/// renamed into place once complete, so `out_path` either does not exist
/// or holds a full archive.
///
/// # Arguments
///
/// * `metadata` - Run, stats and record index to embed
/// * `store` - The run's object store
/// * `out_path` - Destination file
/// * `level` - Zstandard compression level
///
/// # Returns
///
/// * `Ok(ArchiveReport)` - Archive written
/// * `Err(ArchiveError)` - An artifact referenced by an `ok` record is
///   missing, or writing failed
pub fn build_archive(
    metadata: &RunMetadata,
    store: &ContentStore,
    out_path: &Path,
    level: i32,
) -> ArchiveResult<ArchiveReport> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut partial = out_path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let (original_size, objects) = match write_archive(metadata, store, &partial, level) {
        Ok(written) => written,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
    };
    fs::rename(&partial, out_path)?;

    let compressed_size = fs::metadata(out_path)?.len();
    let compression = CompressionReport::new(original_size, compressed_size);
    tracing::info!(
        "Archive {} written: {} objects, {} -> {} bytes ({:.1}% saved)",
        out_path.display(),
        objects,
        original_size,
        compressed_size,
        compression.savings_percent()
    );

    Ok(ArchiveReport {
        path: out_path.to_path_buf(),
        objects,
        compression,
    })
}

/// Writes all entries and returns (uncompressed bytes, object count)
fn write_archive(
    metadata: &RunMetadata,
    store: &ContentStore,
    path: &Path,
    level: i32,
) -> ArchiveResult<(u64, usize)> {
    let mtime = archive_mtime(metadata);
    let file = File::create(path)?;
    let encoder = zstd::Encoder::new(BufWriter::new(file), level)?;
    let mut tar = tar::Builder::new(encoder);

    let metadata_json = serde_json::to_vec_pretty(metadata)?;
    let summary = format_markdown_summary(metadata);
    let mut original_size = 0u64;

    append_entry(&mut tar, METADATA_ENTRY, metadata_json.len() as u64, mtime, &metadata_json[..])?;
    original_size += metadata_json.len() as u64;
    append_entry(&mut tar, SUMMARY_ENTRY, summary.len() as u64, mtime, summary.as_bytes())?;
    original_size += summary.len() as u64;

    let hashes = metadata.artifact_hashes();
    for hex in &hashes {
        let hash =
            ContentHash::parse(hex).ok_or_else(|| ArchiveError::MissingArtifact(hex.clone()))?;
        let object = match File::open(store.path_for(&hash)) {
            Ok(object) => object,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::MissingArtifact(hash.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let size = object.metadata()?.len();
        append_entry(&mut tar, &hash.entry_name(), size, mtime, object)?;
        original_size += size;
    }

    let encoder = tar.into_inner()?;
    let writer = encoder.finish()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok((original_size, hashes.len()))
}

fn append_entry<W: io::Write, R: Read>(
    tar: &mut tar::Builder<W>,
    name: &str,
    size: u64,
    mtime: u64,
    data: R,
) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_entry_type(tar::EntryType::Regular);
    tar.append_data(&mut header, name, data)
}

/// Entry timestamps: the run's finish time, so rebuilding gives the same bytes
fn archive_mtime(metadata: &RunMetadata) -> u64 {
    metadata
        .finished_at
        .as_deref()
        .unwrap_or(&metadata.started_at)
        .parse::<DateTime<chrono::Utc>>()
        .map(|t| t.timestamp().max(0) as u64)
        .unwrap_or(0)
}
