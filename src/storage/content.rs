//! Content-addressed artifact store
//!
//! Every artifact is stored once under the SHA-256 of its bytes, at
//! `objects/<first two hex chars>/<remaining 62>`. Writes go to a temp file
//! that is renamed into place, so a reader never observes a partial object.

use crate::storage::{StorageError, StorageResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Directory holding objects, relative to the store root and inside archives
pub const OBJECTS_DIR: &str = "objects";

/// SHA-256 of an artifact, as 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hashes a byte slice
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Parses a hex digest; `None` unless it is 64 hex characters
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        (s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())).then_some(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of the object relative to a store root or archive root
    pub fn relative_path(&self) -> PathBuf {
        Path::new(OBJECTS_DIR).join(&self.0[..2]).join(&self.0[2..])
    }

    /// Entry name of the object inside an archive (always `/`-separated)
    pub fn entry_name(&self) -> String {
        format!("{}/{}/{}", OBJECTS_DIR, &self.0[..2], &self.0[2..])
    }

    /// Parses an archive entry name produced by [`entry_name`](Self::entry_name)
    pub fn from_entry_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(OBJECTS_DIR)?.strip_prefix('/')?;
        let (prefix, tail) = rest.split_once('/')?;
        if prefix.len() != 2 {
            return None;
        }
        Self::parse(&format!("{}{}", prefix, tail))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write-once object store rooted at a run directory
#[derive(Debug)]
pub struct ContentStore {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl ContentStore {
    /// Opens (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        Ok(Self {
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.relative_path())
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.path_for(hash).is_file()
    }

    /// Stores bytes under their content hash
    ///
    /// # Returns
    ///
    /// The hash, and whether this call wrote a new object (`false` when an
    /// identical object was already present).
    pub fn put(&self, bytes: &[u8]) -> StorageResult<(ContentHash, bool)> {
        let hash = ContentHash::of(bytes);
        let path = self.path_for(&hash);
        if path.is_file() {
            return Ok((hash, false));
        }

        let parent = path
            .parent()
            .ok_or_else(|| StorageError::Database(format!("invalid object path for {}", hash)))?;
        fs::create_dir_all(parent)?;

        let temp = parent.join(format!(
            ".{}.{}.{}.tmp",
            &hash.as_str()[2..10],
            std::process::id(),
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_data()?;
            fs::rename(&temp, &path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok((hash, true))
    }

    /// Reads an object back
    pub fn get(&self, hash: &ContentHash) -> StorageResult<Vec<u8>> {
        let path = self.path_for(hash);
        if !path.is_file() {
            return Err(StorageError::ArtifactNotFound(hash.to_string()));
        }
        Ok(fs::read(path)?)
    }
}
