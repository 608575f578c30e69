// src/store.rs

//! Checksum-addressed source store
//!
//! The installers never fetch content themselves; they ask a
//! [`ChecksumStore`] for a directory holding one file per requested
//! checksum, named by the checksum. Resolution is all-or-nothing.
//!
//! [`DirStore`] is the on-disk implementation:
//!
//! ```text
//! <root>/<source type>/<algorithm>:<hex>
//! ```

use crate::error::{Error, Result};
use crate::hash::{Checksum, checksum_file};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Source type for plain file content (archives, RPMs)
pub const FILES_SOURCE: &str = "org.osbuild.files";

/// Resolves checksums to local content
pub trait ChecksumStore {
    /// Return a directory containing a file named `<checksum>` for every
    /// requested checksum, or fail without partial results.
    fn resolve(&self, source_type: &str, checksums: &[Checksum]) -> Result<PathBuf>;
}

/// Directory-backed checksum store
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| Error::io_at(&root, e))?;
            debug!("Created source store: {}", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn source_dir(&self, source_type: &str) -> Result<PathBuf> {
        if source_type.is_empty()
            || source_type.contains('/')
            || source_type == "."
            || source_type == ".."
        {
            return Err(Error::InvalidOptions(format!(
                "invalid source type '{}'",
                source_type
            )));
        }
        Ok(self.root.join(source_type))
    }

    /// Whether content for `checksum` is present
    pub fn contains(&self, source_type: &str, checksum: &Checksum) -> Result<bool> {
        Ok(self
            .source_dir(source_type)?
            .join(checksum.to_string())
            .is_file())
    }

    /// Checksums from `checksums` that are not present
    pub fn missing(&self, source_type: &str, checksums: &[Checksum]) -> Result<Vec<Checksum>> {
        let mut missing = Vec::new();
        for checksum in checksums {
            if !self.contains(source_type, checksum)? {
                missing.push(checksum.clone());
            }
        }
        Ok(missing)
    }

    /// Verify `file` against `checksum` and add it to the store
    ///
    /// The content is hashed here, once. Everything that later resolves the
    /// checksum trusts this check.
    pub fn insert(&self, source_type: &str, checksum: &Checksum, file: &Path) -> Result<PathBuf> {
        let dir = self.source_dir(source_type)?;
        let target = dir.join(checksum.to_string());

        if target.is_file() {
            debug!("Content already in store: {}", checksum);
            return Ok(target);
        }

        let actual = checksum_file(file, checksum.algorithm())?;
        if actual != *checksum {
            return Err(Error::ChecksumMismatch {
                path: file.to_path_buf(),
                expected: checksum.to_string(),
                actual: actual.to_string(),
            });
        }

        fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;

        // Write to temp in the same directory, then rename into place
        let temp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| Error::io_at(&dir, e))?;
        fs::copy(file, temp.path()).map_err(|e| Error::io_at(file, e))?;
        temp.persist(&target)
            .map_err(|e| Error::io_at(&target, e.error))?;

        info!("Stored {} in {}", checksum, dir.display());
        Ok(target)
    }
}

impl ChecksumStore for DirStore {
    fn resolve(&self, source_type: &str, checksums: &[Checksum]) -> Result<PathBuf> {
        let dir = self.source_dir(source_type)?;
        let missing = self.missing(source_type, checksums)?;

        if !missing.is_empty() {
            return Err(Error::ChecksumNotFound {
                source_type: source_type.to_string(),
                missing: missing.iter().map(ToString::to_string).collect(),
            });
        }

        if !dir.is_dir() {
            // Only reachable for an empty request against an unused source type
            return Err(Error::io_at(
                &dir,
                io::Error::new(io::ErrorKind::NotFound, "source directory missing"),
            ));
        }

        debug!(
            "Resolved {} checksum(s) from {}",
            checksums.len(),
            dir.display()
        );
        Ok(dir)
    }
}
