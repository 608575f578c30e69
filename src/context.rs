// src/context.rs

//! Per-run directories and identifier generation
//!
//! Nothing in the installers creates working directories or picks names on
//! its own; everything comes from the [`RunContext`] handed down by the
//! caller.

use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Source of labels for ephemeral, single-use names (e.g. OSTree remotes)
///
/// Identifiers only scope state; they are not secrets.
pub trait IdGenerator {
    fn next_id(&self) -> String;
}

/// Random identifiers backed by UUIDv4
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Deterministic `<prefix>-<n>` identifiers
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: Cell<u64>,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: Cell::new(0),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.next.get();
        self.next.set(n + 1);
        format!("{}-{}", self.prefix, n)
    }
}

/// Directories and id source for one stage run
pub struct RunContext {
    /// Caller-owned scratch space (archive extraction, manifests)
    pub scratch_dir: PathBuf,
    /// Persistent cache shared across runs (OSTree cache repo)
    pub cache_dir: PathBuf,
    /// Per-run output (OSTree output repo)
    pub output_dir: PathBuf,
    ids: Box<dyn IdGenerator>,
}

impl RunContext {
    pub fn new(
        scratch_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            cache_dir: cache_dir.into(),
            output_dir: output_dir.into(),
            ids: Box::new(RandomIds),
        }
    }

    /// Use a single base directory with `scratch`, `cache` and `output` below it
    pub fn under(base: &Path) -> Self {
        Self::new(base.join("scratch"), base.join("cache"), base.join("output"))
    }

    /// Replace the id generator
    pub fn with_ids(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn next_id(&self) -> String {
        self.ids.next_id()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("scratch_dir", &self.scratch_dir)
            .field("cache_dir", &self.cache_dir)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_ids_are_unique() {
        let ids = RandomIds;
        let seen: HashSet<String> = (0..64).map(|_| ids.next_id()).collect();
        assert_eq!(seen.len(), 64);
        assert!(seen.iter().all(|id| id.len() == 32));
    }

    #[test]
    fn test_sequential_ids() {
        let ctx = RunContext::under(Path::new("/run/x")).with_ids(SequentialIds::new("remote"));
        assert_eq!(ctx.next_id(), "remote-0");
        assert_eq!(ctx.next_id(), "remote-1");
        assert_eq!(ctx.cache_dir, PathBuf::from("/run/x/cache"));
    }
}
