// src/sources/mod.rs

//! Content acquisition: archives from the checksum store and OSTree commits

pub mod archive;
pub mod ostree;

pub use archive::{ArchiveFetcher, ArchiveKind, ArchiveSource};
pub use ostree::{CommitCache, CommitId, CommitSpec, OstreeOptions, RemoteSpec, RepoPair};
