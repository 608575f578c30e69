// src/install/mod.rs

//! Writing fetched content into a target tree

pub mod copy;
pub mod rpm;

pub use copy::{CopyInstaller, PathMapping};
pub use rpm::{InstalledPackageRecord, PackageSpec, RpmInstaller, RpmMetadata, RpmOptions};
