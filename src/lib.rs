// src/lib.rs

//! Treeforge: verified acquisition and installation of OS tree content
//!
//! Content is addressed by checksum and fetched from a local store, then
//! either unpacked and copied into a target tree, installed as one RPM
//! transaction with optional signature checks, or pulled as OSTree commits
//! through a shared cache.
//!
//! # Layout
//!
//! - [`store`]: checksum → local file resolution
//! - [`trust`]: GPG key import and signature verification
//! - [`sources`]: archive extraction and OSTree commit fetching
//! - [`install`]: copying into a tree and RPM transactions
//! - [`stage`]: option parsing and dispatch to the above

pub mod config;
pub mod context;
mod error;
pub mod hash;
pub mod install;
pub mod path;
pub mod process;
pub mod sandbox;
pub mod sources;
pub mod stage;
pub mod store;
pub mod trust;

pub use config::{Config, ToolConfig};
pub use context::{IdGenerator, RandomIds, RunContext, SequentialIds};
pub use error::{Error, ErrorCategory, Result};
pub use hash::{Checksum, HashAlgorithm};
pub use process::{Invocation, SystemRunner, ToolOutput, ToolRunner};
pub use sandbox::{HostMounter, Mounter, SandboxScope};
pub use stage::{Fetcher, Stage, StageEnv, StageKind, StageMetadata};
pub use store::{ChecksumStore, DirStore, FILES_SOURCE};
