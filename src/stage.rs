// src/stage.rs

//! Stage selection and dispatch
//!
//! A stage is chosen by kind, its options are deserialized into a [`Stage`],
//! and the stage is turned into a [`Fetcher`] bound to the collaborators it
//! needs. Every fetcher emits JSON metadata; only the RPM stage has any.

use crate::config::ToolConfig;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::install::{CopyInstaller, PathMapping, RpmInstaller, RpmMetadata, RpmOptions};
use crate::process::ToolRunner;
use crate::sandbox::Mounter;
use crate::sources::{ArchiveFetcher, ArchiveSource, CommitCache, OstreeOptions};
use crate::store::ChecksumStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Stage kinds selectable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Archive,
    Rpm,
    Ostree,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Archive => "archive",
            StageKind::Rpm => "rpm",
            StageKind::Ostree => "ostree",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "archive" => Ok(StageKind::Archive),
            "rpm" => Ok(StageKind::Rpm),
            "ostree" => Ok(StageKind::Ostree),
            other => Err(Error::InvalidOptions(format!("unknown stage '{}'", other))),
        }
    }
}

/// Options of the archive copy stage
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveCopyOptions {
    pub source: ArchiveSource,
    #[serde(default)]
    pub paths: Vec<PathMapping>,
}

/// A fully parsed stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Archive(ArchiveCopyOptions),
    Rpm(RpmOptions),
    OstreeCommit(OstreeOptions),
}

impl Stage {
    pub fn from_options(kind: StageKind, options: serde_json::Value) -> Result<Self> {
        let invalid = |e: serde_json::Error| Error::InvalidOptions(format!("{}: {}", kind, e));
        Ok(match kind {
            StageKind::Archive => Stage::Archive(serde_json::from_value(options).map_err(invalid)?),
            StageKind::Rpm => Stage::Rpm(serde_json::from_value(options).map_err(invalid)?),
            StageKind::Ostree => {
                Stage::OstreeCommit(serde_json::from_value(options).map_err(invalid)?)
            }
        })
    }

    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Archive(_) => StageKind::Archive,
            Stage::Rpm(_) => StageKind::Rpm,
            Stage::OstreeCommit(_) => StageKind::Ostree,
        }
    }

    /// Bind the stage to its collaborators
    pub fn into_fetcher<'a>(self, env: StageEnv<'a>) -> Box<dyn Fetcher + 'a> {
        match self {
            Stage::Archive(options) => Box::new(ArchiveCopyStage { options, env }),
            Stage::Rpm(options) => Box::new(RpmStage { options, env }),
            Stage::OstreeCommit(options) => Box::new(OstreeStage { options, env }),
        }
    }
}

/// Metadata emitted by a stage run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StageMetadata {
    Rpm(RpmMetadata),
    Empty {},
}

/// Collaborators shared by all stages
#[derive(Clone, Copy)]
pub struct StageEnv<'a> {
    pub store: &'a dyn ChecksumStore,
    pub runner: &'a dyn ToolRunner,
    pub mounter: &'a dyn Mounter,
    pub tools: &'a ToolConfig,
}

/// A stage ready to run against a tree
pub trait Fetcher {
    fn run(&self, ctx: &RunContext, tree: &Path) -> Result<StageMetadata>;
}

struct ArchiveCopyStage<'a> {
    options: ArchiveCopyOptions,
    env: StageEnv<'a>,
}

impl Fetcher for ArchiveCopyStage<'_> {
    fn run(&self, ctx: &RunContext, tree: &Path) -> Result<StageMetadata> {
        let fetcher = ArchiveFetcher::new(self.env.store, self.env.runner, self.env.tools);
        let extracted = fetcher.fetch(&self.options.source, &ctx.scratch_dir)?;

        let copied = CopyInstaller::new(self.env.runner, self.env.tools).install(
            &extracted,
            tree,
            &self.options.paths,
        );

        // Scratch content is only needed for the copy
        if let Err(e) = fs::remove_dir_all(&extracted) {
            debug!("Leaving {} in place: {}", extracted.display(), e);
        }

        copied.map(|()| StageMetadata::Empty {})
    }
}

struct RpmStage<'a> {
    options: RpmOptions,
    env: StageEnv<'a>,
}

impl Fetcher for RpmStage<'_> {
    fn run(&self, ctx: &RunContext, tree: &Path) -> Result<StageMetadata> {
        let installer =
            RpmInstaller::new(self.env.store, self.env.runner, self.env.mounter, self.env.tools);
        installer
            .install(ctx, tree, &self.options)
            .map(StageMetadata::Rpm)
    }
}

struct OstreeStage<'a> {
    options: OstreeOptions,
    env: StageEnv<'a>,
}

impl Fetcher for OstreeStage<'_> {
    fn run(&self, ctx: &RunContext, _tree: &Path) -> Result<StageMetadata> {
        CommitCache::new(self.env.runner, self.env.tools).fetch(ctx, &self.options)?;
        Ok(StageMetadata::Empty {})
    }
}
