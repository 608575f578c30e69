// src/sources/archive.rs

//! Archive sources: resolve a checksum and unpack it into scratch space

use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::process::{Invocation, ToolRunner};
use crate::store::{ChecksumStore, FILES_SOURCE};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

fn default_strip_components() -> u32 {
    1
}

/// `source` block of the archive copy stage
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveSource {
    #[serde(rename = "type")]
    pub kind: ArchiveKind,
    pub checksum: Checksum,
    #[serde(rename = "strip-components", default = "default_strip_components")]
    pub strip_components: u32,
}

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    /// Anything `tar` can read, compressed or not
    Archive,
}

/// Unpacks archive sources
pub struct ArchiveFetcher<'a> {
    store: &'a dyn ChecksumStore,
    runner: &'a dyn ToolRunner,
    tools: &'a ToolConfig,
}

impl<'a> ArchiveFetcher<'a> {
    pub fn new(
        store: &'a dyn ChecksumStore,
        runner: &'a dyn ToolRunner,
        tools: &'a ToolConfig,
    ) -> Self {
        Self {
            store,
            runner,
            tools,
        }
    }

    /// Extract `source` into `<scratch_dir>/<checksum>` and return that directory
    ///
    /// Any existing directory of that name is replaced. The result is left in
    /// place for the caller to clean up.
    pub fn fetch(&self, source: &ArchiveSource, scratch_dir: &Path) -> Result<PathBuf> {
        let checksum = &source.checksum;
        let resolved = self
            .store
            .resolve(FILES_SOURCE, std::slice::from_ref(checksum))?;
        let archive = resolved.join(checksum.to_string());

        let target = scratch_dir.join(checksum.to_string());
        // Leftovers from an earlier extraction must not mix into this one
        if target.exists() {
            fs::remove_dir_all(&target).map_err(|e| Error::io_at(&target, e))?;
        }
        fs::create_dir_all(&target).map_err(|e| Error::io_at(&target, e))?;

        let output = self.runner.run(
            &Invocation::new(&self.tools.tar)
                .arg("--extract")
                .arg("--file")
                .arg_path(&archive)
                .arg("--directory")
                .arg_path(&target)
                .arg("--strip-components")
                .arg(source.strip_components.to_string()),
        )?;

        if !output.success() {
            return Err(Error::Extraction {
                checksum: checksum.to_string(),
                code: output.code,
                stderr: output.diagnostics(),
            });
        }

        info!(
            "Extracted {} into {} (strip-components={})",
            checksum,
            target.display(),
            source.strip_components
        );
        Ok(target)
    }
}
