// src/install/copy.rs

//! Copy extracted content into the target tree
//!
//! Each [`PathMapping`] is one independent `cp --reflink=auto --archive`.
//! Mappings run in list order and the first failure stops the stage; earlier
//! mappings stay applied.

use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::path::join_under;
use crate::process::{Invocation, ToolRunner};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

fn root() -> String {
    "/".to_string()
}

/// One `from` → `to` copy, both defaulting to `/`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathMapping {
    #[serde(default = "root")]
    pub from: String,
    #[serde(default = "root")]
    pub to: String,
}

impl Default for PathMapping {
    fn default() -> Self {
        Self {
            from: root(),
            to: root(),
        }
    }
}

/// Copies resolved source trees into a target tree
pub struct CopyInstaller<'a> {
    runner: &'a dyn ToolRunner,
    tools: &'a ToolConfig,
}

impl<'a> CopyInstaller<'a> {
    pub fn new(runner: &'a dyn ToolRunner, tools: &'a ToolConfig) -> Self {
        Self { runner, tools }
    }

    /// Apply `mappings` from `source_root` into `tree`
    ///
    /// An empty list copies the whole source root to the tree root.
    pub fn install(&self, source_root: &Path, tree: &Path, mappings: &[PathMapping]) -> Result<()> {
        let default = [PathMapping::default()];
        let mappings = if mappings.is_empty() {
            &default[..]
        } else {
            mappings
        };

        for mapping in mappings {
            self.copy_one(source_root, tree, mapping)?;
        }

        info!("Applied {} path mapping(s) into {}", mappings.len(), tree.display());
        Ok(())
    }

    fn copy_one(&self, source_root: &Path, tree: &Path, mapping: &PathMapping) -> Result<()> {
        let copy_err = |stderr: String| Error::Copy {
            from: mapping.from.clone(),
            to: mapping.to.clone(),
            stderr,
        };

        let src = join_under(source_root, &mapping.from)?;
        let dst = join_under(tree, &mapping.to)?;

        fs::create_dir_all(&dst).map_err(|e| copy_err(format!("{}: {}", dst.display(), e)))?;

        // Trailing "/." copies the directory's contents rather than the directory
        let src_contents = src.join(".");
        let output = self.runner.run(
            &Invocation::new(&self.tools.cp)
                .arg("--reflink=auto")
                .arg("--archive")
                .arg_path(&src_contents)
                .arg_path(&dst),
        )?;

        if !output.success() {
            return Err(copy_err(output.diagnostics()));
        }

        debug!("Copied {} -> {}", src.display(), dst.display());
        Ok(())
    }
}
