// src/trust.rs

//! GPG key import and signature checking
//!
//! Two scopes share the same idea of "a keyring that lives exactly as long
//! as the thing it protects":
//!
//! - **Tree-scoped**: keys go into the RPM database of the target tree and
//!   each package that asks for it is checked with `rpmkeys --checksig`.
//! - **Remote-scoped**: keys go into one OSTree remote's keyring; the pull
//!   through that remote does the checking.
//!
//! No keys means no verification. A failed check is always fatal to the
//! operation it belongs to.

use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::process::{Invocation, ToolRunner};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Signature checks backed by `rpmkeys` and `ostree`
pub struct TrustVerifier<'a> {
    runner: &'a dyn ToolRunner,
    tools: &'a ToolConfig,
}

impl<'a> TrustVerifier<'a> {
    pub fn new(runner: &'a dyn ToolRunner, tools: &'a ToolConfig) -> Self {
        Self { runner, tools }
    }

    /// Import armored keys into the RPM keyring of `tree`, in order
    pub fn import_tree_keys(&self, tree: &Path, keys: &[String]) -> Result<()> {
        for (index, key) in keys.iter().enumerate() {
            self.import_tree_key(tree, index, key)?;
        }
        if !keys.is_empty() {
            info!("Imported {} GPG key(s) into {}", keys.len(), tree.display());
        }
        Ok(())
    }

    fn import_tree_key(&self, tree: &Path, index: usize, key: &str) -> Result<()> {
        let scope = format!("RPM keyring of {}", tree.display());
        let mut keyfile = tempfile::Builder::new()
            .prefix("gpgkey-")
            .suffix(".asc")
            .tempfile()?;
        keyfile.write_all(key.as_bytes())?;
        keyfile.flush()?;

        let output = self.runner.run(
            &Invocation::new(&self.tools.rpmkeys)
                .arg("--root")
                .arg_path(tree)
                .arg("--import")
                .arg_path(keyfile.path()),
        )?;

        if !output.success() {
            return Err(Error::KeyImport {
                index,
                scope,
                stderr: output.diagnostics(),
            });
        }
        debug!("Imported GPG key #{} into {}", index, scope);
        Ok(())
    }

    /// Check the signature of a resolved package against the tree keyring
    pub fn verify_package(&self, tree: &Path, checksum: &Checksum, file: &Path) -> Result<()> {
        let output = self.runner.run(
            &Invocation::new(&self.tools.rpmkeys)
                .arg("--root")
                .arg_path(tree)
                .arg("--checksig")
                .arg_path(file),
        )?;

        if !output.success() {
            return Err(Error::SignatureInvalid {
                checksum: checksum.to_string(),
                stderr: output.diagnostics(),
            });
        }
        debug!("Signature OK for {}", checksum);
        Ok(())
    }

    /// Import armored keys into the keyring of `remote` in `repo`
    pub fn import_remote_keys(&self, repo: &Path, remote: &str, keys: &[String]) -> Result<()> {
        for (index, key) in keys.iter().enumerate() {
            let output = self.runner.run(
                &Invocation::new(&self.tools.ostree)
                    .arg("remote")
                    .arg("gpg-import")
                    .arg(format!("--repo={}", repo.display()))
                    .arg("--stdin")
                    .arg(remote)
                    .stdin(key.as_bytes().to_vec()),
            )?;

            if !output.success() {
                return Err(Error::KeyImport {
                    index,
                    scope: format!("remote '{}' of {}", remote, repo.display()),
                    stderr: output.diagnostics(),
                });
            }
        }
        Ok(())
    }
}
