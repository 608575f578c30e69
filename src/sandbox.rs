// src/sandbox.rs

//! Host API filesystems for package scriptlets
//!
//! RPM scriptlets expect `/dev`, `/sys` and `/proc` to look like a normal
//! system. A [`SandboxScope`] bind-mounts the host's copies over the
//! corresponding directories in the target tree and unmounts them again
//! when released or dropped, whichever comes first. Every exit path of the
//! RPM installer (success, verification failure, transaction failure)
//! therefore leaves the host mount table as it found it.

use crate::error::{Error, Result};
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Host directories exposed inside the tree, in mount order
pub const API_FILESYSTEMS: &[&str] = &["dev", "sys", "proc"];

/// Performs mount table changes
pub trait Mounter {
    fn bind(&self, source: &Path, target: &Path) -> Result<()>;
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// Mounts on the host via mount(2)/umount2(2)
#[derive(Debug, Default, Clone, Copy)]
pub struct HostMounter;

impl Mounter for HostMounter {
    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        mount::<Path, Path, str, str>(Some(source), target, None, MsFlags::MS_BIND, None)
            .map_err(|e| Error::Mount {
                action: "bind-mount",
                mount_point: target.to_path_buf(),
                reason: format!("{} -> {}: {}", source.display(), target.display(), e),
            })
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        // Lazy detach: scriptlets may leave daemons holding the mount busy
        umount2(target, MntFlags::MNT_DETACH).map_err(|e| Error::Mount {
            action: "unmount",
            mount_point: target.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Bind mounts held for the lifetime of one package transaction
pub struct SandboxScope<'a> {
    mounter: &'a dyn Mounter,
    mounted: Vec<PathBuf>,
}

impl<'a> SandboxScope<'a> {
    /// Bind-mount the host API filesystems into `tree`
    ///
    /// If any mount fails, the ones already made are undone before the error
    /// is returned.
    pub fn acquire(mounter: &'a dyn Mounter, tree: &Path) -> Result<Self> {
        Self::acquire_from(mounter, Path::new("/"), tree)
    }

    /// Like [`acquire`](Self::acquire) with an explicit host root
    pub fn acquire_from(mounter: &'a dyn Mounter, host_root: &Path, tree: &Path) -> Result<Self> {
        let mut scope = Self {
            mounter,
            mounted: Vec::with_capacity(API_FILESYSTEMS.len()),
        };

        for name in API_FILESYSTEMS {
            let source = host_root.join(name);
            let target = tree.join(name);

            fs::create_dir_all(&target).map_err(|e| Error::Mount {
                action: "create",
                mount_point: target.clone(),
                reason: e.to_string(),
            })?;

            mounter.bind(&source, &target)?;
            debug!("Mounted {} on {}", source.display(), target.display());
            scope.mounted.push(target);
        }

        Ok(scope)
    }

    /// Mount points currently held, in mount order
    pub fn mount_points(&self) -> &[PathBuf] {
        &self.mounted
    }

    /// Unmount everything, reporting the first failure
    pub fn release(mut self) -> Result<()> {
        self.unmount_all()
    }

    fn unmount_all(&mut self) -> Result<()> {
        let mut first_error = None;

        while let Some(target) = self.mounted.pop() {
            match self.mounter.unmount(&target) {
                Ok(()) => debug!("Unmounted {}", target.display()),
                Err(e) => {
                    warn!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for SandboxScope<'_> {
    fn drop(&mut self) {
        if !self.mounted.is_empty() {
            // Errors were already logged by unmount_all
            let _ = self.unmount_all();
        }
    }
}
