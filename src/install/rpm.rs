// src/install/rpm.rs

//! Verified batch installation of RPM packages into a target tree
//!
//! One invocation walks a fixed sequence:
//!
//! ```text
//! import keys -> resolve -> check signatures -> mount API fs -> machine-id shim
//!     -> rpm --install (one transaction) -> unmount -> reset shims -> query rpmdb
//! ```
//!
//! Nothing is installed unless every requested signature check passed, and
//! the reported package list comes from the tree's own package database
//! after the transaction rather than from the requested package set.

use crate::config::ToolConfig;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::process::{Invocation, ToolRunner};
use crate::sandbox::{Mounter, SandboxScope};
use crate::store::{ChecksumStore, FILES_SOURCE};
use crate::trust::TrustVerifier;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Placeholder written when the tree has no machine-id yet
pub const PLACEHOLDER_MACHINE_ID: &str = "ffffffffffffffffffffffffffffffff\n";

const MACHINE_ID: &str = "etc/machine-id";
const RANDOM_SEED: &str = "var/lib/systemd/random-seed";

/// rpm prints this for tags a package does not carry
const RPM_NONE: &str = "(none)";

const QUERY_FORMAT: &str =
    "%{NAME}\\t%{EPOCH}\\t%{VERSION}\\t%{RELEASE}\\t%{ARCH}\\t%{SIGMD5}\\t%{SIGPGP}\\t%{SIGGPG}\\n";

/// One package to install
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "PackageEntry")]
pub struct PackageSpec {
    pub checksum: Checksum,
    pub check_gpg: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PackageEntry {
    Bare(Checksum),
    Detailed(DetailedPackage),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DetailedPackage {
    checksum: Checksum,
    #[serde(default)]
    check_gpg: bool,
}

impl From<PackageEntry> for PackageSpec {
    fn from(entry: PackageEntry) -> Self {
        match entry {
            PackageEntry::Bare(checksum) => Self {
                checksum,
                check_gpg: false,
            },
            PackageEntry::Detailed(d) => Self {
                checksum: d.checksum,
                check_gpg: d.check_gpg,
            },
        }
    }
}

/// Options of the RPM stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpmOptions {
    /// Armored public keys for the tree's keyring
    #[serde(default)]
    pub gpgkeys: Vec<String>,
    #[serde(default)]
    pub packages: Vec<PackageSpec>,
}

/// A package as recorded in the tree's package database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackageRecord {
    pub name: String,
    pub version: String,
    pub release: String,
    pub epoch: Option<u64>,
    pub arch: Option<String>,
    pub sigmd5: Option<String>,
    pub sigpgp: Option<String>,
    pub siggpg: Option<String>,
}

/// Metadata emitted by the RPM stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmMetadata {
    pub packages: Vec<InstalledPackageRecord>,
}

fn optional(field: &str) -> Option<String> {
    let field = field.trim();
    if field.is_empty() || field == RPM_NONE {
        None
    } else {
        Some(field.to_string())
    }
}

/// Parse output of `rpm --query --all --queryformat QUERY_FORMAT`
pub fn parse_package_query(output: &str) -> std::result::Result<Vec<InstalledPackageRecord>, String> {
    let mut records = Vec::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 8 {
            return Err(format!("unexpected rpm query line: {}", line));
        }

        let epoch = match optional(parts[1]) {
            Some(e) => Some(
                e.parse::<u64>()
                    .map_err(|_| format!("invalid epoch '{}' for {}", e, parts[0]))?,
            ),
            None => None,
        };

        records.push(InstalledPackageRecord {
            name: parts[0].to_string(),
            epoch,
            version: parts[2].to_string(),
            release: parts[3].to_string(),
            arch: optional(parts[4]),
            sigmd5: optional(parts[5]),
            sigpgp: optional(parts[6]),
            siggpg: optional(parts[7]),
        });
    }

    records.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.version.cmp(&b.version))
            .then_with(|| a.release.cmp(&b.release))
    });
    Ok(records)
}

/// Placeholder machine-id for the duration of the transaction
///
/// Scriptlets that read `/etc/machine-id` see a fixed value instead of
/// whatever a first-boot generator would produce.
struct MachineIdShim {
    path: PathBuf,
    synthesized: bool,
}

impl MachineIdShim {
    fn prepare(tree: &Path) -> Result<Self> {
        let path = tree.join(MACHINE_ID);
        if path.exists() {
            return Ok(Self {
                path,
                synthesized: false,
            });
        }

        let shim_err = |e: std::io::Error| Error::Shim {
            path: path.clone(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(shim_err)?;
        }
        fs::write(&path, PLACEHOLDER_MACHINE_ID).map_err(shim_err)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).map_err(shim_err)?;

        debug!("Wrote placeholder {}", path.display());
        Ok(Self {
            path,
            synthesized: true,
        })
    }

    /// Replace a synthesized id with an empty file
    fn finish(self) -> Result<()> {
        if !self.synthesized {
            return Ok(());
        }
        let shim_err = |e: std::io::Error| Error::Shim {
            path: self.path.clone(),
            reason: e.to_string(),
        };
        fs::remove_file(&self.path).map_err(shim_err)?;
        fs::File::create(&self.path).map_err(shim_err)?;
        Ok(())
    }
}

fn remove_random_seed(tree: &Path) -> Result<()> {
    let seed = tree.join(RANDOM_SEED);
    match fs::remove_file(&seed) {
        Ok(()) => {
            debug!("Removed {}", seed.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Shim {
            path: seed,
            reason: e.to_string(),
        }),
    }
}

/// Installs a batch of RPMs as one transaction
pub struct RpmInstaller<'a> {
    store: &'a dyn ChecksumStore,
    runner: &'a dyn ToolRunner,
    mounter: &'a dyn Mounter,
    tools: &'a ToolConfig,
}

impl<'a> RpmInstaller<'a> {
    pub fn new(
        store: &'a dyn ChecksumStore,
        runner: &'a dyn ToolRunner,
        mounter: &'a dyn Mounter,
        tools: &'a ToolConfig,
    ) -> Self {
        Self {
            store,
            runner,
            mounter,
            tools,
        }
    }

    pub fn install(&self, ctx: &RunContext, tree: &Path, options: &RpmOptions) -> Result<RpmMetadata> {
        let trust = TrustVerifier::new(self.runner, self.tools);

        trust.import_tree_keys(tree, &options.gpgkeys)?;

        if options.packages.is_empty() {
            // Keys only: nothing to resolve, mount or install
            let packages = self.query_installed(tree)?;
            info!("No packages requested for {}", tree.display());
            return Ok(RpmMetadata { packages });
        }

        let checksums: Vec<Checksum> = options.packages.iter().map(|p| p.checksum.clone()).collect();
        let package_dir = self.store.resolve(FILES_SOURCE, &checksums)?;

        for package in options.packages.iter().filter(|p| p.check_gpg) {
            let file = package_dir.join(package.checksum.to_string());
            trust.verify_package(tree, &package.checksum, &file)?;
        }

        let sandbox = SandboxScope::acquire(self.mounter, tree)?;
        let machine_id = MachineIdShim::prepare(tree)?;

        // Any early return from here drops the sandbox, which unmounts
        self.transaction(ctx, tree, &package_dir, &checksums)?;
        sandbox.release()?;

        machine_id.finish()?;
        remove_random_seed(tree)?;

        let packages = self.query_installed(tree)?;
        info!(
            "Installed {} package(s); {} present in {}",
            checksums.len(),
            packages.len(),
            tree.display()
        );
        Ok(RpmMetadata { packages })
    }

    fn transaction(
        &self,
        ctx: &RunContext,
        tree: &Path,
        package_dir: &Path,
        checksums: &[Checksum],
    ) -> Result<()> {
        fs::create_dir_all(&ctx.scratch_dir).map_err(|e| Error::io_at(&ctx.scratch_dir, e))?;
        let mut manifest = tempfile::Builder::new()
            .prefix("manifest.")
            .tempfile_in(&ctx.scratch_dir)
            .map_err(|e| Error::io_at(&ctx.scratch_dir, e))?;
        for checksum in checksums {
            writeln!(manifest, "{}", checksum)?;
        }
        manifest.flush()?;

        info!("Installing {} package(s) into {}", checksums.len(), tree.display());

        // Digests were checked by the store and signatures above where requested
        let output = self.runner.run(
            &Invocation::new(&self.tools.rpm)
                .arg("--verbose")
                .arg("--root")
                .arg_path(tree)
                .arg("--nosignature")
                .arg("--nodigest")
                .arg("--install")
                .arg_path(manifest.path())
                .current_dir(package_dir),
        )?;

        if !output.success() {
            warn!("rpm transaction failed in {}", tree.display());
            return Err(Error::Transaction {
                code: output.code,
                stderr: output.diagnostics(),
            });
        }
        Ok(())
    }

    /// Read the installed package set from the tree's database
    pub fn query_installed(&self, tree: &Path) -> Result<Vec<InstalledPackageRecord>> {
        let output = self.runner.run(
            &Invocation::new(&self.tools.rpm)
                .arg("--root")
                .arg_path(tree)
                .arg("--query")
                .arg("--all")
                .arg("--queryformat")
                .arg(QUERY_FORMAT),
        )?;

        if !output.success() {
            return Err(Error::PackageQuery {
                tree: tree.to_path_buf(),
                reason: output.diagnostics(),
            });
        }

        parse_package_query(&output.stdout).map_err(|reason| Error::PackageQuery {
            tree: tree.to_path_buf(),
            reason,
        })
    }
}
