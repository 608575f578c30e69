// src/sources/ostree.rs

//! OSTree commits pulled through a persistent cache into a per-run output repo
//!
//! The cache repository is shared between runs and never trusted: every
//! commit is pulled from the cache into the output repository with object
//! checksums re-verified, and with GPG verification when keys are given.
//! Remotes used for a pull are created under a fresh name and deleted again
//! afterwards, so neither repository accumulates remote configuration.

use crate::config::ToolConfig;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::hash::{Checksum, HashAlgorithm};
use crate::process::{Invocation, ToolOutput, ToolRunner};
use crate::trust::TrustVerifier;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An OSTree commit id (SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(Checksum);

impl CommitId {
    /// Parse a bare 64-hex commit id or `sha256:<hex>`
    pub fn parse(s: &str) -> Result<Self> {
        let checksum = if s.contains(':') {
            Checksum::parse(s)?
        } else {
            Checksum::new(HashAlgorithm::Sha256, s).map_err(|e| Error::InvalidChecksum {
                checksum: s.to_string(),
                reason: e.to_string(),
            })?
        };

        if checksum.algorithm() != HashAlgorithm::Sha256 {
            return Err(Error::InvalidChecksum {
                checksum: s.to_string(),
                reason: "OSTree commits are identified by sha256".to_string(),
            });
        }
        Ok(Self(checksum))
    }

    /// The bare hex form `ostree` expects
    pub fn as_hex(&self) -> &str {
        self.0.digest()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_hex())
    }
}

impl<'de> Deserialize<'de> for CommitId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSpec {
    pub url: String,
    /// Armored keys; empty disables signature verification
    #[serde(default)]
    pub gpgkeys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitSpec {
    pub remote: RemoteSpec,
}

/// Options of the OSTree stage; commits are processed in ascending id order
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OstreeOptions {
    pub commits: BTreeMap<CommitId, CommitSpec>,
}

/// The two repositories of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPair {
    pub cache: PathBuf,
    pub output: PathBuf,
}

impl RepoPair {
    pub fn for_context(ctx: &RunContext) -> Self {
        Self {
            cache: ctx.cache_dir.join("repo"),
            output: ctx.output_dir.join("repo"),
        }
    }
}

/// Fetches OSTree commits via the shared cache
pub struct CommitCache<'a> {
    runner: &'a dyn ToolRunner,
    tools: &'a ToolConfig,
}

impl<'a> CommitCache<'a> {
    pub fn new(runner: &'a dyn ToolRunner, tools: &'a ToolConfig) -> Self {
        Self { runner, tools }
    }

    /// `ostree <command...> --repo=<repo>`
    fn ostree(&self, command: &[&str], repo: &Path) -> Invocation {
        Invocation::new(&self.tools.ostree)
            .args(command.iter().copied())
            .arg(format!("--repo={}", repo.display()))
    }

    /// Fetch every requested commit into the output repository
    pub fn fetch(&self, ctx: &RunContext, options: &OstreeOptions) -> Result<RepoPair> {
        let repos = RepoPair::for_context(ctx);
        self.ensure_repo(&repos.cache)?;
        self.ensure_repo(&repos.output)?;

        for (commit, spec) in &options.commits {
            self.fetch_commit(ctx, &repos, commit, &spec.remote)?;
        }

        info!(
            "Fetched {} commit(s) into {}",
            options.commits.len(),
            repos.output.display()
        );
        Ok(repos)
    }

    /// Create an archive-mode repository if absent and enable locking
    pub fn ensure_repo(&self, repo: &Path) -> Result<()> {
        let repo_err = |output: ToolOutput| Error::Repository {
            repo: repo.to_path_buf(),
            stderr: output.diagnostics(),
        };

        if !repo.join("config").exists() {
            fs::create_dir_all(repo).map_err(|e| Error::io_at(repo, e))?;
            let output = self.runner.run(
                &self.ostree(&["init"], repo).arg("--mode=archive"),
            )?;
            if !output.success() {
                return Err(repo_err(output));
            }
            debug!("Initialized repository {}", repo.display());
        }

        let output = self.runner.run(
            &self
                .ostree(&["config", "set"], repo)
                .arg("repo.locking")
                .arg("true"),
        )?;
        if !output.success() {
            return Err(repo_err(output));
        }
        Ok(())
    }

    fn fetch_commit(
        &self,
        ctx: &RunContext,
        repos: &RepoPair,
        commit: &CommitId,
        remote: &RemoteSpec,
    ) -> Result<()> {
        let id = ctx.next_id();
        info!("Pulling commit {} from {}", commit, remote.url);

        let transfer = self.transfer(repos, &id, commit, remote);

        // Teardown runs regardless; a transfer error takes precedence
        let cleanup_cache = self.delete_remote(&repos.cache, &id, commit);
        let cleanup_output = self.delete_remote(&repos.output, &id, commit);

        transfer.and(cleanup_cache).and(cleanup_output)
    }

    fn transfer(&self, repos: &RepoPair, id: &str, commit: &CommitId, remote: &RemoteSpec) -> Result<()> {
        let trust = TrustVerifier::new(self.runner, self.tools);

        self.step(
            "remote add",
            commit,
            self.ostree(&["remote", "add"], &repos.cache)
                .arg("--no-gpg-verify")
                .arg(id)
                .arg(&remote.url),
        )?;

        self.step(
            "remote add",
            commit,
            self.ostree(&["remote", "add"], &repos.output)
                .arg(id)
                .arg(format!("file://{}", repos.cache.display())),
        )?;

        trust.import_remote_keys(&repos.output, id, &remote.gpgkeys)?;

        self.step(
            "pull",
            commit,
            self.ostree(&["pull"], &repos.cache)
                .arg(id)
                .arg(commit.as_hex()),
        )?;

        let mut pull_local = self
            .ostree(&["pull-local"], &repos.output)
            .arg("--untrusted");
        if !remote.gpgkeys.is_empty() {
            pull_local = pull_local.arg(format!("--remote={}", id)).arg("--gpg-verify");
        }
        self.step(
            "pull-local",
            commit,
            pull_local.arg_path(&repos.cache).arg(commit.as_hex()),
        )
    }

    fn delete_remote(&self, repo: &Path, id: &str, commit: &CommitId) -> Result<()> {
        let result = self.step(
            "remote delete",
            commit,
            self.ostree(&["remote", "delete"], repo)
                .arg("--if-exists")
                .arg(id),
        );
        if let Err(e) = &result {
            warn!("{}", e);
        }
        result
    }

    fn step(&self, step: &'static str, commit: &CommitId, invocation: Invocation) -> Result<()> {
        let output = self.runner.run(&invocation)?;
        if !output.success() {
            return Err(Error::Pull {
                step,
                commit: commit.to_string(),
                stderr: output.diagnostics(),
            });
        }
        Ok(())
    }
}
