// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! [`RecordingRunner`] and [`RecordingMounter`] stand in for the host so the
//! installers can be driven without root or the real tools.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use treeforge::{Checksum, DirStore, Error, FILES_SOURCE, HashAlgorithm, Invocation, Mounter, Result, ToolOutput, ToolRunner};

type Matcher = Box<dyn Fn(&Invocation) -> bool>;
type Responder = Box<dyn Fn(&Invocation) -> ToolOutput>;

/// Records every invocation and answers from a list of rules
///
/// The first matching rule wins; unmatched invocations succeed silently.
#[derive(Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<Invocation>>,
    rules: Vec<(Matcher, Responder)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `responder` to invocations matching `matcher`
    pub fn on(
        mut self,
        matcher: impl Fn(&Invocation) -> bool + 'static,
        responder: impl Fn(&Invocation) -> ToolOutput + 'static,
    ) -> Self {
        self.rules.push((Box::new(matcher), Box::new(responder)));
        self
    }

    /// Fail invocations of `program` whose arguments contain `arg`
    pub fn fail(self, program: &'static str, arg: &'static str, stderr: &'static str) -> Self {
        self.on(
            move |inv| inv.program == program && inv.args.iter().any(|a| a == arg),
            move |_| failure(stderr),
        )
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// `program arg0 arg1 ...` for every call, in order
    pub fn lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(Invocation::display).collect()
    }

    /// Calls whose arguments contain `arg`
    pub fn calls_with(&self, arg: &str) -> Vec<Invocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|inv| inv.args.iter().any(|a| a == arg))
            .cloned()
            .collect()
    }
}

impl ToolRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        for (matcher, responder) in &self.rules {
            if matcher(invocation) {
                return Ok(responder(invocation));
            }
        }
        Ok(ToolOutput::default())
    }
}

pub fn success(stdout: &str) -> ToolOutput {
    ToolOutput {
        code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failure(stderr: &str) -> ToolOutput {
    ToolOutput {
        code: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Records bind mounts and tracks which are still active
#[derive(Default)]
pub struct RecordingMounter {
    log: RefCell<Vec<String>>,
    active: RefCell<Vec<PathBuf>>,
}

impl RecordingMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn active(&self) -> Vec<PathBuf> {
        self.active.borrow().clone()
    }

    pub fn is_mounted(&self, target: &Path) -> bool {
        self.active.borrow().iter().any(|p| p == target)
    }
}

impl Mounter for RecordingMounter {
    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        self.log
            .borrow_mut()
            .push(format!("bind {} {}", source.display(), target.display()));
        self.active.borrow_mut().push(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        self.log.borrow_mut().push(format!("umount {}", target.display()));
        let mut active = self.active.borrow_mut();
        match active.iter().position(|p| p == target) {
            Some(i) => {
                active.remove(i);
                Ok(())
            }
            None => Err(Error::Mount {
                action: "unmount",
                mount_point: target.to_path_buf(),
                reason: "not mounted".to_string(),
            }),
        }
    }
}

/// A checksum store in a temp dir; keep the TempDir alive
pub fn temp_store() -> (TempDir, DirStore) {
    let dir = TempDir::new().unwrap();
    let store = DirStore::new(dir.path().join("sources")).unwrap();
    (dir, store)
}

/// Write `content` to a file and add it to the store under its sha256
pub fn store_bytes(store: &DirStore, content: &[u8]) -> Checksum {
    let digest = treeforge::hash::hash_reader(HashAlgorithm::Sha256, &mut &content[..]).unwrap();
    let checksum = Checksum::new(HashAlgorithm::Sha256, digest).unwrap();

    let staging = tempfile::NamedTempFile::new().unwrap();
    fs::write(staging.path(), content).unwrap();
    store.insert(FILES_SOURCE, &checksum, staging.path()).unwrap();
    checksum
}
