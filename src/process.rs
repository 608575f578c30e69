// src/process.rs

//! External tool invocation
//!
//! Every transfer, trust check and transaction in this crate is a call out
//! to a system tool (`tar`, `cp`, `rpm`, `rpmkeys`, `ostree`). They all go
//! through [`ToolRunner`] so the step ordering of the installers can be
//! exercised without root privileges or the tools themselves.

use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// A single tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Render as a shell-like line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished tool
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code, -1 if terminated by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Stderr trimmed, falling back to stdout when the tool wrote nothing there
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs external tools
///
/// A non-zero exit is NOT an error at this layer; callers map it onto the
/// error variant of the step they are performing. Only failure to spawn is
/// reported as `Err`.
pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Runs tools as host processes, blocking until they exit
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        debug!("Running: {}", invocation.display());

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }

        cmd.stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let spawn_err = |source| Error::ToolSpawn {
            tool: invocation.program.clone(),
            source,
        };

        let mut child = cmd.spawn().map_err(spawn_err)?;

        if let Some(data) = &invocation.stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            // A tool that exits without reading stdin still reports through
            // its exit code and stderr
            match pipe.write_all(data) {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
            // Dropping the pipe closes stdin so the tool sees EOF
        }

        let output = child.wait_with_output()?;
        let result = ToolOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            debug!("'{}' exited with code {}", invocation.program, result.code);
        }

        Ok(result)
    }
}
