//! Running external tools inside a workspace.
//!
//! The [`Executor`] trait is the seam between the promotion logic and the
//! processes it drives, allowing:
//! - Real execution via [`ProcessExecutor`]
//! - Recording fakes for testing state transitions in isolation

use crate::error::{Error, Result};
use crate::workspace::Workspace;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A command line plus the directory to run it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory; the workspace root when unset.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Start a command for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in `dir` instead of the workspace root.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Whether the arguments start with the given words.
    pub fn starts_with(&self, words: &[&str]) -> bool {
        self.args.len() >= words.len() && self.args.iter().zip(words).all(|(a, w)| a == w)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// What a finished command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// A successful run with the given stdout.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// A failed run with the given exit code and stderr.
    pub fn failure(exit_code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, lossily decoded.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        text
    }

    /// Trimmed stdout, lossily decoded.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    /// Turn a non-zero exit into [`Error::Command`].
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(Error::Command {
            command: spec.to_string(),
            exit_code: self.exit_code,
            output: self.combined(),
        })
    }
}

/// Runs commands with the workspace as their home directory.
pub trait Executor: Send + Sync {
    /// Run to completion and return the raw outcome.
    ///
    /// A non-zero exit is not an error at this level; callers decide which
    /// exit codes are meaningful. Failing to start the process is.
    fn run(&self, spec: &CommandSpec, workspace: &Workspace) -> Result<CommandOutput>;

    /// Run and fail on any non-zero exit.
    fn run_checked(&self, spec: &CommandSpec, workspace: &Workspace) -> Result<CommandOutput> {
        self.run(spec, workspace)?.check(spec)
    }
}

/// Executor that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    /// Create a new process executor.
    pub fn new() -> Self {
        Self
    }
}

impl Executor for ProcessExecutor {
    fn run(&self, spec: &CommandSpec, workspace: &Workspace) -> Result<CommandOutput> {
        let cwd: &Path = spec.cwd.as_deref().unwrap_or_else(|| workspace.root());

        log::debug!("running `{}` in {}", spec, cwd.display());

        let output = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(cwd)
            .envs(workspace.env())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Command {
                command: spec.to_string(),
                exit_code: None,
                output: format!("failed to execute {}: {}", spec.program, e),
            })?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        };

        if !result.stderr.is_empty() {
            log::trace!("`{}`: {}", spec.program, String::from_utf8_lossy(&result.stderr).trim());
        }

        Ok(result)
    }
}
