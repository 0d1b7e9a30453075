//! Git command wrappers.
//!
//! Every method shells out to the configured `git` binary through an
//! [`Executor`], with the workspace as `$HOME`. `--global` therefore means
//! "this workspace only".

use crate::error::{Error, Result};
use crate::exec::{CommandOutput, CommandSpec, Executor};
use crate::workspace::Workspace;

/// Remote name used for every clone.
pub const REMOTE: &str = "origin";

/// Exit code of `git ls-remote --exit-code` when no ref matched.
const LS_REMOTE_NO_MATCH: i32 = 2;

/// Whether a branch exists on the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    /// The branch exists.
    Exists,
    /// The remote has no such branch.
    NotFound,
}

/// Fully qualified ref of a local branch name.
pub fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}

/// Classify the outcome of `git ls-remote --heads --exit-code <url> <refname>`.
///
/// Exit code 2 means "no matching ref" and is not an error; any other
/// non-zero exit is. ls-remote matches patterns by tail, so a zero exit only
/// counts when the listing names `refname` exactly.
pub fn classify_branch_lookup(
    spec: &CommandSpec,
    output: CommandOutput,
    refname: &str,
) -> Result<BranchState> {
    match output.exit_code {
        Some(0) => {
            let listed = output
                .stdout_str()
                .lines()
                .filter_map(|line| line.split_whitespace().nth(1))
                .any(|name| name == refname);
            Ok(if listed {
                BranchState::Exists
            } else {
                BranchState::NotFound
            })
        }
        Some(LS_REMOTE_NO_MATCH) => Ok(BranchState::NotFound),
        exit_code => Err(Error::Command {
            command: spec.to_string(),
            exit_code,
            output: output.combined(),
        }),
    }
}

/// Git driver bound to one workspace.
pub struct Git<'a> {
    executor: &'a dyn Executor,
    workspace: &'a Workspace,
    program: &'a str,
}

impl<'a> Git<'a> {
    /// Create a driver using `program` as the git binary.
    pub fn new(executor: &'a dyn Executor, workspace: &'a Workspace, program: &'a str) -> Self {
        Self {
            executor,
            workspace,
            program,
        }
    }

    /// The workspace this driver runs in.
    pub fn workspace(&self) -> &'a Workspace {
        self.workspace
    }

    /// The executor commands are sent to.
    pub fn executor(&self) -> &'a dyn Executor {
        self.executor
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(self.program)
    }

    fn in_repo(&self) -> CommandSpec {
        self.command().current_dir(self.workspace.repo_dir())
    }

    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.executor.run_checked(spec, self.workspace)?;
        log::trace!("{}", output.combined().trim());
        Ok(output)
    }

    fn push(&self, spec: &CommandSpec) -> Result<()> {
        let output = self.executor.run(spec, self.workspace)?;
        if output.is_success() {
            return Ok(());
        }
        Err(Error::from_push_output(
            spec.to_string(),
            output.exit_code,
            output.combined(),
        ))
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// `git config --global <key> <value>`
    pub fn config_global(&self, key: &str, value: &str) -> Result<()> {
        let spec = self.command().args(["config", "--global", key, value]);
        self.run_checked(&spec)?;
        Ok(())
    }

    // =========================================================================
    // Repository
    // =========================================================================

    /// Clone `branch` of `url` into the workspace's repo directory.
    pub fn clone_branch(&self, url: &str, branch: &str) -> Result<()> {
        let repo_dir = self.workspace.repo_dir();
        let spec = self
            .command()
            .args(["clone", "--no-tags", "--branch", branch, url])
            .arg(repo_dir.to_string_lossy());
        self.run_checked(&spec)?;
        Ok(())
    }

    /// Commit every modified tracked file.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        let spec = self
            .in_repo()
            .args(["commit", "--all", "--allow-empty", "-m", message]);
        self.run_checked(&spec)?;
        Ok(())
    }

    /// Stage everything in the work tree, including deletions.
    pub fn add_all(&self) -> Result<()> {
        let spec = self.in_repo().args(["add", "--all", "."]);
        self.run_checked(&spec)?;
        Ok(())
    }

    /// Commit the index.
    pub fn commit(&self, message: &str) -> Result<()> {
        let spec = self
            .in_repo()
            .args(["commit", "--allow-empty", "-m", message]);
        self.run_checked(&spec)?;
        Ok(())
    }

    /// Push the current branch to its upstream.
    pub fn push_head(&self) -> Result<()> {
        self.push(&self.in_repo().args(["push", REMOTE, "HEAD"]))
    }

    /// Push `branch` by name.
    pub fn push_branch(&self, branch: &str) -> Result<()> {
        self.push(&self.in_repo().args(["push", REMOTE, branch]))
    }

    /// Ask the remote whether a branch named exactly `branch` exists.
    pub fn branch_exists(&self, url: &str, branch: &str) -> Result<BranchState> {
        let refname = branch_ref(branch);
        let spec = self
            .in_repo()
            .args(["ls-remote", "--heads", "--exit-code", url, refname.as_str()]);
        let output = self.executor.run(&spec, self.workspace)?;
        classify_branch_lookup(&spec, output, &refname)
    }

    /// Check out an existing branch. The trailing `--` stops git from reading
    /// the name as a path when a directory of the same name exists.
    pub fn checkout(&self, branch: &str) -> Result<()> {
        let spec = self.in_repo().args(["checkout", branch, "--"]);
        self.run_checked(&spec)?;
        Ok(())
    }

    /// Start a branch with no parent commits.
    pub fn checkout_orphan(&self, branch: &str) -> Result<()> {
        let spec = self.in_repo().args(["checkout", "--orphan", branch]);
        self.run_checked(&spec)?;
        Ok(())
    }

    /// Empty the index without touching the work tree.
    pub fn clear_index(&self) -> Result<()> {
        let spec = self.in_repo().args(["read-tree", "--empty"]);
        self.run_checked(&spec)?;
        Ok(())
    }

    /// Resolve `HEAD` to a commit id.
    pub fn rev_parse_head(&self) -> Result<String> {
        let spec = self.in_repo().args(["rev-parse", "HEAD"]);
        let sha = self.run_checked(&spec)?.stdout_str();
        if sha.is_empty() {
            return Err(Error::Command {
                command: spec.to_string(),
                exit_code: Some(0),
                output: "empty commit id".to_string(),
            });
        }
        Ok(sha)
    }
}
