//! Error types for promotion attempts.
//!
//! Every stage of a promotion fails with one of the variants below, usually
//! wrapped in one or more [`Error::Context`] layers naming the repository,
//! branch and operation that failed. [`Error::category`] looks through those
//! layers so callers can classify a failure without unwrapping it by hand.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type alias for promotion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of promotion errors.
///
/// None of these are retried by the core. [`ErrorCategory::PushRejected`]
/// is the only one a caller may reasonably retry, since it usually means
/// another attempt moved the remote branch first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The ephemeral workspace could not be allocated.
    Workspace,
    /// No usable credentials for the repository.
    Credential,
    /// An external tool exited non-zero.
    Command,
    /// The remote refused a push (concurrent modification).
    PushRejected,
    /// The overlay could not be patched.
    Patch,
    /// The overlay could not be rendered.
    Render,
    /// The promotion request itself is malformed.
    InvalidRequest,
    /// The deployment controller could not be notified.
    Sync,
    /// Local filesystem failure.
    Io,
}

impl ErrorCategory {
    /// Whether a fresh attempt has a reasonable chance of succeeding.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PushRejected)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Workspace => "Workspace allocation failed",
            Self::Credential => "No usable credentials",
            Self::Command => "External command failed",
            Self::PushRejected => "Push rejected by remote",
            Self::Patch => "Overlay patch failed",
            Self::Render => "Manifest rendering failed",
            Self::InvalidRequest => "Invalid promotion request",
            Self::Sync => "Sync trigger failed",
            Self::Io => "Filesystem error",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Workspace => "Check free space and permissions of the workspace directory",
            Self::Credential => "Configure an SSH key or username/password for the repository",
            Self::Command => "Inspect the captured command output above",
            Self::PushRejected => {
                "Another promotion probably updated the branch; re-trigger the promotion"
            }
            Self::Patch => "Verify the overlay directory exists and contains a kustomization",
            Self::Render => "Fix the overlay in the source branch; rendering is not retried",
            Self::InvalidRequest => "Check the repository URL, branches and image list",
            Self::Sync => "Check the deployment controller address and token",
            Self::Io => "Check directory permissions",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during a promotion attempt.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to allocate the ephemeral workspace.
    #[error("failed to allocate workspace under {path}: {source}")]
    Workspace {
        /// Directory the workspace was to be created in.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// No usable credentials could be resolved or materialized.
    #[error("credential error for {repo_url}: {message}")]
    Credential {
        /// Repository the credentials were resolved for.
        repo_url: String,
        /// What went wrong.
        message: String,
    },

    /// An external command exited non-zero (or could not be started).
    #[error("command `{command}` failed ({}): {}", describe_exit(.exit_code), .output.trim())]
    Command {
        /// Rendered command line.
        command: String,
        /// Exit code, if the process ran to completion.
        exit_code: Option<i32>,
        /// Combined stdout/stderr.
        output: String,
    },

    /// A push was refused by the remote.
    #[error("push rejected: `{command}`: {}", .output.trim())]
    PushRejected {
        /// Rendered command line.
        command: String,
        /// Combined stdout/stderr.
        output: String,
    },

    /// The overlay could not be patched for an image.
    #[error("failed to set image {image}: {message}")]
    Patch {
        /// Image reference being pinned (`repo:tag`).
        image: String,
        /// What went wrong.
        message: String,
    },

    /// The overlay could not be rendered.
    #[error("failed to render overlay {overlay}: {message}")]
    Render {
        /// Overlay directory.
        overlay: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The request failed validation.
    #[error("invalid promotion request: {0}")]
    InvalidRequest(String),

    /// Notifying the deployment controller failed.
    #[error("sync trigger failed: {message}")]
    Sync {
        /// What went wrong.
        message: String,
        /// HTTP status code if available.
        status: Option<u16>,
    },

    /// IO error during file operations.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved in the error.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Another error, annotated with the operation that was running.
    #[error("{context}")]
    Context {
        /// Repository, branch and operation being performed.
        context: String,
        /// The wrapped error.
        #[source]
        source: Box<Error>,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "did not run to completion".to_string(),
    }
}

/// Markers git prints when a push lost a race with another writer.
///
/// `[remote rejected]` is left out: hooks and branch protection report
/// through it, and those are not resolved by trying again.
const PUSH_REJECTION_MARKERS: &[&str] = &["[rejected]", "non-fast-forward", "fetch first"];

impl Error {
    /// Create an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a credential error.
    pub fn credential(repo_url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Credential {
            repo_url: repo_url.into(),
            message: message.into(),
        }
    }

    /// Classify a failed `git push`.
    ///
    /// Output naming a rejection becomes [`Error::PushRejected`], anything
    /// else stays a plain [`Error::Command`].
    pub fn from_push_output(command: String, exit_code: Option<i32>, output: String) -> Self {
        let lower = output.to_lowercase();
        if PUSH_REJECTION_MARKERS.iter().any(|m| lower.contains(m)) {
            return Self::PushRejected { command, output };
        }
        Self::Command {
            command,
            exit_code,
            output,
        }
    }

    /// Wrap this error with a description of the running operation.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping all [`Error::Context`] layers.
    #[must_use]
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Error::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Get the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            Error::Workspace { .. } => ErrorCategory::Workspace,
            Error::Credential { .. } => ErrorCategory::Credential,
            Error::Command { .. } => ErrorCategory::Command,
            Error::PushRejected { .. } => ErrorCategory::PushRejected,
            Error::Patch { .. } => ErrorCategory::Patch,
            Error::Render { .. } => ErrorCategory::Render,
            Error::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            Error::Sync { .. } => ErrorCategory::Sync,
            Error::Io { .. } => ErrorCategory::Io,
            Error::Context { .. } => unreachable!("root() strips context layers"),
        }
    }

    /// Whether this error is worth re-triggering the promotion for.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Sync {
                message: format!("HTTP {code}"),
                status: Some(code),
            },
            other => Self::Sync {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

/// Attach operation context to a [`Result`].
pub trait ResultExt<T> {
    /// Wrap the error, if any, with a lazily built context message.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_push_rejection_is_retryable() {
        assert!(ErrorCategory::PushRejected.is_retryable());
        assert!(!ErrorCategory::Command.is_retryable());
        assert!(!ErrorCategory::Render.is_retryable());
        assert!(!ErrorCategory::Credential.is_retryable());
        assert!(!ErrorCategory::Workspace.is_retryable());
    }

    #[test]
    fn test_category_looks_through_context() {
        let err = Error::Render {
            overlay: PathBuf::from("staging"),
            message: "boom".to_string(),
        }
        .context("error rendering branch \"staging\"")
        .context("promotion of https://example.com/repo.git failed");

        assert_eq!(err.category(), ErrorCategory::Render);
        assert!(matches!(err.root(), Error::Render { .. }));
        assert_eq!(
            err.to_string(),
            "promotion of https://example.com/repo.git failed"
        );
    }

    #[test]
    fn test_push_output_rejected() {
        let output = " ! [rejected]        main -> main (fetch first)\n\
                      error: failed to push some refs to 'origin'"
            .to_string();
        let err = Error::from_push_output("git push origin HEAD".to_string(), Some(1), output);
        assert_eq!(err.category(), ErrorCategory::PushRejected);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_push_output_hook_decline_is_not_retryable() {
        let output = "remote: protected branch\n \
                      ! [remote rejected] main -> main (pre-receive hook declined)\n\
                      error: failed to push some refs to 'origin'"
            .to_string();
        let err = Error::from_push_output("git push origin HEAD".to_string(), Some(1), output);
        assert_eq!(err.category(), ErrorCategory::Command);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_push_output_other_failure() {
        let err = Error::from_push_output(
            "git push origin HEAD".to_string(),
            Some(128),
            "fatal: could not read from remote repository".to_string(),
        );
        assert_eq!(err.category(), ErrorCategory::Command);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_command_display_includes_exit_code_and_output() {
        let err = Error::Command {
            command: "git clone --no-tags x repo".to_string(),
            exit_code: Some(128),
            output: "fatal: repository not found\n".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("exit code 128"));
        assert!(display.ends_with("fatal: repository not found"));
    }

    #[test]
    fn test_command_display_without_exit_code() {
        let err = Error::Command {
            command: "kustomize build".to_string(),
            exit_code: None,
            output: "No such file or directory".to_string(),
        };
        assert!(err.to_string().contains("did not run to completion"));
    }

    #[test]
    fn test_result_ext_wraps_error() {
        let result: Result<()> = Err(Error::InvalidRequest("no images".to_string()));
        let err = result.with_context(|| "validating request").unwrap_err();
        assert_eq!(err.to_string(), "validating request");
        assert_eq!(err.category(), ErrorCategory::InvalidRequest);
    }

    #[test]
    fn test_error_category_advice() {
        assert!(!ErrorCategory::PushRejected.advice().is_empty());
        assert!(!ErrorCategory::Credential.advice().is_empty());
        assert!(format!("{}", ErrorCategory::Render).contains("render"));
    }
}
