//! Progress reporting for promotion attempts.
//!
//! The core never prints. Callers that want feedback pass a
//! [`PublishObserver`] and get told about every stage as it starts.

use crate::publisher::PublishState;
use std::fmt;

/// A step of a promotion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Allocating the workspace.
    Workspace,
    /// Resolving and installing credentials.
    Credentials,
    /// Cloning the source branch.
    Clone,
    /// Pinning image `index` (zero based) of `total`.
    Patch {
        /// Position in the request's image list.
        index: usize,
        /// Number of images in the request.
        total: usize,
    },
    /// The branch publisher entered a state.
    Publish(PublishState),
    /// Notifying the deployment controller.
    Sync,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workspace => f.write_str("allocating workspace"),
            Self::Credentials => f.write_str("installing credentials"),
            Self::Clone => f.write_str("cloning source branch"),
            Self::Patch { index, total } => write!(f, "patching image {}/{}", index + 1, total),
            Self::Publish(state) => write!(f, "{state}"),
            Self::Sync => f.write_str("triggering sync"),
        }
    }
}

/// Receives stage notifications.
pub trait PublishObserver: Send + Sync {
    /// Called when `stage` starts (or, for publisher states, is reached).
    fn stage(&self, stage: &Stage);
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl PublishObserver for NoProgress {
    fn stage(&self, _stage: &Stage) {}
}
