//! # promotekit
//!
//! GitOps image promotion: pin new image tags in a kustomize overlay, render
//! the overlay, and publish the result to a per-environment branch that a
//! deployment controller watches.
//!
//! One promotion attempt runs strictly in order:
//!
//! 1. allocate a private [`Workspace`] that serves as `$HOME` for every tool
//! 2. resolve credentials and install them into the workspace
//! 3. clone the source branch
//! 4. `kustomize edit set image` once per image change
//! 5. run the [`BranchPublisher`] state machine (commit and push the source
//!    branch, render, replace the rendered branch's content, push it)
//! 6. notify the deployment controller through a [`SyncTrigger`]
//!
//! Nothing is retried and nothing is rolled back. A failure after the source
//! branch was pushed leaves that push in place.
//!
//! ## Example
//!
//! ```no_run
//! use promotekit::{CredentialRecord, ImageChange, Promoter, PromotionRequest, StaticCredentialProvider};
//!
//! let mut credentials = StaticCredentialProvider::new();
//! credentials.add_repository(
//!     "https://github.com/acme/deploy.git",
//!     CredentialRecord {
//!         username: "bot".to_string(),
//!         password: "token".to_string(),
//!         ..Default::default()
//!     },
//! );
//!
//! let request = PromotionRequest::new(
//!     "https://github.com/acme/deploy.git",
//!     "main",
//!     "staging",
//!     vec![ImageChange::new("ghcr.io/acme/app", "v2")],
//! );
//!
//! let result = Promoter::new(Box::new(credentials)).promote(&request).unwrap();
//! println!("published {}", result.commit);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod credentials;
pub mod error;
pub mod exec;
pub mod git;
pub mod overlay;
pub mod progress;
pub mod publisher;
pub mod sync;
pub mod types;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use credentials::{CredentialProvider, StaticCredentialProvider};
pub use error::{Error, ErrorCategory, Result, ResultExt};
pub use exec::{CommandOutput, CommandSpec, Executor, ProcessExecutor};
pub use overlay::{Kustomize, RenderedArtifact};
pub use progress::{NoProgress, PublishObserver, Stage};
pub use publisher::{ARTIFACT_NAME, BranchOrigin, BranchPublisher, PublishState};
pub use sync::{ArgoCdSync, NoSync, SyncTrigger};
pub use types::{
    CommitIdentity, CredentialRecord, Credentials, ImageChange, PromotionRequest, PromotionResult,
};
pub use workspace::{Workspace, WorkspaceManager};

use git::Git;
use std::path::PathBuf;

/// Tunables for a [`Promoter`].
#[derive(Debug, Clone)]
pub struct PromoterOptions {
    /// Git binary.
    pub git: String,
    /// Kustomize binary.
    pub kustomize: String,
    /// Author and committer of every commit.
    pub identity: CommitIdentity,
    /// File name of the rendered manifests on the target branch.
    pub artifact_name: String,
    /// Directory workspaces are created in; the system temp dir if unset.
    pub workspace_base: Option<PathBuf>,
    /// Leave workspaces on disk after the attempt.
    pub keep_workspace: bool,
}

impl Default for PromoterOptions {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            kustomize: "kustomize".to_string(),
            identity: CommitIdentity::default(),
            artifact_name: ARTIFACT_NAME.to_string(),
            workspace_base: None,
            keep_workspace: false,
        }
    }
}

/// Runs promotion attempts.
///
/// Attempts share nothing but the collaborators held here, so one
/// `Promoter` can serve concurrent attempts for different branches.
pub struct Promoter {
    credentials: Box<dyn CredentialProvider>,
    executor: Box<dyn Executor>,
    sync: Box<dyn SyncTrigger>,
    options: PromoterOptions,
}

impl Promoter {
    /// Create a promoter that runs real processes and triggers no sync.
    pub fn new(credentials: Box<dyn CredentialProvider>) -> Self {
        Self {
            credentials,
            executor: Box::new(ProcessExecutor::new()),
            sync: Box::new(NoSync),
            options: PromoterOptions::default(),
        }
    }

    /// Replace the command executor (useful for testing).
    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Notify a deployment controller after publishing.
    pub fn with_sync(mut self, sync: Box<dyn SyncTrigger>) -> Self {
        self.sync = sync;
        self
    }

    /// Replace the options.
    pub fn with_options(mut self, options: PromoterOptions) -> Self {
        self.options = options;
        self
    }

    /// Current options.
    pub fn options(&self) -> &PromoterOptions {
        &self.options
    }

    /// Run one promotion attempt.
    pub fn promote(&self, request: &PromotionRequest) -> Result<PromotionResult> {
        self.promote_with_observer(request, &NoProgress)
    }

    /// Run one promotion attempt, reporting progress to `observer`.
    pub fn promote_with_observer(
        &self,
        request: &PromotionRequest,
        observer: &dyn PublishObserver,
    ) -> Result<PromotionResult> {
        request.validate()?;
        self.attempt(request, observer).with_context(|| {
            format!(
                "promotion of {} from {:?} to {:?} failed",
                request.repo_url, request.source_branch, request.target_branch
            )
        })
    }

    fn attempt(
        &self,
        request: &PromotionRequest,
        observer: &dyn PublishObserver,
    ) -> Result<PromotionResult> {
        let url = request.repo_url.as_str();
        let source = request.source_branch.as_str();

        observer.stage(&Stage::Workspace);
        let mut manager = WorkspaceManager::new().keep(self.options.keep_workspace);
        if let Some(base) = &self.options.workspace_base {
            manager = manager.with_base(base);
        }
        let workspace = manager.acquire()?;
        log::debug!("repo={} branch={}: workspace {}", url, source, workspace.root().display());

        let git = Git::new(self.executor.as_ref(), &workspace, &self.options.git);

        observer.stage(&Stage::Credentials);
        credentials::provision(self.credentials.as_ref(), &git, &self.options.identity, url)?;

        observer.stage(&Stage::Clone);
        git.clone_branch(url, source)
            .with_context(|| format!("error cloning branch {source:?} of {url}"))?;

        let kustomize = Kustomize::new(&self.options.kustomize);
        let overlay_dir = workspace.repo_dir().join(request.overlay_path());
        kustomize.set_images(
            self.executor.as_ref(),
            &workspace,
            &overlay_dir,
            &request.images,
            observer,
        )?;

        let result = BranchPublisher::new(git, &kustomize, request)
            .with_artifact_name(&self.options.artifact_name)
            .run(observer)?;

        observer.stage(&Stage::Sync);
        self.sync.trigger(request, &result).with_context(|| {
            format!(
                "branch {:?} published at {} but {} sync failed",
                request.target_branch,
                result.commit,
                self.sync.name()
            )
        })?;

        log::info!(
            "promoted {} image(s) to {:?} at {}",
            request.images.len(),
            request.target_branch,
            result.commit
        );
        Ok(result)
    }
}
