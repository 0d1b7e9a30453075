//! Branch publication state machine.
//!
//! After the overlay has been patched in the clone, [`BranchPublisher`]
//! walks through these states, one git (or kustomize) command per
//! transition:
//!
//! ```text
//! Cloned -> SourceCommitted -> SourcePushed -> Rendered
//!        -> TargetBranchResolved(Existing | Created) -> TargetCleaned
//!        -> ArtifactWritten -> TargetCommitted -> TargetPushed -> Done
//! ```
//!
//! A failed transition leaves the publisher in the last state it reached.
//! Nothing is rolled back: once `SourcePushed` is reached the source branch
//! keeps the new image tags even if publishing the rendered branch fails.
//!
//! The rendered branch is an orphan: it never shares history with the source
//! branch, and every commit on it replaces the whole tree with one file.

use crate::error::{Error, Result, ResultExt};
use crate::git::{BranchState, Git};
use crate::overlay::{Kustomize, RenderedArtifact};
use crate::progress::{PublishObserver, Stage};
use crate::types::{ImageChange, PromotionRequest, PromotionResult};
use std::fmt;
use std::fs;
use std::path::Path;

/// File name of the rendered manifests on the target branch.
pub const ARTIFACT_NAME: &str = "all.yaml";

const COMMIT_PREFIX: &str = "promoter:";

/// How the target branch was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOrigin {
    /// It already existed on the remote and was checked out.
    Existing,
    /// It did not exist and was created as an orphan.
    Created,
}

/// Where the publisher is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishState {
    /// Source branch cloned and overlay patched.
    Cloned,
    /// Overlay changes committed on the source branch.
    SourceCommitted,
    /// Source branch pushed. Nothing after this point is undone.
    SourcePushed,
    /// Overlay rendered; the artifact is held in memory.
    Rendered,
    /// Target branch checked out or created.
    TargetBranchResolved(BranchOrigin),
    /// Everything but `.git` removed from the work tree.
    TargetCleaned,
    /// Artifact written to the repository root.
    ArtifactWritten,
    /// Artifact committed on the target branch.
    TargetCommitted,
    /// Target branch pushed.
    TargetPushed,
    /// Published.
    Done {
        /// New commit of the target branch.
        commit: String,
    },
}

impl PublishState {
    /// Whether the state machine has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloned => f.write_str("cloned source branch"),
            Self::SourceCommitted => f.write_str("committed overlay changes"),
            Self::SourcePushed => f.write_str("pushed source branch"),
            Self::Rendered => f.write_str("rendered manifests"),
            Self::TargetBranchResolved(BranchOrigin::Existing) => {
                f.write_str("checked out target branch")
            }
            Self::TargetBranchResolved(BranchOrigin::Created) => {
                f.write_str("created target branch")
            }
            Self::TargetCleaned => f.write_str("cleaned target branch"),
            Self::ArtifactWritten => f.write_str("wrote rendered manifests"),
            Self::TargetCommitted => f.write_str("committed target branch"),
            Self::TargetPushed => f.write_str("pushed target branch"),
            Self::Done { commit } => write!(f, "published {commit}"),
        }
    }
}

// =============================================================================
// Commit messages
// =============================================================================

fn push_bullets(message: &mut String, images: &[ImageChange]) {
    for image in images {
        message.push_str("\n * ");
        message.push_str(&image.reference());
    }
}

/// Message for the overlay commit on the source branch.
pub fn source_commit_message(target_branch: &str, images: &[ImageChange]) -> String {
    if let [image] = images {
        return format!("{COMMIT_PREFIX} updating {target_branch} to use image {image}");
    }
    let mut message = format!("{COMMIT_PREFIX} updating {target_branch} to use new images");
    push_bullets(&mut message, images);
    message
}

/// Message for the artifact commit on the target branch.
pub fn target_commit_message(images: &[ImageChange]) -> String {
    if let [image] = images {
        return format!("{COMMIT_PREFIX} updating to use new image {image}");
    }
    let mut message = format!("{COMMIT_PREFIX} updating to use new images");
    push_bullets(&mut message, images);
    message
}

/// Message for the empty root commit of a new target branch.
pub fn orphan_root_message(target_branch: &str) -> String {
    format!("{COMMIT_PREFIX} initializing rendered branch {target_branch}")
}

// =============================================================================
// Cleanup
// =============================================================================

/// Remove every top-level entry of `repo_dir` except `.git`.
pub fn clean_root(repo_dir: &Path) -> Result<()> {
    let entries = fs::read_dir(repo_dir).map_err(|e| Error::io(repo_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(repo_dir, e))?;
        if entry.file_name() == ".git" {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| Error::io(&path, e))?;
        if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        }
        .map_err(|e| Error::io(&path, e))?;
    }
    Ok(())
}

// =============================================================================
// Publisher
// =============================================================================

/// Publishes a patched clone: source branch first, then the rendered branch.
pub struct BranchPublisher<'a> {
    git: Git<'a>,
    kustomize: &'a Kustomize,
    request: &'a PromotionRequest,
    artifact_name: String,
    artifact: Option<RenderedArtifact>,
    state: PublishState,
}

impl<'a> BranchPublisher<'a> {
    /// Start from a freshly cloned and patched repository.
    pub fn new(git: Git<'a>, kustomize: &'a Kustomize, request: &'a PromotionRequest) -> Self {
        Self {
            git,
            kustomize,
            request,
            artifact_name: ARTIFACT_NAME.to_string(),
            artifact: None,
            state: PublishState::Cloned,
        }
    }

    /// Write the rendered manifests under a different file name.
    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = name.into();
        self
    }

    /// The state reached so far.
    pub fn state(&self) -> &PublishState {
        &self.state
    }

    /// Perform the next transition.
    ///
    /// On failure the state is left unchanged. Stepping a finished publisher
    /// does nothing.
    pub fn step(&mut self) -> Result<&PublishState> {
        let next = self.transition()?;
        log::debug!(
            "repo={} branch={}: {}",
            self.request.repo_url,
            self.request.target_branch,
            next
        );
        self.state = next;
        Ok(&self.state)
    }

    /// Step until done, reporting every state reached to `observer`.
    pub fn run(mut self, observer: &dyn PublishObserver) -> Result<PromotionResult> {
        observer.stage(&Stage::Publish(self.state.clone()));
        loop {
            let state = self.step()?;
            observer.stage(&Stage::Publish(state.clone()));
            if let PublishState::Done { commit } = state {
                return Ok(PromotionResult {
                    commit: commit.clone(),
                });
            }
        }
    }

    fn transition(&mut self) -> Result<PublishState> {
        let request = self.request;
        let source = request.source_branch.as_str();
        let target = request.target_branch.as_str();
        let url = request.repo_url.as_str();

        let next = match self.state.clone() {
            PublishState::Cloned => {
                self.git
                    .commit_all(&source_commit_message(target, &request.images))
                    .with_context(|| format!("error committing changes to branch {source:?}"))?;
                PublishState::SourceCommitted
            }
            PublishState::SourceCommitted => {
                self.git
                    .push_head()
                    .with_context(|| format!("error pushing branch {source:?} of {url}"))?;
                PublishState::SourcePushed
            }
            PublishState::SourcePushed => {
                let overlay_dir = self.git.workspace().repo_dir().join(request.overlay_path());
                let artifact = self
                    .kustomize
                    .render(self.git.executor(), self.git.workspace(), &overlay_dir)
                    .with_context(|| format!("error rendering branch {target:?}"))?;
                self.artifact = Some(artifact);
                PublishState::Rendered
            }
            PublishState::Rendered => {
                let origin = self.resolve_target()?;
                PublishState::TargetBranchResolved(origin)
            }
            PublishState::TargetBranchResolved(_) => {
                clean_root(&self.git.workspace().repo_dir())
                    .with_context(|| format!("error cleaning branch {target:?}"))?;
                PublishState::TargetCleaned
            }
            PublishState::TargetCleaned => {
                let path = self.git.workspace().repo_dir().join(&self.artifact_name);
                self.artifact
                    .as_ref()
                    .ok_or_else(|| Error::Render {
                        overlay: request.overlay_path().to_path_buf(),
                        message: "no rendered artifact to write".to_string(),
                    })
                    .and_then(|artifact| artifact.write_to(&path))
                    .with_context(|| format!("error writing manifests to branch {target:?}"))?;
                PublishState::ArtifactWritten
            }
            PublishState::ArtifactWritten => {
                self.git
                    .add_all()
                    .and_then(|()| self.git.commit(&target_commit_message(&request.images)))
                    .with_context(|| format!("error committing changes to branch {target:?}"))?;
                PublishState::TargetCommitted
            }
            PublishState::TargetCommitted => {
                self.git
                    .push_branch(target)
                    .with_context(|| format!("error pushing branch {target:?} of {url}"))?;
                PublishState::TargetPushed
            }
            PublishState::TargetPushed => {
                let commit = self
                    .git
                    .rev_parse_head()
                    .with_context(|| format!("error reading commit of branch {target:?}"))?;
                PublishState::Done { commit }
            }
            done @ PublishState::Done { .. } => done,
        };
        Ok(next)
    }

    fn resolve_target(&self) -> Result<BranchOrigin> {
        let request = self.request;
        let target = request.target_branch.as_str();

        let state = self
            .git
            .branch_exists(&request.repo_url, target)
            .with_context(|| format!("error checking if branch {target:?} exists"))?;

        match state {
            BranchState::Exists => {
                self.git
                    .checkout(target)
                    .with_context(|| format!("error checking out branch {target:?}"))?;
                Ok(BranchOrigin::Existing)
            }
            BranchState::NotFound => {
                log::info!("branch {target:?} does not exist on remote, creating it");
                self.git
                    .checkout_orphan(target)
                    .and_then(|()| self.git.clear_index())
                    .and_then(|()| self.git.commit(&orphan_root_message(target)))
                    .with_context(|| format!("error creating branch {target:?}"))?;
                Ok(BranchOrigin::Created)
            }
        }
    }
}
