//! Core types for promotion requests and their results.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

// ============================================================================
// Image Changes
// ============================================================================

/// A single image to pin in the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageChange {
    /// Image repository, e.g. `ghcr.io/acme/app`.
    pub repository: String,
    /// New tag for the repository.
    pub tag: String,
}

impl ImageChange {
    /// Create a new image change.
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// The full image reference, `repo:tag`.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    /// Argument for `kustomize edit set image`, `repo=repo:tag`.
    pub fn set_image_arg(&self) -> String {
        format!("{}={}", self.repository, self.reference())
    }
}

impl fmt::Display for ImageChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl FromStr for ImageChange {
    type Err = Error;

    /// Parse `repo:tag`. A colon before the last `/` belongs to a registry
    /// port, so `localhost:5000/app:v2` splits into `localhost:5000/app` and
    /// `v2`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.contains('@') {
            return Err(Error::InvalidRequest(format!(
                "image {s:?} pins a digest; only tags are supported"
            )));
        }

        let name_start = s.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match s[name_start..].rfind(':') {
            Some(i) => (&s[..name_start + i], &s[name_start + i + 1..]),
            None => {
                return Err(Error::InvalidRequest(format!(
                    "image {s:?} has no tag (expected repo:tag)"
                )));
            }
        };

        if repository.is_empty() || tag.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "image {s:?} must have a non-empty repository and tag"
            )));
        }

        Ok(Self::new(repository, tag))
    }
}

// ============================================================================
// Promotion Request
// ============================================================================

/// Input to a promotion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRequest {
    /// Clone URL of the source repository.
    pub repo_url: String,
    /// Branch holding the overlays.
    pub source_branch: String,
    /// Branch receiving the rendered manifests.
    pub target_branch: String,
    /// Overlay directory inside the source branch. Defaults to the target
    /// branch name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_path: Option<PathBuf>,
    /// Images to pin, applied in order.
    pub images: Vec<ImageChange>,
}

impl PromotionRequest {
    /// Create a request whose overlay directory is named after the target branch.
    pub fn new(
        repo_url: impl Into<String>,
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
        images: Vec<ImageChange>,
    ) -> Self {
        Self {
            repo_url: repo_url.into(),
            source_branch: source_branch.into(),
            target_branch: target_branch.into(),
            overlay_path: None,
            images,
        }
    }

    /// Use an explicit overlay directory.
    pub fn with_overlay_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.overlay_path = Some(path.into());
        self
    }

    /// Overlay directory relative to the repository root.
    pub fn overlay_path(&self) -> &Path {
        self.overlay_path
            .as_deref()
            .unwrap_or_else(|| Path::new(&self.target_branch))
    }

    /// Check the request before any work is done.
    pub fn validate(&self) -> Result<()> {
        if self.repo_url.trim().is_empty() {
            return Err(Error::InvalidRequest("repository URL is empty".to_string()));
        }
        check_branch_name("source", &self.source_branch)?;
        check_branch_name("target", &self.target_branch)?;
        if self.source_branch == self.target_branch {
            return Err(Error::InvalidRequest(format!(
                "source and target branch are both {:?}",
                self.source_branch
            )));
        }
        if self.images.is_empty() {
            return Err(Error::InvalidRequest("no image changes".to_string()));
        }

        let overlay = self.overlay_path();
        let mut components = overlay.components();
        let valid = components.all(|c| matches!(c, Component::Normal(_)))
            && overlay.components().next().is_some();
        if !valid {
            return Err(Error::InvalidRequest(format!(
                "overlay path {} must be a relative path inside the repository",
                overlay.display()
            )));
        }

        Ok(())
    }
}

/// Reject names git would refuse as a branch, or read as an option.
///
/// Follows `git check-ref-format --branch`.
fn check_branch_name(kind: &str, name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(Error::InvalidRequest(format!(
            "{kind} branch {name:?} {reason}"
        )))
    };

    if name.is_empty() {
        return invalid("is empty");
    }
    if name.starts_with('-') {
        return invalid("must not start with '-'");
    }
    if name == "@" || name.contains("@{") {
        return invalid("must not contain '@{' or be '@'");
    }
    if name.contains("..") {
        return invalid("must not contain '..'");
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_ascii_control() || c.is_whitespace() || "~^:?*[\\".contains(*c))
    {
        return invalid(&format!("must not contain {c:?}"));
    }
    if name.ends_with('.') {
        return invalid("must not end with '.'");
    }
    let bad_component = name
        .split('/')
        .any(|part| part.is_empty() || part.starts_with('.') || part.ends_with(".lock"));
    if bad_component {
        return invalid("has an empty, hidden or '.lock' path component");
    }
    Ok(())
}

/// Outcome of a successful promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionResult {
    /// Commit id now at the head of the target branch.
    pub commit: String,
}

impl fmt::Display for PromotionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.commit)
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Record returned by a credential provider.
///
/// An all-empty record means "not found".
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Repository type; only `git` (or unset) records are usable.
    #[serde(default, rename = "type")]
    pub repo_type: String,
    /// PEM encoded SSH private key.
    #[serde(default)]
    pub ssh_private_key: Vec<u8>,
    /// Username for password authentication.
    #[serde(default)]
    pub username: String,
    /// Password or token.
    #[serde(default)]
    pub password: String,
}

impl CredentialRecord {
    /// Convert to credentials if the record holds anything usable.
    ///
    /// An SSH key wins over a password when both are present.
    pub fn usable(&self) -> Option<Credentials> {
        if !(self.repo_type.is_empty() || self.repo_type == "git") {
            return None;
        }
        if !self.ssh_private_key.is_empty() {
            return Some(Credentials::SshKey(self.ssh_private_key.clone()));
        }
        if !self.password.is_empty() {
            return Some(Credentials::UsernamePassword {
                username: self.username.clone(),
                password: self.password.clone(),
            });
        }
        None
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("repo_type", &self.repo_type)
            .field("ssh_private_key", &redacted(!self.ssh_private_key.is_empty()))
            .field("username", &self.username)
            .field("password", &redacted(!self.password.is_empty()))
            .finish()
    }
}

/// Authentication material for one repository.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// SSH private key bytes.
    SshKey(Vec<u8>),
    /// Username and password (or token).
    UsernamePassword {
        /// May be empty; a placeholder is used then.
        username: String,
        /// Password or token.
        password: String,
    },
}

impl Credentials {
    /// Short name of the modality, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SshKey(_) => "ssh-key",
            Self::UsernamePassword { .. } => "username-password",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SshKey(_) => f.write_str("SshKey(<redacted>)"),
            Self::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

fn redacted(present: bool) -> &'static str {
    if present { "<redacted>" } else { "" }
}

// ============================================================================
// Commit Identity
// ============================================================================

/// Author and committer used for every commit made by a promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdentity {
    /// `user.name`
    pub name: String,
    /// `user.email`
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self {
            name: "promoter".to_string(),
            email: "promoter@localhost".to_string(),
        }
    }
}
