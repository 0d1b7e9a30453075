//! Notifying the deployment controller after a successful promotion.
//!
//! The only real implementation talks to Argo CD through the Kubernetes API:
//! one merge patch on the `Application` that asks for a hard refresh and a
//! sync of the rendered branch. The patch being accepted is all that is
//! checked; sync progress is not polled.

use crate::error::{Error, Result};
use crate::types::{PromotionRequest, PromotionResult};
use serde_json::json;

/// Annotation Argo CD reads to force a refresh.
pub const REFRESH_ANNOTATION: &str = "argocd.argoproj.io/refresh";

const MERGE_PATCH: &str = "application/merge-patch+json";

/// Hands a published commit to whatever deploys it.
pub trait SyncTrigger: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Ask for `result` to be deployed.
    fn trigger(&self, request: &PromotionRequest, result: &PromotionResult) -> Result<()>;
}

/// Does nothing; the controller is expected to notice the push by itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSync;

impl SyncTrigger for NoSync {
    fn name(&self) -> &'static str {
        "none"
    }

    fn trigger(&self, request: &PromotionRequest, result: &PromotionResult) -> Result<()> {
        log::debug!(
            "no sync trigger configured for branch {:?} at {}",
            request.target_branch,
            result.commit
        );
        Ok(())
    }
}

/// Patches an Argo CD `Application` to refresh and sync.
pub struct ArgoCdSync {
    agent: ureq::Agent,
    api_server: String,
    namespace: String,
    application: Option<String>,
    token: Option<String>,
}

impl ArgoCdSync {
    /// Target Applications in `namespace` on the cluster at `api_server`.
    pub fn new(api_server: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            api_server: api_server.into().trim_end_matches('/').to_string(),
            namespace: namespace.into(),
            application: None,
            token: None,
        }
    }

    /// Always patch this Application instead of the one named after the
    /// target branch.
    pub fn with_application(mut self, name: impl Into<String>) -> Self {
        self.application = Some(name.into());
        self
    }

    /// Authenticate with a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Application to patch for `request`.
    pub fn application_for<'r>(&'r self, request: &'r PromotionRequest) -> &'r str {
        self.application
            .as_deref()
            .unwrap_or(&request.target_branch)
    }

    /// Resource URL of the Application.
    pub fn application_url(&self, application: &str) -> String {
        format!(
            "{}/apis/argoproj.io/v1alpha1/namespaces/{}/applications/{}",
            self.api_server, self.namespace, application
        )
    }

    /// Merge patch requesting a hard refresh and a sync of `revision`.
    pub fn patch_body(revision: &str) -> serde_json::Value {
        json!({
            "metadata": {
                "annotations": {
                    REFRESH_ANNOTATION: "hard"
                }
            },
            "operation": {
                "sync": {
                    "revision": revision
                }
            }
        })
    }
}

impl SyncTrigger for ArgoCdSync {
    fn name(&self) -> &'static str {
        "argocd"
    }

    fn trigger(&self, request: &PromotionRequest, result: &PromotionResult) -> Result<()> {
        let application = self.application_for(request);
        let url = self.application_url(application);
        let body = serde_json::to_vec(&Self::patch_body(&request.target_branch)).map_err(|e| {
            Error::Sync {
                message: format!("failed to encode patch: {e}"),
                status: None,
            }
        })?;

        let mut builder = self.agent.patch(&url).header("User-Agent", "promoter");
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        builder
            .content_type(MERGE_PATCH)
            .send(&body[..])
            .map_err(|e| {
                Error::from(e).context(format!(
                    "error patching Argo CD Application {application:?} to coerce refresh and sync"
                ))
            })?;

        log::info!(
            "triggered refresh of Argo CD Application {:?} at {}",
            application,
            result.commit
        );
        Ok(())
    }
}
