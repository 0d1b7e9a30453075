//! Overlay patching and manifest rendering with `kustomize`.
//!
//! Both operations run with the overlay directory as the working directory:
//! `kustomize edit set image` pins each image, `kustomize build` prints the
//! rendered manifests on stdout.

use crate::error::{Error, Result, ResultExt};
use crate::exec::{CommandSpec, Executor};
use crate::progress::{PublishObserver, Stage};
use crate::types::ImageChange;
use crate::workspace::Workspace;
use std::fs;
use std::path::{Path, PathBuf};

/// Rendered manifests for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    bytes: Vec<u8>,
}

impl RenderedArtifact {
    /// Wrap rendered bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Raw content.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the render produced nothing.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Write to `path`, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.bytes).map_err(|e| Error::io(path, e))
    }
}

/// Driver for the `kustomize` binary.
#[derive(Debug, Clone)]
pub struct Kustomize {
    program: String,
}

impl Default for Kustomize {
    fn default() -> Self {
        Self::new("kustomize")
    }
}

impl Kustomize {
    /// Use `program` as the kustomize binary.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Pin one image in the overlay to `repo:tag`.
    pub fn set_image(
        &self,
        executor: &dyn Executor,
        workspace: &Workspace,
        overlay_dir: &Path,
        change: &ImageChange,
    ) -> Result<()> {
        let patch_error = |message: String| Error::Patch {
            image: change.reference(),
            message,
        };

        if !overlay_dir.is_dir() {
            return Err(patch_error(format!(
                "overlay directory {} does not exist",
                overlay_dir.display()
            )));
        }

        let spec = CommandSpec::new(&self.program)
            .args(["edit", "set", "image"])
            .arg(change.set_image_arg())
            .current_dir(overlay_dir);
        executor
            .run_checked(&spec, workspace)
            .map_err(|e| patch_error(e.to_string()))?;

        log::debug!("set image {} in {}", change, overlay_dir.display());
        Ok(())
    }

    /// Pin every image, in order, reporting each one to `observer`.
    pub fn set_images(
        &self,
        executor: &dyn Executor,
        workspace: &Workspace,
        overlay_dir: &Path,
        images: &[ImageChange],
        observer: &dyn PublishObserver,
    ) -> Result<()> {
        let total = images.len();
        for (index, change) in images.iter().enumerate() {
            observer.stage(&Stage::Patch { index, total });
            self.set_image(executor, workspace, overlay_dir, change)
                .with_context(|| {
                    format!("error setting image {change} in overlay {}", overlay_dir.display())
                })?;
        }
        Ok(())
    }

    /// Render the overlay. Any non-zero exit is a terminal failure.
    pub fn render(
        &self,
        executor: &dyn Executor,
        workspace: &Workspace,
        overlay_dir: &Path,
    ) -> Result<RenderedArtifact> {
        let render_error = |message: String| Error::Render {
            overlay: PathBuf::from(overlay_dir),
            message,
        };

        let spec = CommandSpec::new(&self.program)
            .arg("build")
            .current_dir(overlay_dir);
        let output = executor
            .run_checked(&spec, workspace)
            .map_err(|e| render_error(e.to_string()))?;

        let artifact = RenderedArtifact::new(output.stdout);
        log::debug!(
            "rendered {} bytes from {}",
            artifact.len(),
            overlay_dir.display()
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::exec::CommandOutput;
    use crate::progress::tests::CollectingObserver;
    use crate::testing::RecordingExecutor;
    use crate::workspace::WorkspaceManager;

    fn overlay_workspace() -> (tempfile::TempDir, Workspace, PathBuf) {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new().with_base(base.path()).acquire().unwrap();
        let overlay = ws.repo_dir().join("staging");
        fs::create_dir_all(&overlay).unwrap();
        (base, ws, overlay)
    }

    #[test]
    fn test_set_images_invokes_tool_once_per_change() {
        let (_base, ws, overlay) = overlay_workspace();
        let executor = RecordingExecutor::new();
        let images = vec![
            ImageChange::new("app", "v2"),
            ImageChange::new("ghcr.io/acme/worker", "1.4.0"),
            ImageChange::new("sidecar", "latest"),
        ];

        let observer = CollectingObserver::default();

        Kustomize::default()
            .set_images(&executor, &ws, &overlay, &images, &observer)
            .unwrap();

        let calls = executor.calls();
        assert_eq!(calls.len(), images.len());
        assert_eq!(calls[0].args, ["edit", "set", "image", "app=app:v2"]);
        assert_eq!(
            calls[1].args[3],
            "ghcr.io/acme/worker=ghcr.io/acme/worker:1.4.0"
        );
        assert_eq!(calls[2].args[3], "sidecar=sidecar:latest");
        assert!(calls.iter().all(|c| c.cwd.as_deref() == Some(overlay.as_path())));
        assert_eq!(
            *observer.stages.lock().unwrap(),
            [0, 1, 2].map(|index| Stage::Patch { index, total: 3 })
        );
    }

    #[test]
    fn test_set_image_missing_overlay_is_patch_error() {
        let (_base, ws, overlay) = overlay_workspace();
        let executor = RecordingExecutor::new();

        let err = Kustomize::default()
            .set_image(
                &executor,
                &ws,
                &overlay.join("missing"),
                &ImageChange::new("app", "v2"),
            )
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Patch);
        assert!(executor.calls().is_empty());
    }

    #[test]
    fn test_set_image_tool_failure_is_patch_error() {
        let (_base, ws, overlay) = overlay_workspace();
        let executor = RecordingExecutor::new().respond(&["edit"], |_| {
            CommandOutput::failure(1, "Error: Missing kustomization file")
        });

        let err = Kustomize::default()
            .set_image(&executor, &ws, &overlay, &ImageChange::new("app", "v2"))
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Patch);
        assert!(err.to_string().contains("Missing kustomization file"));
    }

    #[test]
    fn test_render_captures_stdout() {
        let (_base, ws, overlay) = overlay_workspace();
        let executor = RecordingExecutor::new()
            .respond(&["build"], |_| CommandOutput::success("kind: Deployment\n"));

        let artifact = Kustomize::new("/opt/bin/kustomize")
            .render(&executor, &ws, &overlay)
            .unwrap();

        assert_eq!(artifact.as_bytes(), b"kind: Deployment\n");
        assert_eq!(executor.calls()[0].program, "/opt/bin/kustomize");
    }

    #[test]
    fn test_render_failure_is_render_error() {
        let (_base, ws, overlay) = overlay_workspace();
        let executor = RecordingExecutor::new()
            .respond(&["build"], |_| CommandOutput::failure(1, "Error: accumulating resources"));

        let err = Kustomize::default()
            .render(&executor, &ws, &overlay)
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Render);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_artifact_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.yaml");
        fs::write(&path, "old content that is longer").unwrap();

        RenderedArtifact::new("new").write_to(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }
}
