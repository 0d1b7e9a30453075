use anyhow::{Context as _, Result};
use indicatif::{ProgressBar, ProgressStyle};
use promotekit::{BranchOrigin, Promoter, PromotionRequest, PublishObserver, PublishState, Stage};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::Context;
use crate::cli::PromoteArgs;
use crate::config::Config;
use crate::ui;

pub fn run(ctx: &Context, args: PromoteArgs) -> Result<()> {
    let request = build_request(&args)?;
    request.validate().context("Invalid promotion request")?;

    let loaded = Config::load(ctx.config.as_deref())?;
    let config = &loaded.config;

    let mut options = config.promoter_options();
    if args.keep_workspace {
        options.keep_workspace = true;
    }
    let keep_workspace = options.keep_workspace;

    let promoter = Promoter::new(Box::new(config.credential_provider()))
        .with_options(options)
        .with_sync(config.sync_trigger(args.no_sync)?);

    if !ctx.quiet {
        print_request(&request);
    }

    // Log output and a spinner would interleave, so -v turns the spinner off.
    let observer = SpinnerObserver::new(ctx.quiet || ctx.verbose > 0);
    let result = promoter.promote_with_observer(&request, &observer);
    observer.finish();

    let result = result.with_context(|| {
        format!(
            "Failed to promote {} into {}",
            request.repo_url, request.target_branch
        )
    })?;

    if !ctx.quiet {
        ui::success(&format!(
            "Published {} at {}",
            request.target_branch,
            ui::short_commit(&result.commit)
        ));
        if keep_workspace {
            ui::info("Workspace kept; run with -v to see its path");
        }
    }
    println!("{}", result.commit);

    Ok(())
}

/// Assemble the request from a JSON file or from the individual flags.
fn build_request(args: &PromoteArgs) -> Result<PromotionRequest> {
    if let Some(path) = &args.request {
        return load_request(path);
    }

    let mut request = PromotionRequest::new(
        args.repo.clone().context("--repo is required")?,
        args.source_branch
            .clone()
            .context("--source-branch is required")?,
        args.target_branch
            .clone()
            .context("--target-branch is required")?,
        args.images.clone(),
    );
    if let Some(overlay) = &args.overlay {
        request = request.with_overlay_path(overlay);
    }
    Ok(request)
}

fn load_request(path: &Path) -> Result<PromotionRequest> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid promotion request in {}", path.display()))
}

fn print_request(request: &PromotionRequest) {
    ui::header("Promotion");
    ui::kv("repository", &request.repo_url);
    ui::kv("source", &request.source_branch);
    ui::kv("target", &request.target_branch);
    ui::kv("overlay", &request.overlay_path().display().to_string());
    for image in &request.images {
        ui::kv("image", &image.to_string());
    }
    println!();
}

/// Shows the current stage on a spinner.
struct SpinnerObserver {
    bar: ProgressBar,
}

impl SpinnerObserver {
    fn new(hidden: bool) -> Self {
        if hidden {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PublishObserver for SpinnerObserver {
    fn stage(&self, stage: &Stage) {
        if let Stage::Publish(PublishState::TargetBranchResolved(BranchOrigin::Created)) = stage {
            self.bar
                .suspend(|| ui::info("Target branch did not exist; created it as an orphan"));
        }
        self.bar.set_message(stage.to_string());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use promotekit::ImageChange;
    use std::path::PathBuf;

    fn args() -> PromoteArgs {
        PromoteArgs {
            repo: Some("git@github.com:acme/deploy.git".to_string()),
            source_branch: Some("main".to_string()),
            target_branch: Some("staging".to_string()),
            overlay: None,
            images: vec![ImageChange::new("app", "v2")],
            request: None,
            keep_workspace: false,
            no_sync: false,
        }
    }

    #[test]
    fn test_request_from_flags() {
        let request = build_request(&args()).unwrap();
        assert_eq!(request.repo_url, "git@github.com:acme/deploy.git");
        assert_eq!(request.overlay_path(), Path::new("staging"));
        assert_eq!(request.images, [ImageChange::new("app", "v2")]);
    }

    #[test]
    fn test_request_overlay_flag() {
        let request = build_request(&PromoteArgs {
            overlay: Some(PathBuf::from("envs/staging")),
            ..args()
        })
        .unwrap();
        assert_eq!(request.overlay_path(), Path::new("envs/staging"));
    }

    #[test]
    fn test_request_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        fs::write(
            &path,
            r#"{
                "repo_url": "https://github.com/acme/deploy.git",
                "source_branch": "main",
                "target_branch": "production",
                "images": [
                    {"repository": "ghcr.io/acme/app", "tag": "v2"},
                    {"repository": "ghcr.io/acme/worker", "tag": "v9"}
                ]
            }"#,
        )
        .unwrap();

        let request = build_request(&PromoteArgs {
            repo: None,
            source_branch: None,
            target_branch: None,
            images: Vec::new(),
            request: Some(path),
            ..args()
        })
        .unwrap();

        assert_eq!(request.target_branch, "production");
        assert_eq!(request.images.len(), 2);
        request.validate().unwrap();
    }

    #[test]
    fn test_request_file_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_request(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid promotion request"));
    }
}
