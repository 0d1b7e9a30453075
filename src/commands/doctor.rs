use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use std::process::Command;

use crate::Context;
use crate::config::{Config, LoadedConfig};
use crate::ui;

struct Issue {
    summary: String,
    fix: String,
}

pub fn run(ctx: &Context) -> Result<()> {
    ui::header("Promoter Health Check");

    let mut issues: Vec<Issue> = Vec::new();

    let loaded = check_config(ctx, &mut issues);
    let config = loaded.as_ref().map(|l| &l.config);

    let git = config.map_or("git", |c| c.tools.git());
    let kustomize = config.map_or("kustomize", |c| c.tools.kustomize());
    check_tools(
        &[
            (git, "Version control"),
            (kustomize, "Overlay patching and rendering"),
        ],
        &mut issues,
    );

    if let Some(config) = config {
        check_credentials(config, &mut issues);
        check_sync(config, &mut issues);
    }

    println!();
    if issues.is_empty() {
        ui::success("Ready to promote");
        return Ok(());
    }

    let count = issues.len();
    let label = if count == 1 { "Issue" } else { "Issues" };
    ui::header(&format!("{count} {label} Found"));
    for (i, issue) in issues.iter().enumerate() {
        println!("  {} {}", format!("{}.", i + 1).bold(), issue.summary);
        println!("      {} {}", "Fix:".cyan(), issue.fix);
    }
    anyhow::bail!("{count} doctor check(s) failed")
}

fn check_config(ctx: &Context, issues: &mut Vec<Issue>) -> Option<LoadedConfig> {
    ui::section("Configuration");

    match Config::load(ctx.config.as_deref()) {
        Ok(loaded) => {
            let detail = if loaded.found {
                "loaded".to_string()
            } else {
                "not found, using defaults".to_string()
            };
            ui::check(true, &loaded.path.display().to_string(), &detail);
            Some(loaded)
        }
        Err(e) => {
            ui::check(false, "config.toml", &format!("{e:#}"));
            issues.push(Issue {
                summary: "Configuration could not be loaded".to_string(),
                fix: format!("Fix the file or point --config elsewhere ({e:#})"),
            });
            None
        }
    }
}

fn check_tools(tools: &[(&str, &str)], issues: &mut Vec<Issue>) {
    ui::section("Required Tools");

    for (program, desc) in tools {
        match which::which(program) {
            Ok(path) => {
                let version = tool_version(&path).unwrap_or_default();
                ui::check(true, program, &format!("{desc} {version}"));
            }
            Err(_) => {
                ui::check(false, program, &format!("{desc} (missing)"));
                issues.push(Issue {
                    summary: format!("{program} is not installed or not on PATH"),
                    fix: format!("Install {program} or set its path under [tools]"),
                });
            }
        }
    }
}

fn tool_version(path: &Path) -> Option<String> {
    let output = Command::new(path).arg("version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines().next().map(|l| l.trim().to_string())
}

fn check_credentials(config: &Config, issues: &mut Vec<Issue>) {
    ui::section("Credentials");

    if config.repositories.is_empty() && config.credential_sets.is_empty() {
        ui::warn("No repositories or credential sets configured");
        issues.push(Issue {
            summary: "No credentials configured".to_string(),
            fix: "Add a [[repositories]] or [[credential_sets]] entry".to_string(),
        });
        return;
    }

    let entries = config
        .repositories
        .iter()
        .map(|e| ("repository", e))
        .chain(config.credential_sets.iter().map(|e| ("credential set", e)));

    for (kind, entry) in entries {
        match entry.to_record() {
            Ok(record) => match record.usable() {
                Some(creds) => ui::check(true, &entry.url, &format!("{kind}, {}", creds.kind())),
                None => {
                    ui::check(false, &entry.url, &format!("{kind}, nothing usable"));
                    issues.push(Issue {
                        summary: format!("{} has no usable credentials", entry.url),
                        fix: "Set ssh_private_key_path or a password (type must be git)"
                            .to_string(),
                    });
                }
            },
            Err(e) => {
                ui::check(false, &entry.url, &format!("{e:#}"));
                issues.push(Issue {
                    summary: format!("Credentials for {} could not be loaded", entry.url),
                    fix: format!("{e:#}"),
                });
            }
        }
    }
}

fn check_sync(config: &Config, issues: &mut Vec<Issue>) {
    ui::section("Sync Trigger");

    let Some(sync) = &config.sync else {
        ui::kv("sync", "disabled");
        return;
    };

    ui::kv("api server", &sync.api_server);
    ui::kv("namespace", &sync.namespace);
    if let Err(e) = sync.trigger() {
        ui::check(false, "argocd", &format!("{e:#}"));
        issues.push(Issue {
            summary: "Sync trigger is misconfigured".to_string(),
            fix: format!("{e:#}"),
        });
    }
}
