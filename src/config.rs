//! The promoter configuration file.
//!
//! ```toml
//! [identity]
//! name = "promoter"
//! email = "promoter@localhost"
//!
//! [tools]
//! git = "/usr/bin/git"
//! kustomize = "kustomize"
//!
//! [workspace]
//! base = "~/.cache/promoter"
//! keep = false
//!
//! [[repositories]]
//! url = "git@github.com:acme/deploy.git"
//! ssh_private_key_path = "~/.ssh/deploy_key"
//!
//! [[credential_sets]]
//! url = "https://github.com/acme"
//! username = "bot"
//! password_env = "GITHUB_TOKEN"
//!
//! [sync]
//! api_server = "https://kubernetes.default.svc"
//! namespace = "argocd"
//! token_env = "ARGOCD_TOKEN"
//! ```
//!
//! Every section is optional. Without a file, promotions fail at the
//! credential stage since no repository has credentials.

use anyhow::{Context, Result, bail};
use promotekit::{
    ArgoCdSync, CommitIdentity, CredentialRecord, NoSync, PromoterOptions,
    StaticCredentialProvider, SyncTrigger,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub identity: IdentityConfig,
    pub tools: ToolsConfig,
    pub workspace: WorkspaceConfig,
    pub repositories: Vec<CredentialEntry>,
    pub credential_sets: Vec<CredentialEntry>,
    pub sync: Option<SyncConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    pub name: String,
    pub email: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        let identity = CommitIdentity::default();
        Self {
            name: identity.name,
            email: identity.email,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub git: Option<String>,
    pub kustomize: Option<String>,
}

impl ToolsConfig {
    pub fn git(&self) -> &str {
        self.git.as_deref().unwrap_or("git")
    }

    pub fn kustomize(&self) -> &str {
        self.kustomize.as_deref().unwrap_or("kustomize")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Directory workspaces are created in (system temp dir if unset)
    pub base: Option<String>,
    /// Keep workspaces after each attempt
    pub keep: bool,
}

/// Credentials for one repository URL or URL prefix.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialEntry {
    pub url: String,
    #[serde(rename = "type", default)]
    pub repo_type: String,
    #[serde(default)]
    pub ssh_private_key_path: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
}

impl CredentialEntry {
    /// Load key files and environment secrets into a provider record.
    pub fn to_record(&self) -> Result<CredentialRecord> {
        let ssh_private_key = match &self.ssh_private_key_path {
            Some(path) => {
                let path = paths::expand(path);
                fs::read(&path).with_context(|| {
                    format!(
                        "Could not read SSH key {} for {}",
                        path.display(),
                        self.url
                    )
                })?
            }
            None => Vec::new(),
        };

        let password = match (&self.password, &self.password_env) {
            (Some(_), Some(_)) => {
                bail!("{}: set either password or password_env, not both", self.url)
            }
            (Some(password), None) => password.clone(),
            (None, Some(var)) => std::env::var(var).with_context(|| {
                format!("Environment variable {var} (password for {}) is not set", self.url)
            })?,
            (None, None) => String::new(),
        };

        Ok(CredentialRecord {
            repo_type: self.repo_type.clone(),
            ssh_private_key,
            username: self.username.clone().unwrap_or_default(),
            password,
        })
    }

    /// [`Self::to_record`] for the promotion core's provider lookups.
    fn load(&self) -> promotekit::Result<CredentialRecord> {
        self.to_record()
            .map_err(|e| promotekit::Error::credential(&self.url, format!("{e:#}")))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub api_server: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Application to patch; defaults to the target branch name
    #[serde(default)]
    pub application: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
}

fn default_namespace() -> String {
    "argocd".to_string()
}

impl SyncConfig {
    pub fn trigger(&self) -> Result<ArgoCdSync> {
        let mut sync = ArgoCdSync::new(&self.api_server, &self.namespace);
        if let Some(application) = &self.application {
            sync = sync.with_application(application);
        }

        let token = match (&self.token, &self.token_env) {
            (Some(_), Some(_)) => bail!("[sync]: set either token or token_env, not both"),
            (Some(token), None) => Some(token.clone()),
            (None, Some(var)) => Some(
                std::env::var(var)
                    .with_context(|| format!("Environment variable {var} (sync token) is not set"))?,
            ),
            (None, None) => None,
        };
        if let Some(token) = token {
            sync = sync.with_token(token);
        }

        Ok(sync)
    }
}

/// A parsed configuration plus where it came from.
#[derive(Debug)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub found: bool,
    pub config: Config,
}

impl Config {
    /// Parse TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid config.toml format")
    }

    /// Load `explicit`, or the default config file if none was given.
    ///
    /// An explicitly named file must exist; a missing default file yields
    /// the default configuration.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => paths::config_file()?,
        };

        if !path.exists() {
            if explicit.is_some() {
                bail!("Config file {} does not exist", path.display());
            }
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(LoadedConfig {
                path,
                found: false,
                config: Self::default(),
            });
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config =
            Self::from_toml(&content).with_context(|| format!("Failed to load {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());

        Ok(LoadedConfig {
            path,
            found: true,
            config,
        })
    }

    /// Build the credential provider from `[[repositories]]` and
    /// `[[credential_sets]]`.
    ///
    /// Key files and environment secrets are read when a lookup selects the
    /// entry, so a broken entry only fails promotions of its own repository.
    pub fn credential_provider(&self) -> StaticCredentialProvider {
        let mut provider = StaticCredentialProvider::new();
        for entry in &self.repositories {
            let loaded = entry.clone();
            provider.add_repository_with(&entry.url, move || loaded.load());
        }
        for entry in &self.credential_sets {
            let loaded = entry.clone();
            provider.add_credential_set_with(&entry.url, move || loaded.load());
        }
        provider
    }

    /// Options for the promotion core.
    pub fn promoter_options(&self) -> PromoterOptions {
        PromoterOptions {
            git: self.tools.git().to_string(),
            kustomize: self.tools.kustomize().to_string(),
            identity: CommitIdentity {
                name: self.identity.name.clone(),
                email: self.identity.email.clone(),
            },
            workspace_base: self.workspace.base.as_deref().map(paths::expand),
            keep_workspace: self.workspace.keep,
            ..Default::default()
        }
    }

    /// The configured sync trigger, or [`NoSync`] when disabled or absent.
    pub fn sync_trigger(&self, disabled: bool) -> Result<Box<dyn SyncTrigger>> {
        match &self.sync {
            Some(sync) if !disabled => Ok(Box::new(sync.trigger()?)),
            _ => Ok(Box::new(NoSync)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
