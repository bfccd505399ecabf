use anyhow::Context;
use std::path::{Path, PathBuf};

/// Host every upstream repository is fetched from.
pub const UPSTREAM_HOST: &str = "github.com";

/// Values that can be provided by a TOML config file, or by flags and environment variables.
#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SyncConfig {
    /// GitHub organization that owns the upstream repository.
    pub upstream_org: Option<String>,
    pub upstream_repo: Option<String>,
    /// Branch of the upstream repository that is mirrored.
    pub upstream_branch: Option<String>,
    /// Branch that is pushed to the `origin` remote.
    pub origin_branch: Option<String>,
}

impl SyncConfig {
    /// Fills every value missing from `self` with the one from `fallback`.
    pub fn or(self, fallback: SyncConfig) -> SyncConfig {
        SyncConfig {
            upstream_org: self.upstream_org.or(fallback.upstream_org),
            upstream_repo: self.upstream_repo.or(fallback.upstream_repo),
            upstream_branch: self.upstream_branch.or(fallback.upstream_branch),
            origin_branch: self.origin_branch.or(fallback.origin_branch),
        }
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<SyncConfig> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot load config file from {}", path.display()))?;
    let config: SyncConfig = toml::from_str(&data).context("cannot load config as TOML")?;
    Ok(config)
}

/// A validated description of what to mirror where.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncTarget {
    pub upstream_org: String,
    pub upstream_repo: String,
    pub upstream_branch: String,
    pub origin_branch: String,
}

impl SyncTarget {
    pub fn full_repo_name(&self) -> String {
        format!("{}/{}", self.upstream_org, self.upstream_repo)
    }

    pub fn upstream_url(&self) -> String {
        format!(
            "https://{UPSTREAM_HOST}/{}/{}.git",
            self.upstream_org, self.upstream_repo
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {}.", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("Invalid value for {name}: {value:?}.")]
    Invalid { name: &'static str, value: String },
}

/// Checks that every input is present and usable, producing the target and repository path.
pub fn resolve(
    config: SyncConfig,
    path: Option<PathBuf>,
) -> Result<(SyncTarget, PathBuf), ConfigError> {
    let mut missing = Vec::new();
    let mut take = |value: Option<String>, name: &'static str| match value {
        Some(value) if !value.trim().is_empty() => Some(value),
        _ => {
            missing.push(name);
            None
        }
    };
    let upstream_org = take(config.upstream_org, "--upstream-org (UPSTREAM_ORG)");
    let upstream_repo = take(config.upstream_repo, "--upstream-repo (UPSTREAM_REPO)");
    let upstream_branch = take(config.upstream_branch, "--upstream-branch (UPSTREAM_BRANCH)");
    let origin_branch = take(config.origin_branch, "--origin-branch (ORIGIN_BRANCH)");
    let path = path.filter(|path| !path.as_os_str().is_empty());
    if path.is_none() {
        missing.push("<PATH>");
    }

    let (
        Some(upstream_org),
        Some(upstream_repo),
        Some(upstream_branch),
        Some(origin_branch),
        Some(path),
    ) = (upstream_org, upstream_repo, upstream_branch, origin_branch, path)
    else {
        return Err(ConfigError::Missing(missing));
    };

    let target = SyncTarget {
        upstream_org: check_name("upstream-org", upstream_org)?,
        upstream_repo: check_name("upstream-repo", upstream_repo)?,
        upstream_branch: check_name("upstream-branch", upstream_branch)?,
        origin_branch: check_name("origin-branch", origin_branch)?,
    };
    Ok((target, path))
}

/// Rejects values that git would read as an option or that cannot be part of a ref or URL.
fn check_name(name: &'static str, value: String) -> Result<String, ConfigError> {
    if value.starts_with('-') || value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigError::Invalid { name, value });
    }
    Ok(value)
}
