//! Throwaway repositories for integration tests.
//!
//! `https://github.com/` is redirected to a local directory with `url.<dir>.insteadOf`, so the
//! upstream URL the tool builds resolves to a bare repository on disk.

#![allow(dead_code)]

use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use upstream_sync::config::SyncTarget;

pub const ORG: &str = "acme";
pub const REPO: &str = "widgets";

pub fn git_available() -> bool {
    which::which("git").is_ok()
}

pub fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = std::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .env("LC_ALL", "C")
        .output()?;
    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn target(upstream_branch: &str, origin_branch: &str) -> SyncTarget {
    SyncTarget {
        upstream_org: ORG.to_string(),
        upstream_repo: REPO.to_string(),
        upstream_branch: upstream_branch.to_string(),
        origin_branch: origin_branch.to_string(),
    }
}

pub struct Fixture {
    _temp_dir: TempDir,
    /// Bare repository standing in for `https://github.com/acme/widgets.git`.
    pub upstream: PathBuf,
    /// Bare repository the local clone pushes to.
    pub origin: PathBuf,
    /// Working copy used to author commits for both servers.
    pub author: PathBuf,
    /// Repository the tool runs against.
    pub local: PathBuf,
}

impl Fixture {
    /// Upstream has `main` with one commit, origin is empty, and the local repository only
    /// knows about origin.
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();

        let forge = root.join("forge");
        let upstream = forge.join(ORG).join(format!("{REPO}.git"));
        std::fs::create_dir_all(&upstream)?;
        run_git(&upstream, &["init", "--bare"])?;

        let origin = root.join("origin.git");
        std::fs::create_dir_all(&origin)?;
        run_git(&origin, &["init", "--bare"])?;

        let author = root.join("author");
        std::fs::create_dir_all(&author)?;
        run_git(&author, &["init", "-b", "main"])?;
        configure_identity(&author)?;
        run_git(&author, &["remote", "add", "upstream", path_str(&upstream)])?;
        run_git(&author, &["remote", "add", "origin", path_str(&origin)])?;

        let local = root.join("local");
        std::fs::create_dir_all(&local)?;
        run_git(&local, &["init", "-b", "scratch"])?;
        configure_identity(&local)?;
        run_git(&local, &["remote", "add", "origin", path_str(&origin)])?;
        let rewrite = format!("url.{}/.insteadOf", forge.display());
        run_git(&local, &["config", &rewrite, "https://github.com/"])?;

        let fixture = Self {
            _temp_dir: temp_dir,
            upstream,
            origin,
            author,
            local,
        };
        fixture.commit_upstream("Initial commit")?;
        Ok(fixture)
    }

    /// Adds a commit to upstream `main` and returns its SHA.
    pub fn commit_upstream(&self, message: &str) -> Result<String> {
        let sha = self.commit(message)?;
        run_git(&self.author, &["push", "-q", "upstream", "main"])?;
        Ok(sha)
    }

    /// Points origin's `branch` at a fresh commit that upstream does not have.
    pub fn diverge_origin(&self, branch: &str) -> Result<String> {
        run_git(&self.author, &["checkout", "-q", "-B", "diverged", "main"])?;
        let sha = self.commit("Downstream only")?;
        let refspec = format!("diverged:refs/heads/{branch}");
        run_git(&self.author, &["push", "-q", "--force", "origin", &refspec])?;
        run_git(&self.author, &["checkout", "-q", "main"])?;
        Ok(sha)
    }

    pub fn origin_ref(&self, branch: &str) -> Option<String> {
        resolve_ref(&self.origin, &format!("refs/heads/{branch}"))
    }

    pub fn local_ref(&self, branch: &str) -> Option<String> {
        resolve_ref(&self.local, &format!("refs/heads/{branch}"))
    }

    pub fn local_remotes(&self) -> Vec<String> {
        run_git(&self.local, &["remote"])
            .map(|out| out.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn local_remote_refs(&self) -> Vec<String> {
        run_git(&self.local, &["for-each-ref", "--format=%(refname)", "refs/remotes/"])
            .map(|out| out.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn commit(&self, message: &str) -> Result<String> {
        let file = self.author.join("history.txt");
        let mut content = std::fs::read_to_string(&file).unwrap_or_default();
        content.push_str(message);
        content.push('\n');
        std::fs::write(&file, content)?;
        run_git(&self.author, &["add", "history.txt"])?;
        run_git(&self.author, &["commit", "-q", "-m", message])?;
        run_git(&self.author, &["rev-parse", "HEAD"])
    }
}

fn configure_identity(repo: &Path) -> Result<()> {
    run_git(repo, &["config", "user.email", "test@example.com"])?;
    run_git(repo, &["config", "user.name", "Test User"])?;
    run_git(repo, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

fn resolve_ref(repo: &Path, refname: &str) -> Option<String> {
    run_git(repo, &["rev-parse", "--verify", "--quiet", refname]).ok()
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("temporary paths are UTF-8")
}
