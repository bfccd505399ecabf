use crate::config::SyncTarget;
use crate::git::{CommitId, GitError, GitRepository, RefUpdate};

/// Remote registered for the duration of a run and removed afterwards.
pub const UPSTREAM_REMOTE: &str = "upstream";
/// Pre-existing remote the mirrored branch is pushed to.
pub const ORIGIN_REMOTE: &str = "origin";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Bad configuration, unexpected repository state, or a ref rejected by a fetch or push.
    #[error("{0}")]
    Workflow(String),
    /// The version-control engine itself failed.
    #[error(transparent)]
    Engine(#[from] GitError),
}

impl From<crate::config::ConfigError> for SyncError {
    fn from(error: crate::config::ConfigError) -> Self {
        Self::Workflow(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The origin branch already pointed at the upstream commit, nothing was pushed.
    UpToDate { commit: CommitId },
    /// The origin branch was moved (or created, when `previous` is `None`).
    Updated {
        previous: Option<CommitId>,
        current: CommitId,
    },
}

pub struct UpstreamSync<'a, R: GitRepository> {
    repo: &'a R,
    target: SyncTarget,
}

impl<'a, R: GitRepository> UpstreamSync<'a, R> {
    pub fn new(repo: &'a R, target: SyncTarget) -> Self {
        Self { repo, target }
    }

    /// Makes the origin branch point at the tip of the upstream branch.
    ///
    /// The `upstream` remote is registered only after preflight succeeded and is removed again
    /// on every path out of this function. If removing it fails after the sync itself failed,
    /// the sync failure is returned and the removal failure is only logged.
    pub fn run(&self) -> Result<SyncOutcome, SyncError> {
        self.preflight()?;

        let upstream_url = self.target.upstream_url();
        println!("Fetching upstream: {upstream_url}.");
        let remote = TransientRemote::register(self.repo, UPSTREAM_REMOTE, &upstream_url)?;

        let result = self.sync_registered();
        match (result, remote.remove()) {
            (result, Ok(())) => result,
            (Ok(_), Err(error)) => Err(error.into()),
            (Err(error), Err(cleanup_error)) => {
                tracing::warn!("cannot remove the `{UPSTREAM_REMOTE}` remote: {cleanup_error}");
                Err(error)
            }
        }
    }

    fn preflight(&self) -> Result<(), SyncError> {
        let remotes = self.repo.remote_names()?;
        if remotes.iter().any(|name| name == UPSTREAM_REMOTE) {
            return Err(SyncError::Workflow(format!(
                r#"There is already an "{UPSTREAM_REMOTE}" remote."#
            )));
        }
        if !remotes.iter().any(|name| name == ORIGIN_REMOTE) {
            return Err(SyncError::Workflow(format!(
                r#"There is no "{ORIGIN_REMOTE}" remote to push to."#
            )));
        }
        Ok(())
    }

    fn sync_registered(&self) -> Result<SyncOutcome, SyncError> {
        let upstream_branch = &self.target.upstream_branch;
        let origin_branch = &self.target.origin_branch;

        self.fetch(UPSTREAM_REMOTE)?;
        println!("Fetching origin: {}.", self.repo.remote_url(ORIGIN_REMOTE)?);
        self.fetch(ORIGIN_REMOTE)?;

        let upstream_commit = self
            .repo
            .remote_branches(UPSTREAM_REMOTE)?
            .remove(upstream_branch)
            .ok_or_else(|| {
                SyncError::Workflow(format!(
                    "Upstream branch ({upstream_branch}) does not exist."
                ))
            })?;

        if !self.repo.local_branches()?.contains_key(origin_branch) {
            tracing::info!("creating local branch {origin_branch} at {upstream_commit}");
            self.repo.create_branch(origin_branch, &upstream_commit)?;
        }

        let origin_commit = self.repo.remote_branches(ORIGIN_REMOTE)?.remove(origin_branch);
        match &origin_commit {
            Some(commit) => {
                println!("Origin branch ({origin_branch}) exists on remote.");
                println!("Origin commit:   {commit}");
            }
            None => {
                println!("Origin branch ({origin_branch}) does not exist on remote, creating it.")
            }
        }
        println!("Upstream commit: {upstream_commit}");

        if origin_commit.as_ref() == Some(&upstream_commit) {
            println!("Already up to date. Exiting without update.");
            return Ok(SyncOutcome::UpToDate {
                commit: upstream_commit,
            });
        }

        self.repo.set_branch_target(origin_branch, &upstream_commit)?;
        println!("Pushing to origin ({origin_branch})");
        let updates = self.repo.push(ORIGIN_REMOTE, origin_branch, true)?;
        if let Some(failed) = first_error(&updates) {
            return Err(SyncError::Workflow(format!(
                "Push to {ORIGIN_REMOTE} failed: {}",
                failed.note()
            )));
        }
        println!("Updated!");

        Ok(SyncOutcome::Updated {
            previous: origin_commit,
            current: upstream_commit,
        })
    }

    /// Fetches with pruning. A rejected ref aborts the run rather than comparing against a
    /// partially updated view.
    fn fetch(&self, remote: &str) -> Result<(), SyncError> {
        let updates = self.repo.fetch(remote, true)?;
        for update in &updates {
            tracing::debug!("{remote}: {}", update.note());
        }
        if let Some(failed) = first_error(&updates) {
            return Err(SyncError::Workflow(format!(
                "Fetching {remote} failed: {}",
                failed.note()
            )));
        }
        Ok(())
    }
}

fn first_error(updates: &[RefUpdate]) -> Option<&RefUpdate> {
    updates.iter().find(|update| update.is_error())
}

/// A remote added by this run. It is removed by [`TransientRemote::remove`], or on drop if the
/// run unwinds before getting there.
struct TransientRemote<'a, R: GitRepository> {
    repo: &'a R,
    name: &'static str,
    disarmed: bool,
}

impl<'a, R: GitRepository> TransientRemote<'a, R> {
    fn register(repo: &'a R, name: &'static str, url: &str) -> Result<Self, GitError> {
        if let Err(error) = repo.add_remote(name, url) {
            // A failed `remote add` can still leave a half-written remote behind.
            let guard = Self {
                repo,
                name,
                disarmed: false,
            };
            if let Err(cleanup_error) = guard.remove() {
                tracing::warn!("cannot remove the `{name}` remote: {cleanup_error}");
            }
            return Err(error);
        }
        Ok(Self {
            repo,
            name,
            disarmed: false,
        })
    }

    /// Removes the remote if it is still configured.
    fn remove(mut self) -> Result<(), GitError> {
        self.disarmed = true;
        remove_if_present(self.repo, self.name)
    }
}

impl<R: GitRepository> Drop for TransientRemote<'_, R> {
    fn drop(&mut self) {
        if !self.disarmed {
            eprintln!("Removing the `{}` remote", self.name);
            if let Err(error) = remove_if_present(self.repo, self.name) {
                tracing::error!("cannot remove the `{}` remote: {error}", self.name);
            }
        }
    }
}

fn remove_if_present<R: GitRepository>(repo: &R, name: &str) -> Result<(), GitError> {
    if repo.remote_names()?.iter().any(|remote| remote == name) {
        repo.remove_remote(name)?;
    }
    Ok(())
}
