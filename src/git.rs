//! Access to the version-control engine.
//!
//! [`GitRepository`] is the small capability set the sync procedure needs. [`GitCli`] implements
//! it by driving the `git` executable against a working copy.

use crate::utils::{CommandOutput, display_command, run_command};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("cannot find the git executable: {0}")]
    NotFound(#[from] which::Error),
    #[error("{path} is not a git repository: {stderr}")]
    NotARepository { path: PathBuf, stderr: String },
    #[error("cannot run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed with exit code {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("unexpected output from `{command}`: {line}")]
    UnexpectedOutput { command: String, line: String },
}

/// Identifier of a commit (its full hex object name).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(sha: impl Into<String>) -> Self {
        Self(sha.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The status character git prints in front of every ref in fetch and push reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefUpdateFlag {
    FastForward,
    Forced,
    Deleted,
    TagUpdate,
    New,
    Rejected,
    UpToDate,
}

impl RefUpdateFlag {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            ' ' => Self::FastForward,
            '+' => Self::Forced,
            '-' => Self::Deleted,
            't' => Self::TagUpdate,
            '*' => Self::New,
            '!' => Self::Rejected,
            '=' => Self::UpToDate,
            _ => return None,
        })
    }
}

/// Outcome of a fetch or push for a single ref.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefUpdate {
    pub flag: RefUpdateFlag,
    /// `[new branch]`, `[rejected]`, `1a2b3c4..5d6e7f8` and so on.
    pub summary: String,
    pub from: String,
    pub to: String,
    pub reason: Option<String>,
}

impl RefUpdate {
    pub fn is_error(&self) -> bool {
        self.flag == RefUpdateFlag::Rejected
    }

    /// One-line description of what happened to this ref.
    pub fn note(&self) -> String {
        let mut note = format!("{} {} -> {}", self.summary, self.from, self.to);
        if let Some(reason) = &self.reason {
            note.push_str(&format!(" ({reason})"));
        }
        note
    }
}

/// The operations the sync procedure performs on a repository.
///
/// Every method is a blocking call. Structured per-ref failures of `fetch` and `push` are
/// returned as [`RefUpdate`]s; only failures of the engine itself are `Err`.
pub trait GitRepository {
    /// Names of all configured remotes.
    fn remote_names(&self) -> Result<Vec<String>, GitError>;

    fn remote_url(&self, name: &str) -> Result<String, GitError>;

    fn add_remote(&self, name: &str, url: &str) -> Result<(), GitError>;

    fn remove_remote(&self, name: &str) -> Result<(), GitError>;

    /// Fetches `remote`. With `prune`, remote-tracking refs of branches that no longer exist on
    /// the remote are deleted.
    fn fetch(&self, remote: &str, prune: bool) -> Result<Vec<RefUpdate>, GitError>;

    /// Remote-tracking branches of `remote`, keyed by branch name.
    fn remote_branches(&self, remote: &str) -> Result<BTreeMap<String, CommitId>, GitError>;

    /// Local branch heads, keyed by branch name.
    fn local_branches(&self) -> Result<BTreeMap<String, CommitId>, GitError>;

    fn create_branch(&self, name: &str, start: &CommitId) -> Result<(), GitError>;

    /// Points the local branch `name` at `commit` without touching the working tree.
    fn set_branch_target(&self, name: &str, commit: &CommitId) -> Result<(), GitError>;

    /// Pushes local branch `branch` to the branch of the same name on `remote`.
    fn push(&self, remote: &str, branch: &str, force: bool) -> Result<Vec<RefUpdate>, GitError>;
}

/// A working copy operated through the `git` executable.
pub struct GitCli {
    git: PathBuf,
    path: PathBuf,
}

impl GitCli {
    /// Tries to find `git` on `PATH`.
    pub fn lookup() -> Result<PathBuf, GitError> {
        Ok(which::which("git")?)
    }

    /// Opens the repository at `path`, failing if it is not inside a git working copy.
    pub fn open(git: PathBuf, path: &Path) -> Result<Self, GitError> {
        let repo = Self {
            git,
            path: path.to_path_buf(),
        };
        let out = repo.capture(&["rev-parse", "--git-dir"])?;
        if !out.success() {
            return Err(GitError::NotARepository {
                path: repo.path,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.git);
        cmd.arg("-C")
            .arg(&self.path)
            .args(args)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    fn capture(&self, args: &[&str]) -> Result<CommandOutput, GitError> {
        let mut cmd = self.command(args);
        run_command(&mut cmd).map_err(|source| GitError::Spawn {
            command: display_command(&cmd),
            source,
        })
    }

    /// Runs git and returns its trimmed stdout, treating a non-zero exit as an error.
    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let out = self.capture(args)?;
        if !out.success() {
            return Err(self.failure(args, &out));
        }
        Ok(out.stdout.trim().to_string())
    }

    fn failure(&self, args: &[&str], out: &CommandOutput) -> GitError {
        GitError::Failed {
            command: display_command(&self.command(args)),
            code: out.status.code(),
            stderr: out.stderr.trim().to_string(),
        }
    }

    fn branches_under(&self, prefix: &str) -> Result<BTreeMap<String, CommitId>, GitError> {
        let args = ["for-each-ref", "--format=%(objectname) %(refname)", prefix];
        let out = self.run(&args)?;
        let mut branches = BTreeMap::new();
        for line in out.lines() {
            let Some((sha, refname)) = line.split_once(' ') else {
                return Err(GitError::UnexpectedOutput {
                    command: display_command(&self.command(&args)),
                    line: line.to_string(),
                });
            };
            let Some(name) = refname.strip_prefix(prefix) else {
                continue;
            };
            // `refs/remotes/<remote>/HEAD` is a symbolic pointer, not a branch.
            if name == "HEAD" {
                continue;
            }
            branches.insert(name.to_string(), CommitId::new(sha));
        }
        Ok(branches)
    }
}

impl GitRepository for GitCli {
    fn remote_names(&self) -> Result<Vec<String>, GitError> {
        let out = self.run(&["remote"])?;
        Ok(out.lines().map(|line| line.trim().to_string()).collect())
    }

    fn remote_url(&self, name: &str) -> Result<String, GitError> {
        self.run(&["remote", "get-url", name])
    }

    fn add_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        self.run(&["remote", "add", name, url])?;
        Ok(())
    }

    fn remove_remote(&self, name: &str) -> Result<(), GitError> {
        self.run(&["remote", "remove", name])?;
        Ok(())
    }

    fn fetch(&self, remote: &str, prune: bool) -> Result<Vec<RefUpdate>, GitError> {
        let mut args = vec!["-c", "fetch.output=full", "fetch", "--verbose"];
        if prune {
            args.push("--prune");
        }
        args.push(remote);
        let out = self.capture(&args)?;
        // Ref reports go to stderr, interleaved with "From <url>" and remote chatter.
        let updates: Vec<RefUpdate> = out.stderr.lines().filter_map(parse_fetch_line).collect();
        if !out.success() && !updates.iter().any(RefUpdate::is_error) {
            return Err(self.failure(&args, &out));
        }
        Ok(updates)
    }

    fn remote_branches(&self, remote: &str) -> Result<BTreeMap<String, CommitId>, GitError> {
        self.branches_under(&format!("refs/remotes/{remote}/"))
    }

    fn local_branches(&self) -> Result<BTreeMap<String, CommitId>, GitError> {
        self.branches_under("refs/heads/")
    }

    fn create_branch(&self, name: &str, start: &CommitId) -> Result<(), GitError> {
        self.run(&["branch", "--no-track", name, start.as_str()])?;
        Ok(())
    }

    fn set_branch_target(&self, name: &str, commit: &CommitId) -> Result<(), GitError> {
        let refname = format!("refs/heads/{name}");
        self.run(&["update-ref", &refname, commit.as_str()])?;
        Ok(())
    }

    fn push(&self, remote: &str, branch: &str, force: bool) -> Result<Vec<RefUpdate>, GitError> {
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let mut args = vec!["push", "--porcelain"];
        if force {
            args.push("--force");
        }
        args.extend([remote, refspec.as_str()]);
        let out = self.capture(&args)?;
        let updates: Vec<RefUpdate> = out.stdout.lines().filter_map(parse_push_line).collect();
        if !out.success() && !updates.iter().any(RefUpdate::is_error) {
            return Err(self.failure(&args, &out));
        }
        Ok(updates)
    }
}

/// Parses one ref line of `git fetch` output:
/// ` <flag> <summary> <from> -> <to> [(<reason>)]`.
fn parse_fetch_line(line: &str) -> Option<RefUpdate> {
    let rest = line.strip_prefix(' ')?;
    let mut chars = rest.chars();
    let flag = RefUpdateFlag::from_char(chars.next()?)?;
    let rest = chars.as_str().strip_prefix(' ')?;
    let (summary, rest) = if rest.starts_with('[') {
        let end = rest.find(']')?;
        (&rest[..=end], &rest[end + 1..])
    } else {
        rest.split_once(' ')?
    };
    let (from, rest) = rest.split_once(" -> ")?;
    let (to, reason) = split_reason(rest);
    Some(RefUpdate {
        flag,
        summary: summary.to_string(),
        from: from.trim().to_string(),
        to: to.to_string(),
        reason,
    })
}

/// Parses one ref line of `git push --porcelain` output:
/// `<flag>\t<from>:<to>\t<summary> [(<reason>)]`.
fn parse_push_line(line: &str) -> Option<RefUpdate> {
    let mut fields = line.splitn(3, '\t');
    let mut flag_field = fields.next()?.chars();
    let flag = RefUpdateFlag::from_char(flag_field.next()?)?;
    if flag_field.next().is_some() {
        return None;
    }
    let (from, to) = fields.next()?.split_once(':')?;
    let (summary, reason) = split_reason(fields.next()?);
    Some(RefUpdate {
        flag,
        summary: summary.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        reason,
    })
}

/// Splits a trailing ` (reason)` off `text`.
fn split_reason(text: &str) -> (&str, Option<String>) {
    let text = text.trim();
    match text.rsplit_once(" (") {
        Some((head, reason)) if reason.ends_with(')') => (
            head.trim_end(),
            Some(reason.trim_end_matches(')').to_string()),
        ),
        _ => (text, None),
    }
}
