use clap::Parser;
use std::path::PathBuf;
use upstream_sync::config::{SyncConfig, load_config, resolve};
use upstream_sync::git::GitCli;
use upstream_sync::sync::{SyncError, SyncOutcome, UpstreamSync};

/// Exit code for bad configuration, unexpected repository state and rejected refs.
const EXIT_WORKFLOW_ERROR: i32 = 255;
/// Exit code for failures of git itself.
const EXIT_GIT_ERROR: i32 = 254;

/// Sync a branch of the `origin` remote with a branch of an upstream GitHub repository.
///
/// Meant to be called from CI.
#[derive(clap::Parser)]
#[clap(version)]
struct Args {
    /// The upstream GitHub organization
    #[clap(long, env = "UPSTREAM_ORG")]
    upstream_org: Option<String>,
    /// The upstream repository
    #[clap(long, env = "UPSTREAM_REPO")]
    upstream_repo: Option<String>,
    /// The upstream branch
    #[clap(long, env = "UPSTREAM_BRANCH")]
    upstream_branch: Option<String>,
    /// The downstream branch that will be pushed to the origin remote
    #[clap(long, env = "ORIGIN_BRANCH")]
    origin_branch: Option<String>,
    /// TOML file with defaults for the options above
    #[clap(long, env = "UPSTREAM_SYNC_CONFIG")]
    config: Option<PathBuf>,
    /// The git executable to use instead of the one found on `PATH`
    #[clap(long, env = "UPSTREAM_SYNC_GIT")]
    git: Option<PathBuf>,
    /// Print every git command that is executed
    #[clap(long, short)]
    verbose: bool,
    /// Path to local repository
    path: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let code = match sync(args) {
        Ok(_) => 0,
        Err(SyncError::Workflow(message)) => {
            println!("{}\nExiting.", message.trim());
            EXIT_WORKFLOW_ERROR
        }
        Err(SyncError::Engine(error)) => {
            println!("Git Error!");
            println!("{error}");
            EXIT_GIT_ERROR
        }
    };
    std::process::exit(code);
}

fn sync(args: Args) -> Result<SyncOutcome, SyncError> {
    let flags = SyncConfig {
        upstream_org: args.upstream_org,
        upstream_repo: args.upstream_repo,
        upstream_branch: args.upstream_branch,
        origin_branch: args.origin_branch,
    };
    let config = match &args.config {
        Some(path) => {
            let file = load_config(path)
                .map_err(|error| SyncError::Workflow(format!("{error:#}")))?;
            flags.or(file)
        }
        None => flags,
    };
    let (target, path) = resolve(config, args.path)?;

    let git = match args.git {
        Some(git) => git,
        None => GitCli::lookup()?,
    };
    let repo = GitCli::open(git, &path)?;
    tracing::debug!(
        "syncing {} ({}) into {}",
        target.full_repo_name(),
        target.upstream_branch,
        repo.path().display()
    );
    UpstreamSync::new(&repo, target).run()
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
