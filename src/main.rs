use clap::{Parser, Subcommand};
use github_client::GitHubApiClient;
use pipeline::{DiffOptions, PipelineOrchestrator, ReciprocityAuditor};
use std::path::PathBuf;
use std::sync::Arc;
use sync_core::{Config, ErrorReporter};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "follower-sync", version, about = "Sync and follow GitHub org followers")]
struct Cli {
    /// Optional TOML file overriding environment configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enumerate, enrich and optionally follow org followers
    Sync {
        /// Evaluate everything but skip follow API calls
        #[arg(long)]
        dry_run: bool,

        /// Override MAX_WORKERS
        #[arg(long)]
        max_workers: Option<usize>,
    },
    /// Compare following vs followers and report non-reciprocal accounts
    Diff {
        /// Write the non-reciprocal logins to this file
        #[arg(long)]
        export: Option<PathBuf>,

        /// Unfollow the non-reciprocal accounts
        #[arg(long)]
        unfollow: bool,

        /// Cap on unfollows in one run (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_unfollows: u32,

        /// Report what would be unfollowed without doing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("follower_sync=info,pipeline=info,github_client=info,storage=info")
        }))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(path) = &cli.config {
        config = config.apply_overlay_file(path)?;
    }

    match cli.command {
        Command::Sync {
            dry_run,
            max_workers,
        } => {
            if dry_run {
                config.dry_run = true;
            }
            if let Some(workers) = max_workers {
                config.max_workers = workers;
            }
            config.validate()?;
            run_sync(config).await
        }
        Command::Diff {
            export,
            unfollow,
            max_unfollows,
            dry_run,
        } => run_diff(config, export, unfollow, max_unfollows, dry_run).await,
    }
}

async fn run_sync(config: Config) -> anyhow::Result<()> {
    let client = build_client(&config).await?;

    if config.dry_run {
        info!("Dry run: no follow requests will be sent");
    }

    let orchestrator = PipelineOrchestrator::new(client, config);
    match orchestrator.run().await {
        Ok(summary) => {
            println!("{summary}");
            if summary.failed > 0 {
                warn!("{} users could not be processed", summary.failed);
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            ErrorReporter::new().report_error(&e);
            // Partial metrics are still worth showing on an aborted run
            println!("{}", orchestrator.metrics().summary());
            Err(e.into())
        }
    }
}

async fn run_diff(
    config: Config,
    export: Option<PathBuf>,
    unfollow: bool,
    max_unfollows: u32,
    dry_run: bool,
) -> anyhow::Result<()> {
    let client = build_client(&config).await?;

    let me = client.get_authenticated_user().await?;
    let following: Vec<String> = client
        .list_following()
        .await?
        .into_iter()
        .map(|a| a.login)
        .collect();
    let followers: Vec<String> = client
        .list_followers(&me.login)
        .await?
        .into_iter()
        .map(|a| a.login)
        .collect();

    let options = DiffOptions {
        export_path: export,
        unfollow,
        max_unfollows,
        delay_between_unfollows: config.follow.delay_between_follows,
        dry_run: dry_run || config.dry_run,
    };
    let auditor = ReciprocityAuditor::new(client, options);
    let report = auditor.run(following, followers).await?;

    println!(
        "Following {}, followed by {}, {} not reciprocal",
        report.following_count,
        report.followers_count,
        report.non_reciprocal.len()
    );
    for login in &report.non_reciprocal {
        println!("  {login}");
    }
    if report.unfollowed > 0 || report.unfollow_failures > 0 {
        println!(
            "Unfollowed {} ({} failures)",
            report.unfollowed, report.unfollow_failures
        );
    }

    Ok(())
}

/// Build the API client and verify the token before any real work.
async fn build_client(config: &Config) -> anyhow::Result<Arc<GitHubApiClient>> {
    let client = Arc::new(GitHubApiClient::with_base_url(
        config.api_url.clone(),
        config.github_token.clone(),
        config.request_timeout,
        config.retry_attempts,
    )?);

    let me = client.get_authenticated_user().await?;
    let quota = client.rate_limit().await?;
    info!(
        "Authenticated as {} ({}/{} API requests remaining)",
        me.login, quota.remaining, quota.limit
    );
    if quota.remaining < 100 {
        warn!("API quota nearly exhausted, the run may stall until reset");
    }

    Ok(client)
}
