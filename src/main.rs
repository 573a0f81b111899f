use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pr_panel::config::{self, Config};
use pr_panel::git_ops::{self, DiffMode};
use pr_panel::github::{self, GitHubClient};
use pr_panel::llm::{OpenRouterClient, RetryPolicy};
use pr_panel::review::format::render_report;
use pr_panel::review::{review_local, PipelineCoordinator};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pr-panel",
    about = "Multi-reviewer AI code review for pull requests",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Review a GitHub pull request and post the result
    Review {
        /// Pull request number
        pr: u64,

        /// Repository as owner/name (defaults to GITHUB_REPOSITORY, then the git remote)
        #[arg(long)]
        repo: Option<String>,

        /// Config file (defaults to .pr-panel.toml in the repository)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the review instead of submitting it
        #[arg(long)]
        dry_run: bool,
    },
    /// Review local changes and print the result
    Local {
        #[arg(long, value_enum, default_value_t = DiffMode::VsMain)]
        mode: DiffMode,

        /// Refs for commits mode: one commit, `A..B`, or two refs
        #[arg(long, num_args = 1..=2)]
        refs: Vec<String>,

        /// Path to the repository (defaults to current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pr_panel=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn model_client(config: &Config) -> Result<OpenRouterClient> {
    let api_key = config::openrouter_api_key()
        .context("No OpenRouter API key. Set OPENROUTER_API_KEY or store one in the system keychain")?;
    OpenRouterClient::new(api_key, &config.model)
}

async fn run_review(pr: u64, repo: Option<String>, config_path: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let config = Config::load(config_path.as_deref(), &cwd)?;
    let (owner, name) = github::resolve_repo(repo.as_deref(), &cwd)?;

    let token = config::github_token()
        .context("No GitHub token. Set GITHUB_TOKEN or store one in the system keychain")?;
    let mut vcs = GitHubClient::new(owner.as_str(), name.as_str(), token)?
        .with_retry(RetryPolicy::with_retries(config.model.max_retries));
    if let Ok(api_base) = std::env::var("GITHUB_API_URL") {
        vcs = vcs.with_api_base(api_base);
    }
    let model = model_client(&config)?;

    info!(repo = %format!("{}/{}", owner, name), pr, dry_run, "starting review");
    let report = PipelineCoordinator::new(&vcs, &model, &config)
        .run_pr(pr, dry_run)
        .await?;

    match report.outcome {
        Some(outcome) => {
            let verb = if outcome.is_update { "Updated" } else { "Posted" };
            println!("{} review: {}", verb, outcome.url);
        }
        None => println!("{}", render_report(&report.submission)),
    }
    Ok(())
}

async fn run_local(mode: DiffMode, refs: Vec<String>, path: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let path = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    let config = Config::load(config_path.as_deref(), &path)?;

    let diff = git_ops::local_diff(&path, mode, &refs)?;
    if diff.trim().is_empty() {
        println!("No changes to review ({}).", mode.label());
        return Ok(());
    }

    let branch = git_ops::current_branch(&path).unwrap_or_else(|_| "detached".to_string());
    let title = format!("Local changes on {} ({})", branch, mode.label());
    let model = model_client(&config)?;

    let draft = review_local(&model, &config, &diff, &title).await;
    let submission = draft.submission(&[], &[], config.verifier.request_changes, None);
    println!("{}", render_report(&submission));
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let result = match args.command {
        Command::Review {
            pr,
            repo,
            config,
            dry_run,
        } => run_review(pr, repo, config, dry_run).await,
        Command::Local {
            mode,
            refs,
            path,
            config,
        } => run_local(mode, refs, path, config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{:#}", err), "review failed");
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
