use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gitwarden::config::Settings;
use gitwarden::forge::GitHubClient;
use gitwarden::git::{GitExecutor, LocalGit};
use gitwarden::safety::config::CONFIG_PATH_ENV;
use gitwarden::{AppResult, SafetyConfig, SafetyPolicy, Server, ToolDispatcher};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Risk-governed forge administration tools over JSON-RPC on stdio
#[derive(Debug, Parser)]
#[command(name = "gitwarden", version, about)]
struct Cli {
    /// Process settings (TOML); defaults to ~/.config/gitwarden/config.toml
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Safety config (JSON); defaults to ~/.config/gitwarden/safety.json
    #[arg(long, value_name = "PATH", env = CONFIG_PATH_ENV)]
    safety_config: Option<PathBuf>,

    /// Log level for stderr output, overridden by RUST_LOG
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "fatal");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let settings = match &cli.settings {
        Some(path) => Settings::load_or_default(path)?,
        None => Settings::load()?,
    };

    init_tracing(cli.log_level.as_deref().unwrap_or(&settings.logging.level));

    let safety_path = cli.safety_config.unwrap_or_else(SafetyConfig::default_path);
    let safety_config = SafetyConfig::load_or_default(&safety_path)?;
    info!(
        path = %safety_path.display(),
        mode = %safety_config.mode,
        "safety config loaded"
    );

    let policy = Arc::new(SafetyPolicy::from_config(safety_config));
    let forge = Arc::new(GitHubClient::from_settings(&settings)?);
    let mut dispatcher = ToolDispatcher::new(policy, forge);

    if let Some(git) = local_repository(&settings).await {
        dispatcher = dispatcher.with_git(git);
    }

    Server::new(dispatcher).run_stdio().await?;
    Ok(())
}

/// Logs go to stderr; stdout carries only JSON-RPC
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// The configured repository, else the working directory if it is one
async fn local_repository(settings: &Settings) -> Option<LocalGit> {
    let path = match &settings.git.repo_path {
        Some(path) => path.clone(),
        None => std::env::current_dir().ok()?,
    };

    let executor = GitExecutor::new(&path)
        .with_timeout(Duration::from_secs(settings.git.timeout_seconds));

    match executor.execute(&["rev-parse", "--git-dir"]).await {
        Ok(_) => {
            info!(path = %path.display(), "local git tools enabled");
            Some(LocalGit::new(executor))
        }
        Err(e) => {
            info!(path = %path.display(), reason = %e, "local git tools disabled");
            None
        }
    }
}
