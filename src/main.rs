use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use credwatch::config::{default_config_path, ResolvedConfig};
use credwatch::CredentialService;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "credwatch")]
#[command(about = "Watch injected credential files and gate startup on them")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "CREDWATCH_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the resolved configuration
    Config,

    /// Scan all credential files once and print their status
    Status {
        /// Exit with an error unless every required credential is present
        #[arg(long)]
        require_ready: bool,
    },

    /// Watch credential files until interrupted
    Run {
        /// File to create once every required credential is present
        #[arg(long, value_name = "PATH")]
        ready_file: Option<PathBuf>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .json(),
        )
        .init();
}

fn write_ready_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, b"ready\n")
        .with_context(|| format!("Failed to write ready file: {}", path.display()))
}

async fn run(service: CredentialService, ready_file: Option<PathBuf>) -> Result<()> {
    if let Some(path) = ready_file.as_deref().filter(|p| p.exists()) {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove old ready file: {}", path.display()))?;
    }

    let cancel = CancellationToken::new();
    let watchers = service.spawn(cancel.clone());

    let ready = tokio::select! {
        ready = service.wait_ready(&cancel) => ready,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            false
        }
    };

    if ready {
        if let Some(path) = &ready_file {
            write_ready_file(path)?;
            info!(path = %path.display(), "ready file written");
        }

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
    } else {
        warn!(missing = ?service.gate().missing(), "shutting down before all credentials were available");
    }

    watchers.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let config = ResolvedConfig::load(&cli.config)
        .with_context(|| format!("Failed to load credwatch config: {}", cli.config.display()))?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Status { require_ready } => {
            let service = CredentialService::from_config(&config)?;
            service.refresh_once().await;

            let report = service.report();
            println!("{}", serde_json::to_string_pretty(&report)?);

            if require_ready && !report.ready {
                anyhow::bail!(
                    "Required credentials not available: {}",
                    report.missing.join(", ")
                );
            }
        }
        Command::Run { ready_file } => {
            let service = CredentialService::from_config(&config)?;
            run(service, ready_file).await?;
        }
    }

    Ok(())
}
