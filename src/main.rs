//! solexit - automated exit engine for Solana token positions
//!
//! # WARNING
//! - This engine signs and sends real sell transactions for the configured wallet.
//! - Run with `--dry-run` first to review its decisions.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use solexit::cli::commands;
use solexit::config::Config;

/// Position exit engine for Solana SPL tokens
#[derive(Parser)]
#[command(name = "solexit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sell engine over all open positions
    Run {
        /// Log decisions without sending transactions
        #[arg(long)]
        dry_run: bool,
    },

    /// Show persisted positions and daily stats
    Status,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { dry_run } => {
            if let Err(e) = startup_checks(&config) {
                error!("Startup checks failed: {:#}", e);
                std::process::exit(1);
            }
            commands::run(&config, dry_run).await
        }
        Commands::Status => commands::status(&config).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("solexit=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Refuse to start with a missing or world-readable keypair
fn startup_checks(config: &Config) -> Result<()> {
    info!("Performing startup checks...");

    let keypair_path = std::env::var(&config.engine.keypair_env).map_err(|_| {
        anyhow::anyhow!("{} environment variable not set", config.engine.keypair_env)
    })?;
    if !std::path::Path::new(&keypair_path).exists() {
        return Err(anyhow::anyhow!("Keypair file not found: {}", keypair_path));
    }
    info!("Keypair file found: {}", keypair_path);

    // Check keypair permissions (Unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(&keypair_path)
            .map_err(|e| anyhow::anyhow!("Cannot read keypair file {}: {}", keypair_path, e))?;
        let mode = metadata.permissions().mode();

        if mode & 0o077 != 0 {
            return Err(anyhow::anyhow!(
                "Keypair file {} has insecure permissions {:o}. Run 'chmod 600 {}' to fix.",
                keypair_path,
                mode & 0o777,
                keypair_path
            ));
        }
        info!("Keypair permissions OK");
    }

    if config.engine.dry_run {
        warn!("engine.dry_run is set in config; no transactions will be sent");
    }
    warn!(
        risk_mode = ?config.exit.risk_mode,
        stop_loss_pct = config.exit.stop_loss_pct,
        min_notional_sol = config.exit.min_notional_sol,
        "Exit limits active"
    );

    info!("Startup checks passed");
    Ok(())
}
