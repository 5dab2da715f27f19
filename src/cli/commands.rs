//! CLI command implementations

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::{now_ms, SellEngine};
use crate::exchange::{load_keypair, TradeSigner};
use crate::position::PositionBook;

/// Start the sell engine and run until Ctrl-C
pub async fn run(config: &Config, dry_run: bool) -> Result<()> {
    let mut config = config.clone();
    config.engine.dry_run |= dry_run;
    if config.engine.dry_run {
        warn!("Running in DRY-RUN mode - decisions are logged, no transactions are sent");
    }

    let keypair_path = std::env::var(&config.engine.keypair_env)
        .with_context(|| format!("{} environment variable not set", config.engine.keypair_env))?;
    let keypair = load_keypair(&keypair_path)?;
    let signer: Arc<dyn TradeSigner> = Arc::new(keypair);
    info!(owner = %signer.address(), "Loaded keypair");

    let engine = SellEngine::connect(&config, signer).await?;
    info!(
        positions = engine.book().len().await,
        risk_mode = ?config.exit.risk_mode,
        "Positions loaded"
    );

    engine
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

/// Print the persisted positions and today's stats
pub async fn status(config: &Config) -> Result<()> {
    info!("Loading positions...");
    let book = PositionBook::new(
        Some(config.engine.positions_path.clone()),
        config.engine.resurrect_grace_ms,
    );
    book.load()
        .await
        .with_context(|| format!("Could not load {}", config.engine.positions_path))?;

    let positions = book.all().await;
    let stats = book.daily_stats().await;
    let now = now_ms();

    println!("\n=== SOLEXIT STATUS ===\n");
    println!("Positions: {}", positions.len());
    println!("Total Cost: {:.4} SOL", book.total_cost().await);
    println!("\nDaily Stats ({}):", stats.date);
    println!("  Trades: {}", stats.total_trades);
    println!("  Wins: {}", stats.winning_trades);
    println!("  Losses: {}", stats.losing_trades);
    println!("  Win Rate: {:.1}%", stats.win_rate());
    println!("  Net P&L: {:.4} SOL", stats.net_pnl_sol);

    println!("\n=== OPEN POSITIONS ===\n");
    if positions.is_empty() {
        println!("No open positions.");
        return Ok(());
    }
    for pos in positions {
        let mut notes = Vec::new();
        if pos.lock_armed {
            notes.push(format!("lock floor {:.1}%", pos.lock_floor_net_pct));
        }
        if pos.warming {
            notes.push("warming".to_string());
        }
        if pos.rebound_defer_until_ms.is_some_and(|until| until > now) {
            notes.push("rebound deferred".to_string());
        }
        println!(
            "{}  size={:.4}  cost={:.4} SOL  entry={:.10}  age={}s  peak={:.1}%{}",
            pos.mint,
            pos.size_ui,
            pos.cost_sol,
            pos.entry_px(),
            pos.age_ms(now) / 1000,
            pos.peak_gross_pct,
            if notes.is_empty() {
                String::new()
            } else {
                format!("  [{}]", notes.join(", "))
            }
        );
    }
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}
