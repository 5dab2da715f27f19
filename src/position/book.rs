//! Position book
//!
//! Open positions, tombstones for recently closed mints and the realized
//! PnL ledger. The whole book is snapshotted to JSON after every change.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::position::model::Position;

/// Daily trading statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: String,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_profit_sol: f64,
    pub total_loss_sol: f64,
    pub net_pnl_sol: f64,
}

impl DailyStats {
    pub fn new() -> Self {
        Self {
            date: today(),
            ..Default::default()
        }
    }

    pub fn record_trade(&mut self, pnl_sol: f64) {
        self.total_trades += 1;
        if pnl_sol >= 0.0 {
            self.winning_trades += 1;
            self.total_profit_sol += pnl_sol;
        } else {
            self.losing_trades += 1;
            self.total_loss_sol += pnl_sol.abs();
        }
        self.net_pnl_sol = self.total_profit_sol - self.total_loss_sol;
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        (self.winning_trades as f64 / self.total_trades as f64) * 100.0
    }
}

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BookSnapshot {
    positions: HashMap<String, Position>,
    #[serde(default)]
    tombstones: HashMap<String, i64>,
    #[serde(default)]
    stats: Option<DailyStats>,
}

/// Position book shared by the engine and the executor
pub struct PositionBook {
    positions: Arc<RwLock<HashMap<String, Position>>>,
    /// mint -> closed-at timestamp
    tombstones: Arc<RwLock<HashMap<String, i64>>>,
    daily_stats: Arc<RwLock<DailyStats>>,
    persistence_path: Option<String>,
    resurrect_grace_ms: i64,
}

impl PositionBook {
    pub fn new(persistence_path: Option<String>, resurrect_grace_ms: i64) -> Self {
        Self {
            positions: Arc::new(RwLock::new(HashMap::new())),
            tombstones: Arc::new(RwLock::new(HashMap::new())),
            daily_stats: Arc::new(RwLock::new(DailyStats::new())),
            persistence_path,
            resurrect_grace_ms,
        }
    }

    /// Load the snapshot from disk
    pub async fn load(&self) -> Result<()> {
        if let Some(path) = &self.persistence_path {
            if Path::new(path).exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| Error::PositionPersistence(e.to_string()))?;

                let snapshot: BookSnapshot = serde_json::from_str(&data)
                    .map_err(|e| Error::PositionPersistence(e.to_string()))?;

                let count = snapshot.positions.len();
                *self.positions.write().await = snapshot.positions;
                let now_ms = chrono::Utc::now().timestamp_millis();
                let mut tombstones = snapshot.tombstones;
                tombstones.retain(|_, closed_at| now_ms - *closed_at < self.resurrect_grace_ms);
                *self.tombstones.write().await = tombstones;
                if let Some(stats) = snapshot.stats.filter(|s| s.date == today()) {
                    *self.daily_stats.write().await = stats;
                }

                info!("Loaded {} positions from {}", count, path);
            }
        }
        Ok(())
    }

    /// Save the snapshot to disk
    pub async fn save(&self) -> Result<()> {
        if let Some(path) = &self.persistence_path {
            let snapshot = BookSnapshot {
                positions: self.positions.read().await.clone(),
                tombstones: self.tombstones.read().await.clone(),
                stats: Some(self.daily_stats.read().await.clone()),
            };
            let data = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| Error::PositionPersistence(e.to_string()))?;

            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| Error::PositionPersistence(e.to_string()))?;
                }
            }
            tokio::fs::write(path, data)
                .await
                .map_err(|e| Error::PositionPersistence(e.to_string()))?;

            debug!("Saved {} positions to {}", snapshot.positions.len(), path);
        }
        Ok(())
    }

    /// Insert or replace a position; clears any tombstone for the mint
    pub async fn upsert(&self, position: Position) {
        let mint = position.mint.clone();
        self.tombstones.write().await.remove(&mint);
        self.positions.write().await.insert(mint, position);
    }

    /// Write back a position evaluated by the pipeline. Ignored if the mint
    /// was closed in the meantime.
    pub async fn put(&self, position: Position) -> bool {
        let mut positions = self.positions.write().await;
        match positions.get_mut(&position.mint) {
            Some(slot) => {
                *slot = position;
                true
            }
            None => false,
        }
    }

    /// Remove a fully closed position and tombstone the mint. Tombstones
    /// past the grace are dropped here.
    pub async fn close(&self, mint: &str, now_ms: i64) -> Option<Position> {
        let removed = self.positions.write().await.remove(mint);
        let grace = self.resurrect_grace_ms;
        let mut tombstones = self.tombstones.write().await;
        tombstones.retain(|_, closed_at| now_ms - *closed_at < grace);
        tombstones.insert(mint.to_string(), now_ms);
        drop(tombstones);
        if removed.is_some() {
            info!(mint, "position closed");
        }
        removed
    }

    /// True while balances for `mint` must not recreate a position
    pub async fn is_tombstoned(&self, mint: &str, now_ms: i64) -> bool {
        match self.tombstones.read().await.get(mint) {
            Some(closed_at) => now_ms - closed_at < self.resurrect_grace_ms,
            None => false,
        }
    }

    /// Record an observed credit. Creates the position when none exists
    /// and the mint is not inside its resurrection grace. Returns true when
    /// the book changed.
    pub async fn observe_credit(
        &self,
        mint: &str,
        decimals: u8,
        size_ui: f64,
        cost_sol: f64,
        now_ms: i64,
    ) -> bool {
        if size_ui <= 0.0 {
            return false;
        }
        if let Some(pos) = self.positions.write().await.get_mut(mint) {
            pos.record_buy(size_ui, cost_sol, now_ms);
            return true;
        }
        if self.is_tombstoned(mint, now_ms).await {
            debug!(mint, size_ui, "credit ignored inside resurrection grace");
            return false;
        }
        let mut pos = Position::new(mint, decimals, size_ui, cost_sol, now_ms);
        pos.awaiting_size_sync = true;
        self.upsert(pos).await;
        info!(mint, size_ui, cost_sol, "position opened");
        true
    }

    /// Record realized PnL of a sell
    pub async fn record_realized(&self, pnl_sol: f64) {
        let mut stats = self.daily_stats.write().await;
        if stats.date != today() {
            *stats = DailyStats::new();
            info!("Daily stats reset");
        }
        stats.record_trade(pnl_sol);
    }

    /// Get a position by mint
    pub async fn get(&self, mint: &str) -> Option<Position> {
        self.positions.read().await.get(mint).cloned()
    }

    /// Get all positions
    pub async fn all(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn mints(&self) -> Vec<String> {
        self.positions.read().await.keys().cloned().collect()
    }

    /// Get daily statistics
    pub async fn daily_stats(&self) -> DailyStats {
        self.daily_stats.read().await.clone()
    }

    /// Total cost basis of all open positions
    pub async fn total_cost(&self) -> f64 {
        self.positions.read().await.values().map(|p| p.cost_sol).sum()
    }

    /// Get position count
    pub async fn len(&self) -> usize {
        self.positions.read().await.len()
    }
}
