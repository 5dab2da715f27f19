//! Position record
//!
//! One `Position` per held mint. Sizes are human units (`size_ui`); raw
//! token units are derived from `decimals` only at the exchange boundary.

use serde::{Deserialize, Serialize};

use crate::position::valuation::QuoteSample;

/// Sizes at or below this are treated as fully sold
pub const SIZE_EPSILON: f64 = 1e-9;

/// A single held position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    /// Token mint address
    pub mint: String,
    /// Token decimals
    pub decimals: u8,
    /// Amount held in human units
    pub size_ui: f64,
    /// Cost basis in SOL for the amount held
    pub cost_sol: f64,
    pub acquired_at_ms: i64,
    pub last_buy_at_ms: i64,
    #[serde(default)]
    pub last_sell_at_ms: Option<i64>,

    // === High-water marks ===
    /// Best SOL-per-token price seen
    #[serde(default)]
    pub hwm_px: f64,
    /// Best gross value seen
    #[serde(default)]
    pub hwm_sol: f64,
    /// Best gross PnL percent seen
    #[serde(default)]
    pub peak_gross_pct: f64,

    // === Profit-lock ratchet ===
    #[serde(default)]
    pub lock_armed: bool,
    #[serde(default)]
    pub lock_floor_net_pct: f64,
    #[serde(default)]
    pub peak_net_pct: f64,

    // === Gates ===
    #[serde(default)]
    pub rebound_defer_until_ms: Option<i64>,
    /// First deferral of the exit currently held back by the rebound gate
    #[serde(default)]
    pub rebound_defer_since_ms: Option<i64>,
    #[serde(default)]
    pub sell_guard_until_ms: Option<i64>,
    /// Set after a buy until the on-chain balance confirms the credit
    #[serde(default)]
    pub awaiting_size_sync: bool,
    #[serde(default)]
    pub last_verified_at_ms: Option<i64>,
    /// Newly opened position still inside its warming period
    #[serde(default)]
    pub warming: bool,

    /// Last valuation sample (clamp and shock reference)
    #[serde(default)]
    pub last_sample: Option<QuoteSample>,
}

impl Position {
    /// Open a position from a confirmed (or expected) buy
    pub fn new(mint: impl Into<String>, decimals: u8, size_ui: f64, cost_sol: f64, now_ms: i64) -> Self {
        Self {
            mint: mint.into(),
            decimals,
            size_ui: size_ui.max(0.0),
            cost_sol: cost_sol.max(0.0),
            acquired_at_ms: now_ms,
            last_buy_at_ms: now_ms,
            last_sell_at_ms: None,
            hwm_px: 0.0,
            hwm_sol: 0.0,
            peak_gross_pct: 0.0,
            lock_armed: false,
            lock_floor_net_pct: 0.0,
            peak_net_pct: 0.0,
            rebound_defer_until_ms: None,
            rebound_defer_since_ms: None,
            sell_guard_until_ms: None,
            awaiting_size_sync: false,
            last_verified_at_ms: None,
            warming: false,
            last_sample: None,
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.acquired_at_ms).max(0)
    }

    /// Size in raw token units
    pub fn size_raw(&self) -> u64 {
        ui_to_raw(self.size_ui, self.decimals)
    }

    /// Average entry price in SOL per token
    pub fn entry_px(&self) -> f64 {
        if self.size_ui <= SIZE_EPSILON {
            return 0.0;
        }
        self.cost_sol / self.size_ui
    }

    pub fn is_empty(&self) -> bool {
        self.size_ui <= SIZE_EPSILON || self.size_raw() == 0
    }

    /// Scale size and cost basis down by `pct` percent.
    /// Returns `(size_sold_ui, cost_sold_sol)`.
    pub fn apply_partial_reduction(&mut self, pct: f64) -> (f64, f64) {
        let fraction = (pct / 100.0).clamp(0.0, 1.0);
        let keep = 1.0 - fraction;
        let sold = self.size_ui * fraction;
        let cost_sold = self.cost_sol * fraction;
        self.size_ui *= keep;
        self.cost_sol *= keep;
        (sold, cost_sold)
    }

    /// Align size with a verified on-chain balance. A decrease scales the
    /// cost basis by the same fraction; an increase keeps it (the credit is
    /// priced by whoever recorded the buy).
    pub fn sync_to_balance(&mut self, balance_ui: f64) {
        let balance_ui = balance_ui.max(0.0);
        if balance_ui < self.size_ui && self.size_ui > SIZE_EPSILON {
            self.cost_sol *= balance_ui / self.size_ui;
        }
        self.size_ui = balance_ui;
    }

    /// Add a buy to the position
    pub fn record_buy(&mut self, size_ui: f64, cost_sol: f64, now_ms: i64) {
        self.size_ui += size_ui.max(0.0);
        self.cost_sol += cost_sol.max(0.0);
        self.last_buy_at_ms = now_ms;
        self.awaiting_size_sync = true;
        self.last_verified_at_ms = None;
    }

    /// Forget ratchets and marks after the size changed underneath them
    pub fn reset_marks(&mut self) {
        self.hwm_px = 0.0;
        self.hwm_sol = 0.0;
        self.peak_gross_pct = 0.0;
        self.lock_armed = false;
        self.lock_floor_net_pct = 0.0;
        self.peak_net_pct = 0.0;
        self.rebound_defer_until_ms = None;
        self.rebound_defer_since_ms = None;
        self.last_sample = None;
    }
}

/// Convert human units to raw token units, rounded to the nearest unit so
/// amounts that came from a raw balance convert back exactly
pub fn ui_to_raw(size_ui: f64, decimals: u8) -> u64 {
    if size_ui <= 0.0 {
        return 0;
    }
    (size_ui * 10f64.powi(decimals as i32)).round() as u64
}

/// Convert raw token units to human units
pub fn raw_to_ui(raw: u64, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

/// Lamports to SOL
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / 1_000_000_000.0
}

/// SOL to lamports (floored)
pub fn sol_to_lamports(sol: f64) -> u64 {
    if sol <= 0.0 {
        return 0;
    }
    (sol * 1_000_000_000.0).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_reduction_scales_size_and_cost() {
        let mut pos = Position::new("mint", 6, 2000.0, 0.12, 0);
        let (sold, cost_sold) = pos.apply_partial_reduction(25.0);

        assert_eq!(pos.size_ui, 2000.0 * (1.0 - 25.0 / 100.0));
        assert_eq!(pos.cost_sol, 0.12 * (1.0 - 25.0 / 100.0));
        assert_eq!(sold, 500.0);
        assert!((cost_sold - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_partial_reduction_keeps_entry_price() {
        let mut pos = Position::new("mint", 6, 1234.5, 0.5, 0);
        let before = pos.entry_px();
        pos.apply_partial_reduction(40.0);
        assert!((pos.entry_px() - before).abs() < 1e-12);
    }

    #[test]
    fn test_sync_to_lower_balance_scales_cost() {
        let mut pos = Position::new("mint", 6, 1000.0, 1.0, 0);
        pos.sync_to_balance(250.0);
        assert_eq!(pos.size_ui, 250.0);
        assert!((pos.cost_sol - 0.25).abs() < 1e-12);

        pos.sync_to_balance(400.0);
        assert_eq!(pos.size_ui, 400.0);
        assert!((pos.cost_sol - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(ui_to_raw(1.5, 6), 1_500_000);
        assert_eq!(raw_to_ui(1_500_000, 6), 1.5);
        assert_eq!(ui_to_raw(-1.0, 6), 0);
        assert_eq!(sol_to_lamports(0.12), 120_000_000);
        assert_eq!(lamports_to_sol(5_000_000), 0.005);
    }

    #[test]
    fn test_raw_amounts_survive_ui_round_trip() {
        assert_eq!(ui_to_raw(raw_to_ui(15_839, 6), 6), 15_839);
        for decimals in [6u8, 9] {
            for raw in (1..200_000u64).chain([u64::from(u32::MAX), 999_999_999_999]) {
                assert_eq!(ui_to_raw(raw_to_ui(raw, decimals), decimals), raw, "{} @ {}", raw, decimals);
            }
        }
    }

    #[test]
    fn test_synced_position_sells_whole_balance() {
        let mut pos = Position::new("mint", 6, 1.0, 0.01, 0);
        pos.sync_to_balance(raw_to_ui(15_839, 6));
        assert_eq!(pos.size_raw(), 15_839);
    }

    #[test]
    fn test_empty_below_one_raw_unit() {
        let pos = Position::new("mint", 6, 0.0000004, 0.0, 0);
        assert!(pos.is_empty());
    }
}
