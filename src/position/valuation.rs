//! Proceeds and PnL math
//!
//! Gross proceeds come straight from a full-size sell quote. Net proceeds
//! subtract the estimated router fee, slippage and transaction cost, plus
//! the platform fee when the sale would be profitable (the only case in
//! which the fee is attached).

use serde::{Deserialize, Serialize};

use crate::config::{ExitConfig, RouterConfig};

/// Per-tick valuation written by the quote stage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Valuation {
    /// False when no quote (fresh or cached) was available this tick
    pub known: bool,
    pub cur_sol: f64,
    pub cur_sol_net: f64,
    pub pnl_pct: f64,
    pub pnl_net_pct: f64,
    /// SOL per token implied by the quote
    pub px_now: f64,
}

/// Valuation snapshot kept on the position between ticks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QuoteSample {
    pub at_ms: i64,
    pub gross_sol: f64,
    pub net_sol: f64,
    pub pnl_pct: f64,
    pub pnl_net_pct: f64,
    pub size_ui: f64,
    pub cost_sol: f64,
}

impl QuoteSample {
    /// Same position shape as `size_ui`/`cost_sol`
    pub fn same_basis(&self, size_ui: f64, cost_sol: f64) -> bool {
        nearly_equal(self.size_ui, size_ui) && nearly_equal(self.cost_sol, cost_sol)
    }
}

fn nearly_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

/// Fee/slippage-aware net proceeds estimator
#[derive(Debug, Clone, Copy)]
pub struct NetEstimator {
    pub route_fee_bps: u16,
    pub slippage_bps: u16,
    pub tx_cost_sol: f64,
    /// Platform fee charged on profitable sells; 0 when disabled
    pub platform_fee_bps: u16,
}

impl NetEstimator {
    pub fn from_config(exit: &ExitConfig, router: &RouterConfig) -> Self {
        Self {
            route_fee_bps: exit.est_route_fee_bps,
            slippage_bps: exit.est_slippage_bps,
            tx_cost_sol: exit.est_tx_cost_sol,
            platform_fee_bps: if router.platform_fee.enabled {
                router.platform_fee.fee_bps
            } else {
                0
            },
        }
    }

    /// Estimated SOL received for `gross_sol` of quoted output
    pub fn net(&self, gross_sol: f64, cost_sol: f64) -> f64 {
        let haircut = (self.route_fee_bps as f64 + self.slippage_bps as f64) / 10_000.0;
        let mut net = gross_sol * (1.0 - haircut) - self.tx_cost_sol;
        if self.platform_fee_bps > 0 && net > cost_sol {
            net -= gross_sol * self.platform_fee_bps as f64 / 10_000.0;
        }
        net.max(0.0)
    }
}

/// Percent change of `value_sol` against `cost_sol`
pub fn pnl_pct(value_sol: f64, cost_sol: f64) -> f64 {
    if cost_sol <= 0.0 {
        return 0.0;
    }
    (value_sol - cost_sol) / cost_sol * 100.0
}

/// Quote-shock check: the gross value dropped by at least `drop_pct`
/// versus `prev` within `window_ms`, with the position size unchanged.
/// Returns the observed drop percent.
pub fn detect_shock(
    prev: &QuoteSample,
    gross_sol: f64,
    size_ui: f64,
    now_ms: i64,
    drop_pct: f64,
    window_ms: i64,
) -> Option<f64> {
    if prev.gross_sol <= 0.0 || !nearly_equal(prev.size_ui, size_ui) {
        return None;
    }
    if now_ms - prev.at_ms > window_ms {
        return None;
    }
    let drop = (prev.gross_sol - gross_sol) / prev.gross_sol * 100.0;
    (drop >= drop_pct).then_some(drop)
}

/// Anti-glitch clamp. With an unchanged basis inside `window_ms`, a PnL
/// sample more than `clamp_drop_pct` below the previous one is floored at
/// exactly `previous - clamp_drop_pct`. Gross and net are clamped
/// independently; proceeds are recomputed from the clamped percentages.
/// Returns true when either value was clamped.
pub fn apply_clamp(
    prev: &QuoteSample,
    valuation: &mut Valuation,
    size_ui: f64,
    cost_sol: f64,
    now_ms: i64,
    clamp_drop_pct: f64,
    window_ms: i64,
) -> bool {
    if !prev.same_basis(size_ui, cost_sol) || now_ms - prev.at_ms > window_ms {
        return false;
    }

    let mut clamped = false;
    let gross_floor = prev.pnl_pct - clamp_drop_pct;
    if valuation.pnl_pct < gross_floor {
        valuation.pnl_pct = gross_floor;
        valuation.cur_sol = cost_sol * (1.0 + gross_floor / 100.0);
        clamped = true;
    }
    let net_floor = prev.pnl_net_pct - clamp_drop_pct;
    if valuation.pnl_net_pct < net_floor {
        valuation.pnl_net_pct = net_floor;
        valuation.cur_sol_net = cost_sol * (1.0 + net_floor / 100.0);
        clamped = true;
    }
    if clamped && size_ui > 0.0 {
        valuation.px_now = valuation.cur_sol / size_ui;
    }
    clamped
}
