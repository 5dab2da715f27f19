//! Dynamic hard stop
//!
//! The stop distance starts at `dyn_stop_base_pct`, tightens as the peak net
//! PnL grows and under market stress, and collapses to the minimum after a
//! panic drawdown from the value high. Hitting it is a hard exit that later
//! stages cannot override.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::config::ExitConfig;
use crate::pipeline::context::{Decision, ExitReason, ExitRules, PipelineContext};
use crate::pipeline::orchestrator::{PipelineDeps, Stage, StageResult};
use crate::pipeline::signals::GateIntensity;

pub struct DynamicHardStop {
    rules: Arc<ExitRules>,
    gate: Arc<dyn GateIntensity>,
}

impl DynamicHardStop {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            rules: deps.rules.clone(),
            gate: deps.gate.clone(),
        }
    }
}

/// Stop distance in net PnL percent
pub fn stop_distance(config: &ExitConfig, peak_net_pct: f64, drawdown_pct: f64, intensity: f64) -> f64 {
    let base = if drawdown_pct >= config.dyn_stop_panic_drawdown_pct {
        config.dyn_stop_min_pct
    } else {
        (config.dyn_stop_base_pct - config.dyn_stop_peak_weight * peak_net_pct.max(0.0))
            .clamp(config.dyn_stop_min_pct, config.dyn_stop_max_pct)
    };
    base * (1.0 - config.dyn_stop_gate_weight * intensity.clamp(0.0, 1.0))
}

#[async_trait]
impl Stage for DynamicHardStop {
    fn name(&self) -> &'static str {
        "dynamic_hard_stop"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> StageResult {
        let config = &self.rules.config;
        if !ctx.valuation.known || ctx.decision.is_hard_stop() {
            return StageResult::Continue;
        }
        if ctx.age_ms < config.remorse_ms || ctx.pos.awaiting_size_sync {
            return StageResult::Continue;
        }
        if ctx.in_min_hold && !ctx.flags.rug {
            return StageResult::Continue;
        }
        if ctx.pos.warming && ctx.age_ms < config.warming_grace_ms {
            return StageResult::Continue;
        }

        let drawdown_pct = if ctx.pos.hwm_sol > 0.0 {
            (ctx.pos.hwm_sol - ctx.valuation.cur_sol) / ctx.pos.hwm_sol * 100.0
        } else {
            0.0
        };
        let intensity = self.gate.intensity(ctx);
        let distance = stop_distance(config, ctx.pos.peak_net_pct, drawdown_pct, intensity);
        if ctx.valuation.pnl_net_pct > -distance {
            return StageResult::Continue;
        }

        warn!(
            mint = %ctx.mint,
            pnl_net_pct = ctx.valuation.pnl_net_pct,
            stop_pct = distance,
            drawdown_pct,
            "dynamic hard stop hit"
        );
        ctx.decision = Decision::SellAll {
            reason: ExitReason::DynHardStop,
            hard_stop: true,
        };
        StageResult::Handled("dynamic_hard_stop")
    }
}
