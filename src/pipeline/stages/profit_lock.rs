//! Profit lock: arm on a net gain, then ratchet a net-PnL floor upward

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::pipeline::context::{Decision, ExitReason, ExitRules, PipelineContext};
use crate::pipeline::orchestrator::{PipelineDeps, Stage, StageResult};

pub struct ProfitLock {
    rules: Arc<ExitRules>,
}

impl ProfitLock {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            rules: deps.rules.clone(),
        }
    }
}

#[async_trait]
impl Stage for ProfitLock {
    fn name(&self) -> &'static str {
        "profit_lock"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> StageResult {
        let config = &self.rules.config;
        if !config.profit_lock_enabled || !ctx.valuation.known {
            return StageResult::Continue;
        }
        let pnl = ctx.valuation.pnl_net_pct;
        let floor = (ctx.pos.peak_net_pct * config.lock_retain_fraction)
            .max(config.lock_breakeven_cushion_pct);

        if !ctx.pos.lock_armed {
            if pnl < config.lock_arm_pct {
                return StageResult::Continue;
            }
            ctx.pos.lock_armed = true;
            ctx.pos.lock_floor_net_pct = floor;
            info!(mint = %ctx.mint, pnl_net_pct = pnl, floor, "profit lock armed");

            let warming = ctx.pos.warming && ctx.age_ms < config.warming_grace_ms;
            if config.lock_harvest_pct > 0.0 && !warming && ctx.decision.is_hold() {
                ctx.decision = Decision::SellPartial {
                    pct: config.lock_harvest_pct,
                    reason: ExitReason::ProfitLockHarvest,
                };
            }
            return StageResult::Continue;
        }

        // Only ever moves up
        if floor > ctx.pos.lock_floor_net_pct {
            ctx.pos.lock_floor_net_pct = floor;
        }
        if pnl <= ctx.pos.lock_floor_net_pct && ctx.decision.is_hold() {
            info!(
                mint = %ctx.mint,
                pnl_net_pct = pnl,
                floor = ctx.pos.lock_floor_net_pct,
                "profit lock floor breached"
            );
            ctx.decision = Decision::sell_all(ExitReason::ProfitLockFloor);
        }
        StageResult::Continue
    }
}
