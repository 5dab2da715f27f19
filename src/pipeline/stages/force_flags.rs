//! Force-flag decision: rug, pump-drop, observer-drop, max-hold expiry

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::RiskMode;
use crate::pipeline::context::{Decision, ExitReason, ExitRules, PipelineContext};
use crate::pipeline::orchestrator::{PipelineDeps, Stage, StageResult};

pub struct ForceFlagDecision {
    rules: Arc<ExitRules>,
}

impl ForceFlagDecision {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            rules: deps.rules.clone(),
        }
    }

    fn rug_applies(&self, ctx: &PipelineContext) -> bool {
        let config = &self.rules.config;
        if ctx.in_min_hold && ctx.rug_sev < config.hard_severity {
            return false;
        }
        !(config.risk_mode == RiskMode::Degen && ctx.rug_sev < config.degen_rug_bypass_sev)
    }

    /// Soft observer drops are ignored while the position is above the stop
    fn observer_applies(&self, ctx: &PipelineContext) -> bool {
        let config = &self.rules.config;
        if ctx.urgent_is_hard(config) {
            return true;
        }
        !(ctx.valuation.known && ctx.valuation.pnl_net_pct > -config.stop_loss_pct)
    }

    fn expire_applies(&self, ctx: &PipelineContext) -> bool {
        let config = &self.rules.config;
        !(ctx.pos.warming && ctx.age_ms < config.warming_grace_ms + config.post_warming_grace_ms)
    }
}

#[async_trait]
impl Stage for ForceFlagDecision {
    fn name(&self) -> &'static str {
        "force_flags"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> StageResult {
        if !ctx.flags.any() || ctx.decision.is_hard_stop() {
            return StageResult::Continue;
        }

        if ctx.flags.rug {
            if self.rug_applies(ctx) {
                info!(mint = %ctx.mint, sev = ctx.rug_sev, "rug flag exit");
                ctx.decision = Decision::sell_all(ExitReason::Rug);
                return StageResult::Handled("force_flags");
            }
            debug!(mint = %ctx.mint, sev = ctx.rug_sev, "rug flag below bypass severity");
        }

        let reason = if ctx.flags.pump_drop {
            Some(ExitReason::PumpDrop)
        } else if ctx.flags.observer_drop && self.observer_applies(ctx) {
            Some(ExitReason::ObserverDrop(
                ctx.urgent_reason.clone().unwrap_or_default(),
            ))
        } else if ctx.flags.expire && self.expire_applies(ctx) {
            Some(ExitReason::MaxHoldExpire)
        } else {
            None
        };

        if let Some(reason) = reason {
            info!(mint = %ctx.mint, %reason, "force flag exit");
            ctx.decision = Decision::sell_all(reason);
        }
        StageResult::Continue
    }
}
