//! Urgent intake: consume a pending urgent signal as the observer-drop flag

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::pipeline::context::{ExitRules, PipelineContext};
use crate::pipeline::orchestrator::{PipelineDeps, Stage, StageResult};
use crate::resilience::RiskRegistry;

pub struct UrgentIntake {
    rules: Arc<ExitRules>,
    registry: Arc<RiskRegistry>,
}

impl UrgentIntake {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            rules: deps.rules.clone(),
            registry: deps.registry.clone(),
        }
    }
}

#[async_trait]
impl Stage for UrgentIntake {
    fn name(&self) -> &'static str {
        "urgent"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> StageResult {
        let Some(pending) = self.registry.peek_urgent(&ctx.mint) else {
            return StageResult::Continue;
        };
        // Left pending until the position is old enough
        if ctx.age_ms < self.rules.config.urgent_min_age_ms {
            debug!(mint = %ctx.mint, reason = %pending.reason, "urgent signal held for warm-up");
            return StageResult::Continue;
        }
        let hard = self.rules.is_hard_urgent(&pending.reason, pending.sev);
        if ctx.in_sell_guard && !hard {
            debug!(mint = %ctx.mint, reason = %pending.reason, "urgent signal deferred by sell guard");
            return StageResult::Continue;
        }

        let Some(signal) = self.registry.take_urgent(&ctx.mint) else {
            return StageResult::Continue;
        };
        info!(
            mint = %ctx.mint,
            reason = %signal.reason,
            sev = signal.sev,
            "urgent signal consumed"
        );
        ctx.flags.observer_drop = true;
        ctx.urgent_sev = signal.sev;
        if self.rules.is_rug_reason(&signal.reason) {
            ctx.flags.rug = true;
            ctx.rug_sev = ctx.rug_sev.max(signal.sev);
        }
        ctx.urgent_reason = Some(signal.reason);
        StageResult::Continue
    }
}
