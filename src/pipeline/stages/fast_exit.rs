//! Fast exit: delegate to the external fast-trigger check

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::pipeline::context::{Decision, ExitReason, PipelineContext};
use crate::pipeline::orchestrator::{PipelineDeps, Stage, StageResult};
use crate::pipeline::signals::FastExitCheck;

pub struct FastExit {
    check: Arc<dyn FastExitCheck>,
}

impl FastExit {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            check: deps.fast_exit.clone(),
        }
    }
}

#[async_trait]
impl Stage for FastExit {
    fn name(&self) -> &'static str {
        "fast_exit"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> StageResult {
        if !ctx.decision.is_hold() {
            return StageResult::Continue;
        }
        if let Some(signal) = self.check.check(ctx) {
            info!(mint = %ctx.mint, reason = %signal.reason, "fast exit triggered");
            ctx.decision = Decision::sell_all(ExitReason::FastExit(signal.reason));
            ctx.is_fast_exit = true;
        }
        StageResult::Continue
    }
}
