//! Rebound gate: defer soft exits while a near-term recovery is predicted

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::pipeline::context::{Decision, ExitReason, ExitRules, HoldReason, PipelineContext};
use crate::pipeline::orchestrator::{PipelineDeps, Stage, StageResult};
use crate::pipeline::signals::ReboundPredictor;

pub struct ReboundGate {
    rules: Arc<ExitRules>,
    predictor: Arc<dyn ReboundPredictor>,
}

impl ReboundGate {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            rules: deps.rules.clone(),
            predictor: deps.rebound.clone(),
        }
    }

    fn gated(&self, ctx: &PipelineContext) -> bool {
        match &ctx.decision {
            Decision::Hold { .. } => false,
            d if d.is_hard_stop() => false,
            d if d.reason() == Some(&ExitReason::Rug) => false,
            _ => !ctx.urgent_is_hard(&self.rules.config),
        }
    }
}

/// Drop an expired deferral. The window start is kept until the whole
/// window has passed, so repeated deferrals share one `max_defer` budget.
fn settle_deferral(ctx: &mut PipelineContext, max_defer_ms: i64) {
    if ctx.pos.rebound_defer_until_ms.is_some_and(|until| ctx.now_ms >= until) {
        ctx.pos.rebound_defer_until_ms = None;
    }
    if ctx
        .pos
        .rebound_defer_since_ms
        .is_some_and(|since| ctx.now_ms - since >= max_defer_ms)
    {
        ctx.pos.rebound_defer_since_ms = None;
    }
}

#[async_trait]
impl Stage for ReboundGate {
    fn name(&self) -> &'static str {
        "rebound_gate"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> StageResult {
        let config = &self.rules.config;
        if !config.rebound_enabled || !self.gated(ctx) {
            settle_deferral(ctx, config.rebound_max_defer_ms);
            return StageResult::Continue;
        }

        let since = ctx.pos.rebound_defer_since_ms.unwrap_or(ctx.now_ms);
        if ctx.now_ms - since >= config.rebound_max_defer_ms {
            debug!(mint = %ctx.mint, "rebound deferral exhausted");
            ctx.pos.rebound_defer_until_ms = None;
            return StageResult::Continue;
        }
        if !self.predictor.predicts_rebound(ctx) {
            ctx.pos.rebound_defer_until_ms = None;
            return StageResult::Continue;
        }

        let until = (ctx.now_ms + config.rebound_defer_ms).min(since + config.rebound_max_defer_ms);
        info!(
            mint = %ctx.mint,
            deferred = %ctx.decision.label(),
            until,
            "exit deferred on predicted rebound"
        );
        ctx.decision = Decision::hold(HoldReason::ReboundPredictHold);
        ctx.pos.rebound_defer_since_ms = Some(since);
        ctx.pos.rebound_defer_until_ms = Some(until);
        ctx.schedule_wake(until);
        StageResult::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExitConfig;
    use crate::position::Position;

    struct AlwaysRebound;

    impl ReboundPredictor for AlwaysRebound {
        fn predicts_rebound(&self, _ctx: &PipelineContext) -> bool {
            true
        }
    }

    fn gate() -> ReboundGate {
        let config = ExitConfig {
            rebound_enabled: true,
            rebound_defer_ms: 4_000,
            rebound_max_defer_ms: 10_000,
            ..ExitConfig::default()
        };
        ReboundGate {
            rules: Arc::new(ExitRules::new(config).unwrap()),
            predictor: Arc::new(AlwaysRebound),
        }
    }

    /// One evaluation at `now`; the decision is a soft exit when `exiting`
    async fn eval(gate: &ReboundGate, pos: Position, now: i64, exiting: bool) -> PipelineContext {
        let mut ctx = PipelineContext::new(pos, now);
        if exiting {
            ctx.decision = Decision::sell_all(ExitReason::PumpDrop);
        }
        gate.run(&mut ctx).await;
        ctx
    }

    #[tokio::test]
    async fn test_deferral_capped_across_holds() {
        let gate = gate();
        let mut pos = Position::new("mint", 6, 100.0, 1.0, 0);

        // Exit, hold at each wake, exit again: the budget is not refilled
        let steps = [(1_000, true), (5_000, false), (6_000, true), (10_000, false)];
        for (now, exiting) in steps {
            let ctx = eval(&gate, pos, now, exiting).await;
            assert!(ctx.decision.is_hold());
            assert_eq!(ctx.pos.rebound_defer_since_ms, Some(1_000));
            assert!(ctx.pos.rebound_defer_until_ms.map_or(true, |until| until <= 11_000));
            pos = ctx.pos;
        }

        let ctx = eval(&gate, pos, 11_000, true).await;
        assert_eq!(ctx.decision, Decision::sell_all(ExitReason::PumpDrop));
        assert_eq!(ctx.pos.rebound_defer_until_ms, None);
    }

    #[tokio::test]
    async fn test_window_resets_after_it_passes() {
        let gate = gate();
        let pos = Position::new("mint", 6, 100.0, 1.0, 0);

        let ctx = eval(&gate, pos, 1_000, true).await;
        assert!(ctx.decision.is_hold());
        assert_eq!(ctx.pos.rebound_defer_since_ms, Some(1_000));

        // Holding inside the window keeps the start
        let ctx = eval(&gate, ctx.pos, 6_000, false).await;
        assert_eq!(ctx.pos.rebound_defer_until_ms, None);
        assert_eq!(ctx.pos.rebound_defer_since_ms, Some(1_000));

        // Exhausted: the exit goes through
        let ctx = eval(&gate, ctx.pos, 11_000, true).await;
        assert!(!ctx.decision.is_hold());

        // A fresh exit once the window is over may defer again
        let ctx = eval(&gate, ctx.pos, 12_000, false).await;
        assert_eq!(ctx.pos.rebound_defer_since_ms, None);
        let ctx = eval(&gate, ctx.pos, 13_000, true).await;
        assert!(ctx.decision.is_hold());
        assert_eq!(ctx.pos.rebound_defer_since_ms, Some(13_000));
    }
}
