//! Stage orchestrator
//!
//! Runs the stages in a fixed order against one [`PipelineContext`]. A stage
//! can let the pass continue, halt it (no decision this tick) or mark it
//! handled (decision final, later stages skipped).

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::exchange::ExchangeClient;
use crate::pipeline::context::{ExitRules, PipelineContext};
use crate::pipeline::signals::{FastExitCheck, GateIntensity, PriceHistory, ReboundPredictor};
use crate::pipeline::stages::{
    DynamicHardStop, FallbackSell, FastExit, ForceFlagDecision, Preflight, ProfitLock,
    QuoteEdge, ReboundGate, UrgentIntake,
};
use crate::position::NetEstimator;
use crate::resilience::{ResilienceState, RiskRegistry};

/// Why a pass stopped without a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    RouterCooldown,
    SellGuard,
    BalanceUnverified,
    /// On-chain balance is zero outside any pending-credit grace
    ZeroBalance,
    PendingCredit,
    QuoteUnavailable,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HaltReason::RouterCooldown => "router_cooldown",
            HaltReason::SellGuard => "sell_guard",
            HaltReason::BalanceUnverified => "balance_unverified",
            HaltReason::ZeroBalance => "zero_balance",
            HaltReason::PendingCredit => "pending_credit",
            HaltReason::QuoteUnavailable => "quote_unavailable",
        };
        f.write_str(s)
    }
}

/// Stage outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    Continue,
    Halt(HaltReason),
    /// Decision is final; remaining stages are skipped
    Handled(&'static str),
}

/// One step of the sell-decision pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &mut PipelineContext) -> StageResult;
}

/// Collaborators shared by the standard stages
#[derive(Clone)]
pub struct PipelineDeps {
    pub rules: Arc<ExitRules>,
    pub estimator: NetEstimator,
    pub exchange: Arc<ExchangeClient>,
    pub state: Arc<ResilienceState>,
    pub registry: Arc<RiskRegistry>,
    pub owner: Pubkey,
    pub history: Arc<PriceHistory>,
    pub fast_exit: Arc<dyn FastExitCheck>,
    pub gate: Arc<dyn GateIntensity>,
    pub rebound: Arc<dyn ReboundPredictor>,
}

/// Ordered stage runner
pub struct Orchestrator {
    stages: Vec<Box<dyn Stage>>,
}

impl Orchestrator {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Preflight, Urgent, Quote&Edge, FastExit, DynamicHardStop,
    /// ProfitLock, ForceFlagDecision, ReboundGate, FallbackSell
    pub fn standard(deps: &PipelineDeps) -> Self {
        Self::new(vec![
            Box::new(Preflight::new(deps)),
            Box::new(UrgentIntake::new(deps)),
            Box::new(QuoteEdge::new(deps)),
            Box::new(FastExit::new(deps)),
            Box::new(DynamicHardStop::new(deps)),
            Box::new(ProfitLock::new(deps)),
            Box::new(ForceFlagDecision::new(deps)),
            Box::new(ReboundGate::new(deps)),
            Box::new(FallbackSell::new(deps)),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage until one halts or handles the pass
    pub async fn run(&self, ctx: &mut PipelineContext) -> StageResult {
        for stage in &self.stages {
            match stage.run(ctx).await {
                StageResult::Continue => {}
                other => {
                    debug!(
                        mint = %ctx.mint,
                        stage = stage.name(),
                        result = ?other,
                        "pipeline short-circuited"
                    );
                    return other;
                }
            }
        }
        StageResult::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::{Decision, ExitReason};
    use crate::position::Position;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe {
        name: &'static str,
        result: StageResult,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Stage for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, ctx: &mut PipelineContext) -> StageResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let StageResult::Handled(_) = self.result {
                ctx.decision = Decision::sell_all(ExitReason::StopLoss);
            }
            self.result
        }
    }

    fn probe(name: &'static str, result: StageResult, calls: &Arc<AtomicUsize>) -> Box<dyn Stage> {
        Box::new(Probe {
            name,
            result,
            calls: calls.clone(),
        })
    }

    #[tokio::test]
    async fn test_halt_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = Orchestrator::new(vec![
            probe("a", StageResult::Continue, &calls),
            probe("b", StageResult::Halt(HaltReason::SellGuard), &calls),
            probe("c", StageResult::Continue, &calls),
        ]);
        let mut ctx = PipelineContext::new(Position::new("m", 6, 1.0, 1.0, 0), 0);

        let result = orchestrator.run(&mut ctx).await;
        assert_eq!(result, StageResult::Halt(HaltReason::SellGuard));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(ctx.decision.is_hold());
    }

    #[tokio::test]
    async fn test_handled_keeps_decision() {
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = Orchestrator::new(vec![
            probe("a", StageResult::Handled("a"), &calls),
            probe("b", StageResult::Continue, &calls),
        ]);
        let mut ctx = PipelineContext::new(Position::new("m", 6, 1.0, 1.0, 0), 0);

        assert_eq!(orchestrator.run(&mut ctx).await, StageResult::Handled("a"));
        assert_eq!(ctx.decision.action(), "sell_all");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.stage_names(), vec!["a", "b"]);
    }
}
