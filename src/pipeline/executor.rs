//! Decision executor
//!
//! Turns a sell decision into swaps and reconciles the book with the chain
//! afterwards. The caller holds the mint's exclusive lock; the book is saved
//! on every path that reaches the swap.

use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ExitConfig, ResilienceConfig};
use crate::error::{Error, Result};
use crate::exchange::{ExchangeClient, SellRequest, SwapResult};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::signals::PriceHistory;
use crate::position::model::{lamports_to_sol, raw_to_ui, sol_to_lamports, ui_to_raw};
use crate::position::store::{remove_logged, update_logged};
use crate::position::{Holding, HoldingStore, Position, PositionBook, SIZE_EPSILON};
use crate::resilience::{
    poll_until, CallClass, Check, ErrorKind, MintGuard, PollOutcome, PollSpec, ResilienceState,
    RiskRegistry,
};

/// What the executor did with a decision
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// Decision was a hold
    NoAction,
    DryRun { action: &'static str, reason: String },
    /// Not attempted (cooldown, position already gone)
    Skipped(&'static str),
    /// Swap failed; position untouched
    Failed {
        code: Option<ErrorKind>,
        message: String,
    },
    Partial {
        sold_ui: f64,
        proceeds_sol: f64,
        realized_pnl_sol: f64,
    },
    /// Fully sold and removed from the book
    Closed {
        proceeds_sol: f64,
        realized_pnl_sol: f64,
    },
    /// Remainder kept as a smaller position
    Shrunk {
        remaining_ui: f64,
        proceeds_sol: f64,
        realized_pnl_sol: f64,
    },
    /// Remainder below the minimum notional moved to the dust store
    Dusted {
        remaining_ui: f64,
        proceeds_sol: f64,
        realized_pnl_sol: f64,
    },
}

impl ExecOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExecOutcome::NoAction => "no_action",
            ExecOutcome::DryRun { .. } => "dry_run",
            ExecOutcome::Skipped(_) => "skipped",
            ExecOutcome::Failed { .. } => "failed",
            ExecOutcome::Partial { .. } => "partial",
            ExecOutcome::Closed { .. } => "closed",
            ExecOutcome::Shrunk { .. } => "shrunk",
            ExecOutcome::Dusted { .. } => "dusted",
        }
    }
}

/// Stores written alongside the book
#[derive(Clone)]
pub struct HoldingStores {
    pub live: Arc<dyn HoldingStore>,
    pub dust: Arc<dyn HoldingStore>,
}

pub struct DecisionExecutor {
    exchange: Arc<ExchangeClient>,
    state: Arc<ResilienceState>,
    registry: Arc<RiskRegistry>,
    book: Arc<PositionBook>,
    stores: HoldingStores,
    history: Arc<PriceHistory>,
    config: ExitConfig,
    debit_wait: PollSpec,
    dry_run: bool,
}

/// Balance slack when comparing the chain against the book
fn raw_tolerance(expected: u64) -> u64 {
    expected / 200 + 1
}

impl DecisionExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: Arc<ExchangeClient>,
        state: Arc<ResilienceState>,
        registry: Arc<RiskRegistry>,
        book: Arc<PositionBook>,
        stores: HoldingStores,
        history: Arc<PriceHistory>,
        config: ExitConfig,
        resilience: &ResilienceConfig,
        dry_run: bool,
    ) -> Self {
        Self {
            exchange,
            state,
            registry,
            book,
            stores,
            history,
            config,
            debit_wait: PollSpec::from_millis(
                resilience.balance_wait_interval_ms,
                resilience.debit_wait_timeout_ms,
            ),
            dry_run,
        }
    }

    fn owner(&self) -> Result<Pubkey> {
        self.exchange.owner().ok_or(Error::MissingSigner)
    }

    /// Execute the decision carried by `ctx` under `guard`, the lock for
    /// `ctx.mint`.
    ///
    /// Invalid mints and a missing signer are rejected before anything is
    /// touched. Swap failures leave the position as it was and come back as
    /// [`ExecOutcome::Failed`].
    pub async fn execute(&self, guard: &MintGuard, ctx: &PipelineContext) -> Result<ExecOutcome> {
        let Some(pct) = ctx.decision.sell_pct() else {
            return Ok(ExecOutcome::NoAction);
        };
        ExchangeClient::validate_mint(&ctx.mint)?;
        if self.dry_run {
            info!(
                mint = %ctx.mint,
                action = ctx.decision.action(),
                reason = %ctx.decision.label(),
                pct,
                "dry run: sell skipped"
            );
            return Ok(ExecOutcome::DryRun {
                action: ctx.decision.action(),
                reason: ctx.decision.label(),
            });
        }
        let owner = self.owner()?;
        if guard.mint() != ctx.mint {
            return Err(Error::Internal(format!(
                "lock held for {} but executing {}",
                guard.mint(),
                ctx.mint
            )));
        }

        let outcome = self.execute_locked(guard, ctx, pct, owner).await;
        if let Err(e) = self.book.save().await {
            warn!(mint = %ctx.mint, "failed to persist positions: {}", e);
        }
        Ok(outcome)
    }

    async fn execute_locked(&self, guard: &MintGuard, ctx: &PipelineContext, pct: f64, owner: Pubkey) -> ExecOutcome {
        let mint = ctx.mint.as_str();
        let bypass = ctx.decision.is_hard_stop() || ctx.is_fast_exit || ctx.flags.any();
        if self.registry.is_cooling(mint, ctx.now_ms) && !bypass {
            info!(mint, reason = %ctx.decision.label(), "sell blocked by router cooldown");
            return ExecOutcome::Skipped("router_cooldown");
        }
        let Some(pos) = self.book.get(mint).await else {
            return ExecOutcome::Skipped("position_closed");
        };

        let full = pct >= 100.0;
        let amount = if full {
            pos.size_raw()
        } else {
            ui_to_raw(pos.size_ui * pct / 100.0, pos.decimals)
        };
        let request = SellRequest {
            mint: mint.to_string(),
            amount,
            cost_basis: Some(sol_to_lamports(pos.cost_sol * pct.min(100.0) / 100.0)),
            allow_split: full,
        };
        info!(
            mint,
            action = ctx.decision.action(),
            reason = %ctx.decision.label(),
            amount,
            "executing sell"
        );

        let result = match self.exchange.sell(guard, &request).await {
            Ok(result) if result.ok => result,
            Ok(result) => {
                self.after_failure(mint, result.code, ctx.now_ms);
                return ExecOutcome::Failed {
                    code: result.code,
                    message: result.msg,
                };
            }
            Err(e) => {
                self.after_failure(mint, Some(e.kind()), ctx.now_ms);
                return ExecOutcome::Failed {
                    code: Some(e.kind()),
                    message: e.to_string(),
                };
            }
        };

        let outcome = if full {
            self.reconcile_full(ctx, &pos, &result, owner).await
        } else {
            self.reconcile_partial(ctx, &pos, pct, &result, owner).await
        };
        info!(mint, outcome = outcome.label(), "sell reconciled");
        outcome
    }

    /// Failures that do not already cool the router get a short cooldown
    fn after_failure(&self, mint: &str, code: Option<ErrorKind>, now_ms: i64) {
        let kind = code.unwrap_or(ErrorKind::SendFail);
        warn!(mint, %kind, "sell failed, position kept");
        if !kind.policy().cools_router {
            self.registry
                .set_router_cooldown(mint, now_ms + self.config.sell_cooldown_ms);
        }
    }

    async fn reconcile_partial(
        &self,
        ctx: &PipelineContext,
        pos: &Position,
        pct: f64,
        result: &SwapResult,
        owner: Pubkey,
    ) -> ExecOutcome {
        let mint = ctx.mint.as_str();
        let proceeds = lamports_to_sol(result.out_amount);
        let mut next = pos.clone();
        let (sold_ui, cost_sold) = next.apply_partial_reduction(pct);
        let realized = proceeds - cost_sold;
        self.book.record_realized(realized).await;

        let expected = next.size_raw();
        let tolerance = raw_tolerance(expected);
        match self
            .observe_balance(owner, mint, |raw| raw <= expected + tolerance)
            .await
        {
            PollOutcome::Ready(raw) => {
                if raw + tolerance < expected {
                    warn!(mint, expected, observed = raw, "post-sell balance below book, syncing");
                    next.sync_to_balance(raw_to_ui(raw, next.decimals));
                }
                next.last_verified_at_ms = Some(ctx.now_ms);
            }
            // Debit not visible yet: keep the booked reduction, preflight re-checks
            PollOutcome::TimedOut(last) => {
                debug!(mint, expected, observed = ?last, "post-sell debit not observed");
                next.last_verified_at_ms = None;
            }
        }

        if next.is_empty() {
            self.retire(owner, mint, ctx.now_ms).await;
            return ExecOutcome::Closed {
                proceeds_sol: proceeds,
                realized_pnl_sol: realized,
            };
        }
        next.last_sell_at_ms = Some(ctx.now_ms);
        self.apply_sell_guard(&mut next, ctx.now_ms);
        self.keep(owner, next).await;
        ExecOutcome::Partial {
            sold_ui,
            proceeds_sol: proceeds,
            realized_pnl_sol: realized,
        }
    }

    async fn reconcile_full(
        &self,
        ctx: &PipelineContext,
        pos: &Position,
        result: &SwapResult,
        owner: Pubkey,
    ) -> ExecOutcome {
        let mint = ctx.mint.as_str();
        let proceeds = lamports_to_sol(result.out_amount);
        let expected = pos.size_raw().saturating_sub(result.in_amount);
        let tolerance = raw_tolerance(expected);
        let (remaining_raw, verified) = match self
            .observe_balance(owner, mint, |raw| raw <= expected + tolerance)
            .await
        {
            PollOutcome::Ready(raw) => (raw, true),
            PollOutcome::TimedOut(last) => {
                debug!(mint, expected, observed = ?last, "post-sell debit not observed");
                (expected, false)
            }
        };
        let remaining_ui = raw_to_ui(remaining_raw, pos.decimals);

        if remaining_raw == 0 || remaining_ui <= SIZE_EPSILON {
            let realized = proceeds - pos.cost_sol;
            self.book.record_realized(realized).await;
            self.retire(owner, mint, ctx.now_ms).await;
            return ExecOutcome::Closed {
                proceeds_sol: proceeds,
                realized_pnl_sol: realized,
            };
        }

        let mut next = pos.clone();
        next.sync_to_balance(remaining_ui);
        let realized = proceeds - (pos.cost_sol - next.cost_sol);
        self.book.record_realized(realized).await;

        let sold_ui = raw_to_ui(result.in_amount, pos.decimals);
        let px = if sold_ui > 0.0 {
            proceeds / sold_ui
        } else {
            ctx.valuation.px_now
        };
        let remainder_value = remaining_ui * px;
        if remainder_value < self.config.min_notional_sol {
            self.book.close(mint, ctx.now_ms).await;
            remove_logged(self.stores.live.as_ref(), "live", &owner.to_string(), mint).await;
            update_logged(
                self.stores.dust.as_ref(),
                "dust",
                &owner.to_string(),
                mint,
                Holding {
                    size_ui: remaining_ui,
                    decimals: pos.decimals,
                },
            )
            .await;
            self.forget(mint);
            info!(mint, remaining_ui, value_sol = remainder_value, "remainder moved to dust");
            return ExecOutcome::Dusted {
                remaining_ui,
                proceeds_sol: proceeds,
                realized_pnl_sol: realized,
            };
        }

        next.reset_marks();
        next.last_sell_at_ms = Some(ctx.now_ms);
        next.last_verified_at_ms = verified.then_some(ctx.now_ms);
        self.apply_sell_guard(&mut next, ctx.now_ms);
        self.keep(owner, next).await;
        self.registry
            .set_router_cooldown(mint, ctx.now_ms + self.config.router_cooldown_ms);
        warn!(mint, remaining_ui, "remainder persists after full sell");
        ExecOutcome::Shrunk {
            remaining_ui,
            proceeds_sol: proceeds,
            realized_pnl_sol: realized,
        }
    }

    fn apply_sell_guard(&self, pos: &mut Position, now_ms: i64) {
        if self.config.sell_guard_ms > 0 {
            pos.sell_guard_until_ms = Some(now_ms + self.config.sell_guard_ms);
        }
    }

    async fn keep(&self, owner: Pubkey, pos: Position) {
        let holding = Holding {
            size_ui: pos.size_ui,
            decimals: pos.decimals,
        };
        let mint = pos.mint.clone();
        self.book.put(pos).await;
        update_logged(self.stores.live.as_ref(), "live", &owner.to_string(), &mint, holding).await;
    }

    async fn retire(&self, owner: Pubkey, mint: &str, now_ms: i64) {
        self.book.close(mint, now_ms).await;
        remove_logged(self.stores.live.as_ref(), "live", &owner.to_string(), mint).await;
        self.forget(mint);
    }

    fn forget(&self, mint: &str) {
        self.registry.forget(mint);
        self.history.forget(mint);
    }

    /// Wait until `done` accepts the balance. A timeout carries the last
    /// reading, which may still predate the sell.
    async fn observe_balance<F>(&self, owner: Pubkey, mint: &str, done: F) -> PollOutcome<u64>
    where
        F: Fn(u64) -> bool,
    {
        let Ok(key) = ExchangeClient::validate_mint(mint) else {
            return PollOutcome::TimedOut(None);
        };
        let rpc = self.exchange.rpc();
        let state = &self.state;
        let done = &done;
        poll_until(self.debit_wait, move || async move {
            match state
                .call_once(CallClass::Rpc, rpc.token_balance(&owner, &key))
                .await
            {
                Ok(raw) if done(raw) => Check::Done(raw),
                Ok(raw) => Check::Pending(Some(raw)),
                Err(e) => {
                    debug!(%key, "balance read failed: {}", e);
                    Check::Pending(None)
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResilienceConfig;
    use crate::pipeline::context::{Decision, ExitReason};
    use crate::position::MemoryStore;
    use crate::testkit::{self, Harness};

    struct Rig {
        h: Harness,
        book: Arc<PositionBook>,
        live: Arc<MemoryStore>,
        dust: Arc<MemoryStore>,
        executor: DecisionExecutor,
    }

    fn rig_with(h: Harness, config: ExitConfig, dry_run: bool) -> Rig {
        let book = Arc::new(PositionBook::new(None, 30_000));
        let live = Arc::new(MemoryStore::new());
        let dust = Arc::new(MemoryStore::new());
        let resilience: ResilienceConfig = testkit::fast_resilience();
        let executor = DecisionExecutor::new(
            h.exchange.clone(),
            h.state.clone(),
            h.registry.clone(),
            book.clone(),
            HoldingStores {
                live: live.clone(),
                dust: dust.clone(),
            },
            Arc::new(PriceHistory::new(60_000)),
            config,
            &resilience,
            dry_run,
        );
        Rig {
            h,
            book,
            live,
            dust,
            executor,
        }
    }

    fn rig() -> Rig {
        rig_with(Harness::new(), ExitConfig::default(), false)
    }

    impl Rig {
        async fn execute(&self, ctx: &PipelineContext) -> Result<ExecOutcome> {
            let guard = self.h.registry.lock_mint(&ctx.mint).await;
            self.executor.execute(&guard, ctx).await
        }
    }

    /// 2000 tokens (6 decimals) bought for 0.12 SOL, quoted at 0.0001 SOL each
    async fn open(rig: &Rig, now: i64) -> (String, PipelineContext) {
        let mint = testkit::mint();
        let pos = Position::new(&mint, 6, 2000.0, 0.12, now - 60_000);
        rig.book.upsert(pos.clone()).await;
        rig.h.rpc.set_token_balance(&mint, 2_000_000_000, 6);
        rig.h.router.set_px_sol(&mint, 0.0001, 6);
        (mint, PipelineContext::new(pos, now))
    }

    #[tokio::test]
    async fn test_hold_is_no_action() {
        let rig = rig();
        let now = testkit::now_ms();
        let (_, ctx) = open(&rig, now).await;
        assert_eq!(rig.execute(&ctx).await.unwrap(), ExecOutcome::NoAction);
        assert_eq!(rig.h.rpc.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_mint_rejected() {
        let rig = rig();
        let pos = Position::new("not-a-mint", 6, 10.0, 0.01, 0);
        let mut ctx = PipelineContext::new(pos, testkit::now_ms());
        ctx.decision = Decision::sell_all(ExitReason::StopLoss);
        let err = rig.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidMint(_)));
    }

    #[tokio::test]
    async fn test_missing_signer_rejected() {
        let rig = rig_with(Harness::unsigned(), ExitConfig::default(), false);
        let now = testkit::now_ms();
        let (_, mut ctx) = open(&rig, now).await;
        ctx.decision = Decision::sell_all(ExitReason::StopLoss);
        let err = rig.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::MissingSigner));
    }

    #[tokio::test]
    async fn test_guard_for_other_mint_rejected() {
        let rig = rig();
        let now = testkit::now_ms();
        let (_, mut ctx) = open(&rig, now).await;
        ctx.decision = Decision::sell_all(ExitReason::StopLoss);
        let guard = rig.h.registry.lock_mint(&testkit::mint()).await;
        let err = rig.executor.execute(&guard, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(rig.h.rpc.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let rig = rig_with(Harness::new(), ExitConfig::default(), true);
        let now = testkit::now_ms();
        let (mint, mut ctx) = open(&rig, now).await;
        ctx.decision = Decision::sell_all(ExitReason::TakeProfit);

        let outcome = rig.execute(&ctx).await.unwrap();
        assert_eq!(
            outcome,
            ExecOutcome::DryRun {
                action: "sell_all",
                reason: "take_profit".into()
            }
        );
        assert_eq!(rig.h.rpc.sent_count(), 0);
        assert_eq!(rig.book.get(&mint).await.unwrap().size_ui, 2000.0);
    }

    #[tokio::test]
    async fn test_partial_sell_scales_size_and_cost() {
        let rig = rig();
        let now = testkit::now_ms();
        let (mint, mut ctx) = open(&rig, now).await;
        rig.h.rpc.set_balance_after_send(&mint, 1_400_000_000);
        ctx.decision = Decision::SellPartial {
            pct: 30.0,
            reason: ExitReason::TakeProfit,
        };

        let outcome = rig.execute(&ctx).await.unwrap();
        let ExecOutcome::Partial {
            sold_ui,
            proceeds_sol,
            realized_pnl_sol,
        } = outcome
        else {
            panic!("expected partial, got {:?}", outcome);
        };
        assert!((sold_ui - 600.0).abs() < 1e-9);
        assert!((proceeds_sol - 0.06).abs() < 1e-9);
        assert!((realized_pnl_sol - 0.024).abs() < 1e-9);

        let pos = rig.book.get(&mint).await.unwrap();
        assert!((pos.size_ui - 1400.0).abs() < 1e-9);
        assert!((pos.cost_sol - 0.084).abs() < 1e-9);
        assert_eq!(pos.last_sell_at_ms, Some(now));
        assert_eq!(pos.last_verified_at_ms, Some(now));

        let owner = rig.h.owner.to_string();
        let held = rig.live.get(&owner, &mint).await.unwrap();
        assert!((held.size_ui - 1400.0).abs() < 1e-9);
        assert_eq!(rig.book.daily_stats().await.total_trades, 1);
    }

    #[tokio::test]
    async fn test_partial_sell_keeps_reduction_when_debit_lags() {
        let rig = rig();
        let now = testkit::now_ms();
        // Chain keeps reporting the pre-sell balance
        let (mint, mut ctx) = open(&rig, now).await;
        ctx.decision = Decision::SellPartial {
            pct: 30.0,
            reason: ExitReason::TakeProfit,
        };

        let outcome = rig.execute(&ctx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Partial { .. }), "{:?}", outcome);
        let pos = rig.book.get(&mint).await.unwrap();
        assert!((pos.size_ui - 1400.0).abs() < 1e-9);
        assert!((pos.cost_sol - 0.084).abs() < 1e-9);
        assert_eq!(pos.last_verified_at_ms, None);
    }

    #[tokio::test]
    async fn test_partial_sell_syncs_down_to_lower_balance() {
        let rig = rig();
        let now = testkit::now_ms();
        let (mint, mut ctx) = open(&rig, now).await;
        rig.h.rpc.set_balance_after_send(&mint, 700_000_000);
        ctx.decision = Decision::SellPartial {
            pct: 30.0,
            reason: ExitReason::TakeProfit,
        };

        rig.execute(&ctx).await.unwrap();
        let pos = rig.book.get(&mint).await.unwrap();
        assert!((pos.size_ui - 700.0).abs() < 1e-9);
        assert!((pos.cost_sol - 0.042).abs() < 1e-9);
        assert_eq!(pos.last_verified_at_ms, Some(now));
    }

    #[tokio::test]
    async fn test_full_sell_closes_when_debit_lags() {
        let rig = rig();
        let now = testkit::now_ms();
        let (mint, mut ctx) = open(&rig, now).await;
        ctx.decision = Decision::sell_all(ExitReason::StopLoss);

        let outcome = rig.execute(&ctx).await.unwrap();
        let ExecOutcome::Closed {
            proceeds_sol,
            realized_pnl_sol,
        } = outcome
        else {
            panic!("expected close, got {:?}", outcome);
        };
        assert!((realized_pnl_sol - (proceeds_sol - 0.12)).abs() < 1e-9);
        assert!(rig.book.get(&mint).await.is_none());
        assert!(rig.book.is_tombstoned(&mint, now + 1).await);
    }

    #[tokio::test]
    async fn test_full_sell_closes_and_tombstones() {
        let rig = rig();
        let now = testkit::now_ms();
        let (mint, mut ctx) = open(&rig, now).await;
        rig.h.rpc.set_balance_after_send(&mint, 0);
        rig.h.registry.raise_urgent(&mint, "whale_exit", 0.3, now);
        ctx.decision = Decision::sell_all(ExitReason::StopLoss);

        let outcome = rig.execute(&ctx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Closed { .. }), "{:?}", outcome);
        assert!(rig.book.get(&mint).await.is_none());
        assert!(rig.book.is_tombstoned(&mint, now + 1).await);
        assert!(rig.h.registry.peek_urgent(&mint).is_none());
        assert!(rig.live.get(&rig.h.owner.to_string(), &mint).await.is_none());

        // A late balance read inside the grace must not bring it back
        assert!(!rig.book.observe_credit(&mint, 6, 5.0, 0.0, now + 10).await);
        assert!(rig.book.get(&mint).await.is_none());
    }

    #[tokio::test]
    async fn test_small_remainder_moves_to_dust() {
        let rig = rig();
        let now = testkit::now_ms();
        let (mint, mut ctx) = open(&rig, now).await;
        // 1 token left, worth 0.0001 SOL
        rig.h.rpc.set_balance_after_send(&mint, 1_000_000);
        ctx.decision = Decision::sell_all(ExitReason::StopLoss);

        let outcome = rig.execute(&ctx).await.unwrap();
        let ExecOutcome::Dusted { remaining_ui, .. } = outcome else {
            panic!("expected dust, got {:?}", outcome);
        };
        assert!((remaining_ui - 1.0).abs() < 1e-9);
        assert!(rig.book.get(&mint).await.is_none());
        let owner = rig.h.owner.to_string();
        assert!(rig.live.get(&owner, &mint).await.is_none());
        assert_eq!(rig.dust.get(&owner, &mint).await.unwrap().decimals, 6);
    }

    #[tokio::test]
    async fn test_large_remainder_shrinks_and_cools() {
        let rig = rig();
        let now = testkit::now_ms();
        let (mint, mut ctx) = open(&rig, now).await;
        rig.h.rpc.set_balance_after_send(&mint, 500_000_000);
        ctx.decision = Decision::sell_all(ExitReason::StopLoss);

        let outcome = rig.execute(&ctx).await.unwrap();
        let ExecOutcome::Shrunk { remaining_ui, .. } = outcome else {
            panic!("expected shrink, got {:?}", outcome);
        };
        assert!((remaining_ui - 500.0).abs() < 1e-9);
        let pos = rig.book.get(&mint).await.unwrap();
        assert!((pos.cost_sol - 0.03).abs() < 1e-9);
        assert_eq!(pos.hwm_px, 0.0);
        assert!(rig.h.registry.is_cooling(&mint, now + 1));
    }

    #[tokio::test]
    async fn test_cooldown_skips_soft_sell_but_not_hard_stop() {
        let rig = rig();
        let now = testkit::now_ms();
        let (mint, mut ctx) = open(&rig, now).await;
        rig.h.registry.set_router_cooldown(&mint, now + 60_000);

        ctx.decision = Decision::sell_all(ExitReason::TakeProfit);
        assert_eq!(
            rig.execute(&ctx).await.unwrap(),
            ExecOutcome::Skipped("router_cooldown")
        );
        assert_eq!(rig.h.rpc.sent_count(), 0);

        rig.h.rpc.set_balance_after_send(&mint, 0);
        ctx.decision = Decision::SellAll {
            reason: ExitReason::DynHardStop,
            hard_stop: true,
        };
        let outcome = rig.execute(&ctx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Closed { .. }), "{:?}", outcome);
    }

    #[tokio::test]
    async fn test_failed_sell_keeps_position() {
        let rig = rig();
        let now = testkit::now_ms();
        let (mint, mut ctx) = open(&rig, now).await;
        rig.h.router.fail_quotes(&mint, "Could not find any route");
        ctx.decision = Decision::sell_all(ExitReason::StopLoss);

        let outcome = rig.execute(&ctx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Failed { .. }), "{:?}", outcome);
        let pos = rig.book.get(&mint).await.unwrap();
        assert_eq!(pos.size_ui, 2000.0);
        assert_eq!(pos.cost_sol, 0.12);
        assert!(rig.h.registry.is_cooling(&mint, now + 1));
    }
}
