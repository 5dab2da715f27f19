//! Preflight: hold periods, cooldown and guard gates, balance verification

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::exchange::ExchangeClient;
use crate::pipeline::context::{ExitRules, PipelineContext};
use crate::pipeline::orchestrator::{HaltReason, PipelineDeps, Stage, StageResult};
use crate::position::model::raw_to_ui;
use crate::resilience::{CallClass, ResilienceState, RiskRegistry};

pub struct Preflight {
    rules: Arc<ExitRules>,
    exchange: Arc<ExchangeClient>,
    state: Arc<ResilienceState>,
    registry: Arc<RiskRegistry>,
    owner: Pubkey,
}

impl Preflight {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            rules: deps.rules.clone(),
            exchange: deps.exchange.clone(),
            state: deps.state.clone(),
            registry: deps.registry.clone(),
            owner: deps.owner,
        }
    }

    /// A pending urgent signal or raised rug flag strong enough to bypass
    /// the cooldown and the sell guard
    fn hard_pending(&self, ctx: &PipelineContext) -> bool {
        let urgent = self
            .registry
            .peek_urgent(&ctx.mint)
            .is_some_and(|s| self.rules.is_hard_urgent(&s.reason, s.sev));
        urgent || (ctx.flags.rug && ctx.rug_sev >= self.rules.config.hard_severity)
    }

    fn in_credit_grace(&self, ctx: &PipelineContext) -> bool {
        ctx.pos.awaiting_size_sync
            && ctx.now_ms - ctx.pos.last_buy_at_ms < self.rules.config.pending_credit_grace_ms
    }

    async fn verify_balance(&self, ctx: &mut PipelineContext) -> Option<HaltReason> {
        let config = &self.rules.config;
        let due = ctx.pos.awaiting_size_sync
            || ctx
                .pos
                .last_verified_at_ms
                .map_or(true, |at| ctx.now_ms - at >= config.balance_recheck_ms);
        if !due {
            return None;
        }
        let Ok(mint) = ExchangeClient::validate_mint(&ctx.mint) else {
            debug!(mint = %ctx.mint, "unparsable mint, balance not verified");
            return None;
        };

        let rpc = self.exchange.rpc();
        let accounts = match self
            .state
            .call(CallClass::Rpc, || rpc.token_accounts(&self.owner, &mint))
            .await
        {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(mint = %ctx.mint, "balance check failed: {}", e);
                return Some(HaltReason::BalanceUnverified);
            }
        };

        let raw: u64 = accounts.iter().map(|a| a.amount).sum();
        if raw == 0 {
            if self.in_credit_grace(ctx) {
                debug!(mint = %ctx.mint, "zero balance inside pending-credit grace");
                return Some(HaltReason::PendingCredit);
            }
            return Some(HaltReason::ZeroBalance);
        }

        let decimals = accounts
            .first()
            .map(|a| a.decimals)
            .unwrap_or(ctx.pos.decimals);
        if decimals != ctx.pos.decimals {
            ctx.pos.decimals = decimals;
        }
        if raw < ctx.pos.size_raw() && self.in_credit_grace(ctx) {
            debug!(mint = %ctx.mint, raw, "credit not landed yet");
            return Some(HaltReason::PendingCredit);
        }
        if raw != ctx.pos.size_raw() {
            let balance_ui = raw_to_ui(raw, decimals);
            info!(
                mint = %ctx.mint,
                from = ctx.pos.size_ui,
                to = balance_ui,
                "position size synced to chain"
            );
            ctx.pos.sync_to_balance(balance_ui);
        }
        ctx.pos.awaiting_size_sync = false;
        ctx.pos.last_verified_at_ms = Some(ctx.now_ms);
        None
    }
}

#[async_trait]
impl Stage for Preflight {
    fn name(&self) -> &'static str {
        "preflight"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> StageResult {
        let config = &self.rules.config;
        ctx.age_ms = ctx.pos.age_ms(ctx.now_ms);
        ctx.in_min_hold = ctx.age_ms < config.min_hold_ms;
        if config.max_hold_ms > 0 && ctx.age_ms >= config.max_hold_ms {
            ctx.flags.expire = true;
        }

        let hard = self.hard_pending(ctx);
        if self.registry.is_cooling(&ctx.mint, ctx.now_ms) && !hard && !ctx.flags.expire {
            return StageResult::Halt(HaltReason::RouterCooldown);
        }

        if let Some(until) = ctx.pos.sell_guard_until_ms {
            if ctx.now_ms < until {
                if !hard {
                    return StageResult::Halt(HaltReason::SellGuard);
                }
                ctx.in_sell_guard = true;
            } else {
                ctx.pos.sell_guard_until_ms = None;
            }
        }

        if let Some(halt) = self.verify_balance(ctx).await {
            return StageResult::Halt(halt);
        }
        if self.in_credit_grace(ctx) {
            return StageResult::Halt(HaltReason::PendingCredit);
        }
        StageResult::Continue
    }
}
