//! Fallback sell rules and the minimum sale notional

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::ExitConfig;
use crate::pipeline::context::{Decision, ExitReason, ExitRules, HoldReason, PipelineContext};
use crate::pipeline::orchestrator::{PipelineDeps, Stage, StageResult};

pub struct FallbackSell {
    rules: Arc<ExitRules>,
}

impl FallbackSell {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            rules: deps.rules.clone(),
        }
    }
}

/// Classic max-hold / stop-loss / take-profit / trailing rules
fn rule_decision(config: &ExitConfig, ctx: &PipelineContext) -> Option<Decision> {
    let pnl = ctx.valuation.pnl_net_pct;
    if config.max_hold_ms > 0 && ctx.age_ms >= config.max_hold_ms {
        return Some(Decision::sell_all(ExitReason::MaxHold));
    }
    if pnl <= -config.stop_loss_pct {
        return Some(Decision::sell_all(ExitReason::StopLoss));
    }
    if pnl >= config.take_profit_pct {
        if config.partial_take_profit_pct > 0.0 && config.partial_take_profit_pct < 100.0 {
            return Some(Decision::SellPartial {
                pct: config.partial_take_profit_pct,
                reason: ExitReason::TakeProfit,
            });
        }
        return Some(Decision::sell_all(ExitReason::TakeProfit));
    }
    let hwm = ctx.pos.hwm_px;
    if ctx.pos.peak_gross_pct >= config.min_profit_to_trail_pct && hwm > 0.0 {
        let off_high = (hwm - ctx.valuation.px_now) / hwm * 100.0;
        if off_high >= config.trailing_stop_pct {
            return Some(Decision::sell_all(ExitReason::TrailingStop));
        }
    }
    None
}

#[async_trait]
impl Stage for FallbackSell {
    fn name(&self) -> &'static str {
        "fallback_sell"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> StageResult {
        let config = &self.rules.config;
        let forced = ctx.flags.any();

        // A hold with a reason was decided upstream and stays
        let undecided = ctx.decision == Decision::Hold { reason: None };
        if undecided && ctx.valuation.known {
            let cooling = ctx
                .pos
                .last_sell_at_ms
                .is_some_and(|at| ctx.now_ms - at < config.sell_cooldown_ms);
            let held = ctx.in_min_hold && !forced;
            if !held && !(cooling && !ctx.is_fast_exit) {
                if let Some(decision) = rule_decision(config, ctx) {
                    ctx.decision = decision;
                }
            }
        }

        let Some(pct) = ctx.decision.sell_pct() else {
            return StageResult::Continue;
        };
        if !ctx.valuation.known || config.dust_exit_enabled || forced || ctx.is_fast_exit {
            return StageResult::Continue;
        }
        let notional = ctx.valuation.cur_sol * pct / 100.0;
        if notional < config.min_notional_sol {
            debug!(
                mint = %ctx.mint,
                notional,
                min = config.min_notional_sol,
                skipped = %ctx.decision.label(),
                "sale below minimum notional"
            );
            ctx.decision = Decision::hold(HoldReason::BelowMinNotional);
        }
        StageResult::Continue
    }
}
