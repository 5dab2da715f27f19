//! Quote & edge: value the full position, detect shocks, clamp glitches

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::exchange::ExchangeClient;
use crate::pipeline::context::{ExitRules, PipelineContext};
use crate::pipeline::orchestrator::{HaltReason, PipelineDeps, Stage, StageResult};
use crate::pipeline::signals::PriceHistory;
use crate::position::model::lamports_to_sol;
use crate::position::valuation::{apply_clamp, detect_shock, pnl_pct};
use crate::position::{NetEstimator, QuoteSample, Valuation};
use crate::resilience::RiskRegistry;

/// Reason attached to the urgent signal raised on a quote shock
pub const QUOTE_SHOCK_REASON: &str = "rug_quote_shock";

#[derive(Debug, Clone, Copy)]
struct CachedQuote {
    at_ms: i64,
    amount: u64,
    out: u64,
}

pub struct QuoteEdge {
    rules: Arc<ExitRules>,
    estimator: NetEstimator,
    exchange: Arc<ExchangeClient>,
    registry: Arc<RiskRegistry>,
    history: Arc<PriceHistory>,
    cache: DashMap<String, CachedQuote>,
}

impl QuoteEdge {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            rules: deps.rules.clone(),
            estimator: deps.estimator,
            exchange: deps.exchange.clone(),
            registry: deps.registry.clone(),
            history: deps.history.clone(),
            cache: DashMap::new(),
        }
    }

    /// Output for selling `amount`: cached, fresh, or stale on quote failure.
    /// Returns `(out_lamports, fresh)`.
    async fn full_size_out(&self, mint: &str, amount: u64, now_ms: i64) -> Option<(u64, bool)> {
        let config = &self.rules.config;
        let cached = self
            .cache
            .get(mint)
            .map(|c| *c)
            .filter(|c| c.amount == amount);
        if let Some(c) = cached.filter(|c| now_ms - c.at_ms < config.quote_cache_ms) {
            return Some((c.out, false));
        }

        match self.exchange.quote_sell(mint, amount).await {
            Ok(quote) => {
                self.cache.insert(
                    mint.to_string(),
                    CachedQuote {
                        at_ms: now_ms,
                        amount,
                        out: quote.out_amount,
                    },
                );
                Some((quote.out_amount, true))
            }
            Err(e) => {
                debug!(mint, "full-size quote failed: {}", e);
                cached
                    .filter(|c| now_ms - c.at_ms < config.quote_stale_ms)
                    .map(|c| (c.out, false))
            }
        }
    }
}

#[async_trait]
impl Stage for QuoteEdge {
    fn name(&self) -> &'static str {
        "quote_edge"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> StageResult {
        let config = &self.rules.config;
        let amount = ctx.pos.size_raw();
        if amount == 0 {
            return StageResult::Halt(HaltReason::ZeroBalance);
        }

        let Some((out, fresh)) = self.full_size_out(&ctx.mint, amount, ctx.now_ms).await else {
            if ctx.flags.any() {
                debug!(mint = %ctx.mint, "no quote, continuing on force flags");
                ctx.valuation = Valuation::default();
                return StageResult::Continue;
            }
            return StageResult::Halt(HaltReason::QuoteUnavailable);
        };

        let size = ctx.pos.size_ui;
        let cost = ctx.pos.cost_sol;
        let gross = lamports_to_sol(out);
        let net = self.estimator.net(gross, cost);
        let mut valuation = Valuation {
            known: true,
            cur_sol: gross,
            cur_sol_net: net,
            pnl_pct: pnl_pct(gross, cost),
            pnl_net_pct: pnl_pct(net, cost),
            px_now: if size > 0.0 { gross / size } else { 0.0 },
        };

        let shock = ctx.pos.last_sample.filter(|_| fresh).and_then(|prev| {
            detect_shock(
                &prev,
                gross,
                size,
                ctx.now_ms,
                config.shock_drop_pct,
                config.shock_window_ms,
            )
        });
        if let Some(drop) = shock {
            warn!(mint = %ctx.mint, drop_pct = drop, "quote shock");
            self.registry
                .raise_urgent(&ctx.mint, QUOTE_SHOCK_REASON, 1.0, ctx.now_ms);
        }
        let shocked = shock.is_some();

        if config.clamp_enabled && !shocked && !ctx.flags.any() {
            if let Some(prev) = ctx.pos.last_sample {
                if apply_clamp(
                    &prev,
                    &mut valuation,
                    size,
                    cost,
                    ctx.now_ms,
                    config.clamp_drop_pct,
                    config.clamp_window_ms,
                ) {
                    debug!(
                        mint = %ctx.mint,
                        pnl_net_pct = valuation.pnl_net_pct,
                        "valuation clamped"
                    );
                }
            }
        }

        if fresh {
            ctx.pos.last_sample = Some(QuoteSample {
                at_ms: ctx.now_ms,
                gross_sol: valuation.cur_sol,
                net_sol: valuation.cur_sol_net,
                pnl_pct: valuation.pnl_pct,
                pnl_net_pct: valuation.pnl_net_pct,
                size_ui: size,
                cost_sol: cost,
            });
            self.history.record(&ctx.mint, ctx.now_ms, valuation.px_now);
        }

        let pos = &mut ctx.pos;
        pos.hwm_px = pos.hwm_px.max(valuation.px_now);
        pos.hwm_sol = pos.hwm_sol.max(valuation.cur_sol);
        pos.peak_gross_pct = pos.peak_gross_pct.max(valuation.pnl_pct);
        pos.peak_net_pct = pos.peak_net_pct.max(valuation.pnl_net_pct);

        ctx.valuation = valuation;
        StageResult::Continue
    }
}
