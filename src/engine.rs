//! Sell engine
//!
//! Evaluates every open position once per tick: builds a context, runs the
//! standard stages and hands the decision to the executor. Mints deferred by
//! the rebound gate are evaluated again as soon as their wake time passes.

use dashmap::DashMap;
use futures::future::join_all;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::exchange::{
    BuyRequest, ChainRpc, ExchangeClient, JupiterHttp, SolanaRpc, SwapResult, TradeSigner,
};
use crate::pipeline::{
    DecisionExecutor, ExecOutcome, ExitRules, FastExitCheck, GateIntensity, HaltReason,
    HoldingStores, MomentumFastExit, NeutralGate, Orchestrator, PipelineContext, PipelineDeps,
    PriceHistory, ReboundPredictor, RollingReboundPredictor, StageResult,
};
use crate::position::model::{lamports_to_sol, raw_to_ui};
use crate::position::store::{remove_logged, update_logged};
use crate::position::{Holding, JsonFileStore, NetEstimator, Position, PositionBook, Valuation};
use crate::resilience::{
    poll_until, CallClass, Check, MintGuard, PollSpec, ResilienceState, RiskRegistry,
};

/// How often pending wake-ups are checked between ticks
const WAKE_RESOLUTION_MS: u64 = 250;

/// Result of evaluating one mint
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub mint: String,
    /// `none`, `sell_partial` or `sell_all`
    pub action: &'static str,
    pub reason: String,
    pub halt: Option<HaltReason>,
    pub valuation: Valuation,
    pub outcome: Option<ExecOutcome>,
}

/// Shared components the engine is assembled from
pub struct EngineParts {
    pub exchange: Arc<ExchangeClient>,
    pub state: Arc<ResilienceState>,
    pub registry: Arc<RiskRegistry>,
    pub book: Arc<PositionBook>,
    pub stores: HoldingStores,
}

/// Replaceable market signals
pub struct Signals {
    pub fast_exit: Arc<dyn FastExitCheck>,
    pub gate: Arc<dyn GateIntensity>,
    pub rebound: Arc<dyn ReboundPredictor>,
}

impl Signals {
    /// Rolling-window defaults fed by the quote stage
    pub fn builtin(history: &Arc<PriceHistory>, config: &Config) -> Self {
        Self {
            fast_exit: Arc::new(MomentumFastExit::new(history.clone(), &config.exit)),
            gate: Arc::new(NeutralGate),
            rebound: Arc::new(RollingReboundPredictor::new(history.clone(), &config.exit)),
        }
    }
}

pub struct SellEngine {
    exchange: Arc<ExchangeClient>,
    state: Arc<ResilienceState>,
    registry: Arc<RiskRegistry>,
    book: Arc<PositionBook>,
    stores: HoldingStores,
    history: Arc<PriceHistory>,
    rules: Arc<ExitRules>,
    orchestrator: Orchestrator,
    executor: DecisionExecutor,
    owner: Pubkey,
    /// mint -> earliest time to evaluate again
    wakes: DashMap<String, i64>,
    credit_wait: PollSpec,
    tick_interval: Duration,
}

impl SellEngine {
    pub fn new(config: &Config, parts: EngineParts) -> Result<Self> {
        let history = Arc::new(PriceHistory::for_config(&config.exit));
        let signals = Signals::builtin(&history, config);
        Self::with_signals(config, parts, history, signals)
    }

    pub fn with_signals(
        config: &Config,
        parts: EngineParts,
        history: Arc<PriceHistory>,
        signals: Signals,
    ) -> Result<Self> {
        let owner = parts.exchange.owner().ok_or(Error::MissingSigner)?;
        let rules = Arc::new(ExitRules::new(config.exit.clone())?);
        let deps = PipelineDeps {
            rules: rules.clone(),
            estimator: NetEstimator::from_config(&config.exit, &config.router),
            exchange: parts.exchange.clone(),
            state: parts.state.clone(),
            registry: parts.registry.clone(),
            owner,
            history: history.clone(),
            fast_exit: signals.fast_exit,
            gate: signals.gate,
            rebound: signals.rebound,
        };
        let executor = DecisionExecutor::new(
            parts.exchange.clone(),
            parts.state.clone(),
            parts.registry.clone(),
            parts.book.clone(),
            parts.stores.clone(),
            history.clone(),
            config.exit.clone(),
            &config.resilience,
            config.engine.dry_run,
        );

        Ok(Self {
            exchange: parts.exchange,
            state: parts.state,
            registry: parts.registry,
            book: parts.book,
            stores: parts.stores,
            history,
            rules,
            orchestrator: Orchestrator::standard(&deps),
            executor,
            owner,
            wakes: DashMap::new(),
            credit_wait: PollSpec::from_millis(
                config.resilience.balance_wait_interval_ms,
                config.resilience.credit_wait_timeout_ms,
            ),
            tick_interval: Duration::from_millis(config.engine.tick_interval_ms.max(1)),
        })
    }

    /// Wire the production router, RPC and stores, then load the snapshot
    pub async fn connect(config: &Config, signer: Arc<dyn TradeSigner>) -> Result<Self> {
        let state = Arc::new(ResilienceState::new(&config.resilience));
        let registry = Arc::new(RiskRegistry::new());
        let rpc: Arc<dyn ChainRpc> = Arc::new(SolanaRpc::new(&config.rpc));
        let exchange = Arc::new(ExchangeClient::new(
            Arc::new(JupiterHttp::new(&config.router)?),
            rpc,
            Some(signer),
            state.clone(),
            registry.clone(),
            config.router.clone(),
            &config.resilience,
            config.exit.router_cooldown_ms,
        ));
        let book = Arc::new(PositionBook::new(
            Some(config.engine.positions_path.clone()),
            config.engine.resurrect_grace_ms,
        ));
        book.load().await?;
        let stores = HoldingStores {
            live: Arc::new(JsonFileStore::open(&config.engine.live_store_path).await?),
            dust: Arc::new(JsonFileStore::open(&config.engine.dust_store_path).await?),
        };

        let engine = Self::new(
            config,
            EngineParts {
                exchange,
                state,
                registry,
                book,
                stores,
            },
        )?;
        engine.sync_live_store().await;
        Ok(engine)
    }

    pub fn owner(&self) -> Pubkey {
        self.owner
    }

    pub fn book(&self) -> &Arc<PositionBook> {
        &self.book
    }

    /// Urgent signals and force flags are raised here by observers
    pub fn registry(&self) -> &Arc<RiskRegistry> {
        &self.registry
    }

    pub fn next_wake(&self, mint: &str) -> Option<i64> {
        self.wakes.get(mint).map(|at| *at)
    }

    /// Make the live store mirror the book
    pub async fn sync_live_store(&self) {
        let owner = self.owner.to_string();
        let positions = self.book.all().await;
        match self.stores.live.list_for_owner(&owner).await {
            Ok(listed) => {
                for (mint, _) in listed {
                    if !positions.iter().any(|p| p.mint == mint) {
                        remove_logged(self.stores.live.as_ref(), "live", &owner, &mint).await;
                    }
                }
            }
            Err(e) => warn!("live store listing failed: {}", e),
        }
        for pos in positions {
            let holding = Holding {
                size_ui: pos.size_ui,
                decimals: pos.decimals,
            };
            update_logged(self.stores.live.as_ref(), "live", &owner, &pos.mint, holding).await;
        }
    }

    /// Evaluate one mint; `None` when it has no open position.
    ///
    /// The mint's lock is held from reading the position until it is written
    /// back and any sell has been reconciled.
    pub async fn evaluate(&self, mint: &str, now_ms: i64) -> Option<TickReport> {
        let guard = self.registry.lock_mint(mint).await;
        let report = self.evaluate_locked(&guard, mint, now_ms).await;
        drop(guard);
        if self.book.get(mint).await.is_none() {
            self.registry.release_lock(mint);
        }
        report
    }

    async fn evaluate_locked(&self, guard: &MintGuard, mint: &str, now_ms: i64) -> Option<TickReport> {
        let pos = self.book.get(mint).await?;
        let mut ctx = PipelineContext::new(pos, now_ms);
        let (rug, pump_drop) = self.registry.peek_flags(mint);
        if let Some(sev) = rug {
            ctx.flags.rug = true;
            ctx.rug_sev = sev;
        }
        ctx.flags.pump_drop = pump_drop;

        let result = self.orchestrator.run(&mut ctx).await;
        match ctx.wake_at_ms {
            Some(at) => {
                self.wakes.insert(mint.to_string(), at);
            }
            None => {
                self.wakes.remove(mint);
            }
        }

        let mut report = TickReport {
            mint: mint.to_string(),
            action: ctx.decision.action(),
            reason: ctx.decision.label(),
            halt: None,
            valuation: ctx.valuation,
            outcome: None,
        };
        match result {
            StageResult::Halt(HaltReason::ZeroBalance) => {
                self.retire(mint, now_ms).await;
                report.halt = Some(HaltReason::ZeroBalance);
                return Some(report);
            }
            StageResult::Halt(reason) => {
                debug!(mint, %reason, "evaluation halted");
                self.book.put(ctx.pos).await;
                report.halt = Some(reason);
                return Some(report);
            }
            StageResult::Continue | StageResult::Handled(_) => {}
        }

        self.book.put(ctx.pos.clone()).await;
        if ctx.decision.is_hold() {
            return Some(report);
        }
        info!(
            mint,
            action = report.action,
            reason = %report.reason,
            pnl_net_pct = ctx.valuation.pnl_net_pct,
            "sell decision"
        );
        let outcome = match self.executor.execute(guard, &ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(mint, "sell rejected: {}", e);
                ExecOutcome::Failed {
                    code: Some(e.kind()),
                    message: e.to_string(),
                }
            }
        };
        report.outcome = Some(outcome);
        Some(report)
    }

    /// Position verified empty on-chain outside any pending credit
    async fn retire(&self, mint: &str, now_ms: i64) {
        info!(mint, "zero on-chain balance, retiring position");
        self.book.close(mint, now_ms).await;
        remove_logged(self.stores.live.as_ref(), "live", &self.owner.to_string(), mint).await;
        self.registry.forget(mint);
        self.history.forget(mint);
        self.wakes.remove(mint);
    }

    /// Evaluate every open position
    pub async fn tick(&self, now_ms: i64) -> Vec<TickReport> {
        let mints = self.book.mints().await;
        let reports: Vec<TickReport> = join_all(mints.iter().map(|m| self.evaluate(m, now_ms)))
            .await
            .into_iter()
            .flatten()
            .collect();
        if let Err(e) = self.book.save().await {
            warn!("failed to persist positions: {}", e);
        }
        reports
    }

    /// Evaluate mints whose wake time has passed
    pub async fn wake_due(&self, now_ms: i64) -> Vec<TickReport> {
        let due: Vec<String> = self
            .wakes
            .iter()
            .filter(|e| *e.value() <= now_ms)
            .map(|e| e.key().clone())
            .collect();
        let mut reports = Vec::with_capacity(due.len());
        for mint in due {
            self.wakes.remove(&mint);
            debug!(mint = %mint, "wake-up evaluation");
            if let Some(report) = self.evaluate(&mint, now_ms).await {
                reports.push(report);
            }
        }
        reports
    }

    /// Tick until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            owner = %self.owner,
            positions = self.book.len().await,
            tick_ms = self.tick_interval.as_millis() as u64,
            "sell engine started"
        );
        let mut ticks = tokio::time::interval(self.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut wake_checks = tokio::time::interval(Duration::from_millis(WAKE_RESOLUTION_MS));
        wake_checks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = ticks.tick() => {
                    let reports = self.tick(now_ms()).await;
                    let sells = reports.iter().filter(|r| r.outcome.is_some()).count();
                    debug!(evaluated = reports.len(), sells, "tick complete");
                }
                _ = wake_checks.tick() => {
                    self.wake_due(now_ms()).await;
                }
            }
        }

        self.book.save().await?;
        let stats = self.book.daily_stats().await;
        info!(
            trades = stats.total_trades,
            net_pnl_sol = stats.net_pnl_sol,
            "sell engine stopped"
        );
        Ok(())
    }

    // === Buy path ===

    /// Buy `lamports` worth of `mint` and open (or add to) its position once
    /// the credit shows up on-chain
    pub async fn open_position(&self, mint: &str, lamports: u64, now_ms: i64) -> Result<SwapResult> {
        let key = ExchangeClient::validate_mint(mint)?;
        let guard = self.registry.lock_mint(mint).await;
        let result = self.open_locked(key, mint, lamports, now_ms).await;
        drop(guard);
        if self.book.get(mint).await.is_none() {
            self.registry.release_lock(mint);
        }
        result
    }

    async fn open_locked(&self, key: Pubkey, mint: &str, lamports: u64, now_ms: i64) -> Result<SwapResult> {
        let rpc = self.exchange.rpc();
        let before = self
            .state
            .call(CallClass::Rpc, || rpc.token_balance(&self.owner, &key))
            .await
            .unwrap_or(0);

        let result = self
            .exchange
            .buy(&BuyRequest {
                mint: mint.to_string(),
                lamports,
            })
            .await?;
        if !result.ok {
            warn!(mint, code = ?result.code, "buy failed: {}", result.msg);
            return Ok(result);
        }

        let (raw, decimals) = match self.await_credit(key, before).await {
            Some(credit) => credit,
            None => {
                warn!(mint, "credit not observed, using quoted amount");
                let decimals = self.mint_decimals(&key).await?;
                (before + result.out_amount, decimals)
            }
        };
        let size_ui = raw_to_ui(raw.saturating_sub(before), decimals);
        let cost_sol = lamports_to_sol(result.in_amount);

        if !self
            .book
            .observe_credit(mint, decimals, size_ui, cost_sol, now_ms)
            .await
        {
            // Our own fill, never a stale read
            let mut pos = Position::new(mint, decimals, size_ui, cost_sol, now_ms);
            pos.awaiting_size_sync = true;
            self.book.upsert(pos).await;
        }
        if let Some(mut pos) = self.book.get(mint).await {
            if self.rules.config.warm_new_positions && pos.acquired_at_ms == now_ms {
                pos.warming = true;
                self.book.put(pos.clone()).await;
            }
            let holding = Holding {
                size_ui: pos.size_ui,
                decimals: pos.decimals,
            };
            update_logged(
                self.stores.live.as_ref(),
                "live",
                &self.owner.to_string(),
                mint,
                holding,
            )
            .await;
        }
        if let Err(e) = self.book.save().await {
            warn!(mint, "failed to persist positions: {}", e);
        }
        Ok(result)
    }

    /// Balance above `before`, with its decimals
    async fn await_credit(&self, key: Pubkey, before: u64) -> Option<(u64, u8)> {
        let rpc = self.exchange.rpc();
        let state = &self.state;
        let owner = self.owner;
        poll_until(self.credit_wait, move || async move {
            match state
                .call_once(CallClass::Rpc, rpc.token_accounts(&owner, &key))
                .await
            {
                Ok(accounts) => {
                    let raw: u64 = accounts.iter().map(|a| a.amount).sum();
                    match accounts.first() {
                        Some(account) if raw > before => Check::Done((raw, account.decimals)),
                        _ => Check::Pending(None),
                    }
                }
                Err(e) => {
                    debug!(%key, "credit check failed: {}", e);
                    Check::Pending(None)
                }
            }
        })
        .await
        .into_last()
    }

    /// Decimals from the mint account (classic or 2022 layout)
    async fn mint_decimals(&self, key: &Pubkey) -> Result<u8> {
        let rpc = self.exchange.rpc();
        let data = self
            .state
            .call(CallClass::Rpc, || rpc.account_data(key))
            .await?
            .ok_or_else(|| Error::InvalidMint(key.to_string()))?;
        let base = data
            .get(..spl_token::state::Mint::LEN)
            .ok_or_else(|| Error::InvalidMint(key.to_string()))?;
        let mint = spl_token::state::Mint::unpack(base)
            .map_err(|e| Error::InvalidMint(format!("{}: {}", key, e)))?;
        Ok(mint.decimals)
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
