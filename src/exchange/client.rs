//! Tiered swap execution
//!
//! A swap escalates through submission tiers until one lands:
//! 1. quote (sells retry with the opposite intermediate-token restriction)
//! 2. router-assembled transaction, then with shared program accounts
//! 3. router-assembled legacy transaction
//! 4. raw instructions compiled locally with lookup tables (both shared
//!    settings)
//!
//! Sells add two fallbacks on top: relaxed slippage/routing, then
//! split-sell across a descending list of size fractions. Failures inside a
//! tier are classified and only ever escalate; the caller sees a final
//! [`SwapResult`] or one of the sentinel errors.

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::cmp::Ordering as CmpOrdering;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ResilienceConfig, RouterConfig};
use crate::error::{Error, Result};
use crate::exchange::confirm::{
    await_confirmation, classify_failure, resolve_unconfirmed, Confirmation,
};
use crate::exchange::fees::{fee_quote_acceptable, plan_fee};
use crate::exchange::router::RouterApi;
use crate::exchange::rpc::ChainRpc;
use crate::exchange::signer::TradeSigner;
use crate::exchange::tx;
use crate::exchange::types::{
    Quote, QuoteRequest, Side, SwapRequest, SwapResult, SwapTier, WSOL_MINT,
};
use crate::position::model::sol_to_lamports;
use crate::resilience::{
    CallClass, ErrorKind, Escalation, MintGuard, PollSpec, ResilienceState, RiskRegistry,
};

/// Submission tiers in escalation order
const LADDER: [SwapTier; 5] = [
    SwapTier::Assembled,
    SwapTier::AssembledShared,
    SwapTier::Legacy,
    SwapTier::Manual,
    SwapTier::ManualShared,
];

/// Tolerated route degradation when comparing fee and no-fee quotes
const FEE_SLACK_BPS: u16 = 10;

/// Lamports kept aside for fees and rent when buying
const BUY_FEE_RESERVE_LAMPORTS: u64 = 5_000_000;

/// Sell parameters
#[derive(Debug, Clone)]
pub struct SellRequest {
    pub mint: String,
    /// Raw token amount
    pub amount: u64,
    /// Cost basis of `amount` in lamports; enables the platform fee check
    pub cost_basis: Option<u64>,
    pub allow_split: bool,
}

/// Buy parameters
#[derive(Debug, Clone)]
pub struct BuyRequest {
    pub mint: String,
    pub lamports: u64,
}

type TierFailure = (ErrorKind, String);

/// Swap execution engine
pub struct ExchangeClient {
    router: Arc<dyn RouterApi>,
    rpc: Arc<dyn ChainRpc>,
    signer: Option<Arc<dyn TradeSigner>>,
    state: Arc<ResilienceState>,
    registry: Arc<RiskRegistry>,
    config: RouterConfig,
    confirm_spec: PollSpec,
    router_cooldown_ms: i64,
    /// Cleared once shared accounts are seen unsupported
    shared_supported: AtomicBool,
}

impl ExchangeClient {
    pub fn new(
        router: Arc<dyn RouterApi>,
        rpc: Arc<dyn ChainRpc>,
        signer: Option<Arc<dyn TradeSigner>>,
        state: Arc<ResilienceState>,
        registry: Arc<RiskRegistry>,
        config: RouterConfig,
        resilience: &ResilienceConfig,
        router_cooldown_ms: i64,
    ) -> Self {
        let shared = config.shared_accounts_enabled;
        Self {
            router,
            rpc,
            signer,
            state,
            registry,
            config,
            confirm_spec: PollSpec::from_millis(
                resilience.confirm_interval_ms,
                resilience.confirm_timeout_ms,
            ),
            router_cooldown_ms,
            shared_supported: AtomicBool::new(shared),
        }
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    pub fn owner(&self) -> Option<Pubkey> {
        self.signer.as_ref().map(|s| s.address())
    }

    pub fn shared_accounts_supported(&self) -> bool {
        self.shared_supported.load(Ordering::Relaxed)
    }

    fn signer(&self) -> Result<Arc<dyn TradeSigner>> {
        self.signer.clone().ok_or(Error::MissingSigner)
    }

    /// Parse a mint address; the wrapped settlement asset cannot be traded
    pub fn validate_mint(mint: &str) -> Result<Pubkey> {
        if mint == WSOL_MINT {
            return Err(Error::InvalidMint(mint.to_string()));
        }
        Pubkey::from_str(mint).map_err(|_| Error::InvalidMint(mint.to_string()))
    }

    // === Quotes ===

    async fn quote(&self, req: &QuoteRequest) -> Result<Quote> {
        self.state
            .call(CallClass::Quote, || self.router.quote(req))
            .await
    }

    /// Quote; sells retry once with the opposite restriction setting
    async fn quote_for(&self, req: &QuoteRequest, side: Side) -> Result<Quote> {
        match self.quote(req).await {
            Ok(quote) => Ok(quote),
            Err(e) if side == Side::Sell => {
                debug!(
                    mint = %req.input_mint,
                    restrict = req.restrict_intermediate,
                    "sell quote failed, flipping restriction: {}", e
                );
                let flipped = QuoteRequest {
                    restrict_intermediate: !req.restrict_intermediate,
                    ..req.clone()
                };
                self.quote(&flipped).await
            }
            Err(e) => Err(e),
        }
    }

    /// Quote liquidating `amount` raw units of `mint` with sell defaults
    pub async fn quote_sell(&self, mint: &str, amount: u64) -> Result<Quote> {
        let req = self.sell_quote_request(mint, amount);
        self.quote_for(&req, Side::Sell).await
    }

    fn sell_quote_request(&self, mint: &str, amount: u64) -> QuoteRequest {
        QuoteRequest {
            input_mint: mint.to_string(),
            output_mint: WSOL_MINT.to_string(),
            amount,
            slippage_bps: self.config.slippage_bps,
            restrict_intermediate: self.config.sell_restrict_intermediate,
            platform_fee_bps: None,
            as_legacy: false,
        }
    }

    fn relaxed_slippage(&self) -> u16 {
        (self.config.slippage_bps as u32 * 2).min(self.config.max_slippage_bps as u32) as u16
    }

    // === Sell ===

    /// Sell `req.amount` of a mint. The caller must hold the mint's lock.
    pub async fn sell(&self, guard: &MintGuard, req: &SellRequest) -> Result<SwapResult> {
        Self::validate_mint(&req.mint)?;
        let signer = self.signer()?;
        if guard.mint() != req.mint {
            return Err(Error::Internal(format!(
                "lock held for {} but selling {}",
                guard.mint(),
                req.mint
            )));
        }
        if req.amount == 0 {
            return Err(Error::BelowMinNotional {
                value_sol: 0.0,
                min_sol: self.config.min_chunk_sol,
            });
        }

        let base = self.sell_quote_request(&req.mint, req.amount);
        let mut last = self
            .sell_with(&base, req.cost_basis, signer.as_ref())
            .await;
        if last.ok {
            return Ok(self.finish_sell(&req.mint, last, signer.as_ref()).await);
        }

        let relaxed = QuoteRequest {
            slippage_bps: self.relaxed_slippage(),
            restrict_intermediate: false,
            ..base
        };
        if matches!(last.code, Some(k) if k == ErrorKind::Slippage || k.is_unroutable()) {
            info!(
                mint = %req.mint,
                slippage_bps = relaxed.slippage_bps,
                "relaxing slippage and routing"
            );
            last = self
                .sell_with(&relaxed, req.cost_basis, signer.as_ref())
                .await;
            last.relaxed = true;
            if last.ok {
                return Ok(self.finish_sell(&req.mint, last, signer.as_ref()).await);
            }
        }

        if req.allow_split && last.code.is_some_and(|k| k.is_unroutable()) {
            if let Some(result) = self.split_sell(&relaxed, signer.as_ref()).await {
                return Ok(self.finish_sell(&req.mint, result, signer.as_ref()).await);
            }
        }

        let kind = last.code.unwrap_or(ErrorKind::SendFail);
        if kind.policy().cools_router {
            self.registry.set_router_cooldown(
                &req.mint,
                chrono::Utc::now().timestamp_millis() + self.router_cooldown_ms,
            );
        }
        warn!(mint = %req.mint, %kind, "sell failed: {}", last.msg);
        if kind == ErrorKind::NoRoute {
            return Err(Error::NoRoute);
        }
        Ok(last)
    }

    /// One quote + submit pass at fixed slippage/routing settings
    async fn sell_with(
        &self,
        base: &QuoteRequest,
        cost_basis: Option<u64>,
        signer: &dyn TradeSigner,
    ) -> SwapResult {
        let quote = match self.quote_for(base, Side::Sell).await {
            Ok(q) => q,
            Err(e) => return SwapResult::failed(e.kind(), e.to_string()),
        };

        let (quote, fee_account) = self.apply_fee(base, quote, cost_basis).await;
        let mut result = self.submit(&quote, fee_account, signer).await;
        result.sold_fraction = if result.ok { 1.0 } else { 0.0 };
        result
    }

    /// Swap the fee-bearing quote in when the fee plan allows it
    async fn apply_fee(
        &self,
        base: &QuoteRequest,
        no_fee: Quote,
        cost_basis: Option<u64>,
    ) -> (Quote, Option<String>) {
        let fee_config = &self.config.platform_fee;
        let Some(plan) = plan_fee(fee_config, no_fee.out_amount, cost_basis) else {
            return (no_fee, None);
        };
        let fee_req = QuoteRequest {
            platform_fee_bps: Some(plan.fee_bps),
            ..base.clone()
        };
        match self.quote(&fee_req).await {
            Ok(fee_quote)
                if fee_quote_acceptable(
                    fee_quote.out_amount,
                    no_fee.out_amount,
                    &plan,
                    FEE_SLACK_BPS,
                ) =>
            {
                debug!(
                    mint = %base.input_mint,
                    fee_bps = plan.fee_bps,
                    expected_fee = plan.expected_fee,
                    "platform fee attached"
                );
                (fee_quote, Some(fee_config.fee_account.clone()))
            }
            Ok(fee_quote) => {
                debug!(
                    mint = %base.input_mint,
                    fee_out = fee_quote.out_amount,
                    no_fee_out = no_fee.out_amount,
                    "fee quote worse for trader, using no-fee quote"
                );
                (no_fee, None)
            }
            Err(e) => {
                debug!(mint = %base.input_mint, "fee quote failed: {}", e);
                (no_fee, None)
            }
        }
    }

    /// Try descending fractions; the first chunk that quotes above the
    /// minimum chunk value and lands wins
    async fn split_sell(&self, base: &QuoteRequest, signer: &dyn TradeSigner) -> Option<SwapResult> {
        let mut fractions = self.config.split_fractions.clone();
        fractions.sort_by(|a, b| b.partial_cmp(a).unwrap_or(CmpOrdering::Equal));
        let min_chunk = sol_to_lamports(self.config.min_chunk_sol);

        for fraction in fractions {
            let amount = (base.amount as f64 * fraction).floor() as u64;
            if amount == 0 || amount >= base.amount {
                continue;
            }
            let req = QuoteRequest {
                amount,
                ..base.clone()
            };
            let quote = match self.quote_for(&req, Side::Sell).await {
                Ok(q) => q,
                Err(e) => {
                    debug!(mint = %base.input_mint, fraction, "split quote failed: {}", e);
                    continue;
                }
            };
            if quote.out_amount < min_chunk {
                debug!(
                    mint = %base.input_mint,
                    fraction,
                    out = quote.out_amount,
                    "split chunk below minimum, stopping"
                );
                break;
            }
            let mut result = self.submit(&quote, None, signer).await;
            if result.ok {
                info!(mint = %base.input_mint, fraction, "split sell landed");
                result.sold_fraction = fraction;
                result.relaxed = true;
                return Some(result);
            }
            debug!(mint = %base.input_mint, fraction, code = ?result.code, "split chunk failed");
        }
        None
    }

    async fn finish_sell(&self, mint: &str, result: SwapResult, signer: &dyn TradeSigner) -> SwapResult {
        info!(
            mint,
            sig = result.sig.as_deref().unwrap_or(""),
            tier = ?result.tier,
            out = result.out_amount,
            fraction = result.sold_fraction,
            "sell confirmed"
        );
        if let Err(e) = self.close_empty_accounts(mint, signer).await {
            debug!(mint, "token account cleanup skipped: {}", e);
        }
        result
    }

    // === Buy ===

    /// Buy `req.lamports` worth of a mint
    pub async fn buy(&self, req: &BuyRequest) -> Result<SwapResult> {
        Self::validate_mint(&req.mint)?;
        let signer = self.signer()?;
        let owner = signer.address();

        let balance = self
            .state
            .call(CallClass::Rpc, || self.rpc.sol_balance(&owner))
            .await?;
        if balance < req.lamports.saturating_add(BUY_FEE_RESERVE_LAMPORTS) {
            return Ok(SwapResult::failed(
                ErrorKind::InsufficientLamports,
                format!("balance {} lamports, need {}", balance, req.lamports),
            ));
        }

        let quote_req = QuoteRequest {
            input_mint: WSOL_MINT.to_string(),
            output_mint: req.mint.clone(),
            amount: req.lamports,
            slippage_bps: self.config.slippage_bps,
            restrict_intermediate: self.config.buy_restrict_intermediate,
            platform_fee_bps: None,
            as_legacy: false,
        };
        let quote = match self.quote_for(&quote_req, Side::Buy).await {
            Ok(q) => q,
            Err(e) if e.kind() == ErrorKind::NoRoute => return Err(Error::NoRoute),
            Err(e) => return Ok(SwapResult::failed(e.kind(), e.to_string())),
        };

        let mut result = self.submit(&quote, None, signer.as_ref()).await;
        if result.ok {
            result.sold_fraction = 1.0;
            info!(mint = %req.mint, sig = result.sig.as_deref().unwrap_or(""), "buy confirmed");
        }
        if let Err(e) = self.close_wrapped_sol(signer.as_ref()).await {
            debug!("wSOL cleanup skipped: {}", e);
        }
        Ok(result)
    }

    // === Submission tiers ===

    /// Walk the tier ladder for one quote
    async fn submit(&self, quote: &Quote, fee_account: Option<String>, signer: &dyn TradeSigner) -> SwapResult {
        let mut tier = SwapTier::Assembled;
        let mut tried: Vec<SwapTier> = Vec::new();
        let mut retried = false;

        loop {
            tried.push(tier);
            match self.try_tier(tier, quote, fee_account.clone(), signer).await {
                Ok(sig) => {
                    return SwapResult {
                        ok: true,
                        sig: Some(sig.to_string()),
                        code: None,
                        msg: String::new(),
                        in_amount: quote.in_amount,
                        out_amount: quote.out_amount,
                        sold_fraction: 1.0,
                        tier: Some(tier),
                        relaxed: false,
                    };
                }
                Err((kind, msg)) => {
                    debug!(?tier, %kind, "swap tier failed: {}", msg);
                    let retry_same = kind.policy().escalation == Escalation::RetrySameTier && !retried;
                    let next = if retry_same {
                        retried = true;
                        Some(tier)
                    } else {
                        retried = false;
                        self.next_tier(tier, kind, &tried)
                    };
                    match next {
                        Some(next) => {
                            if next != tier {
                                info!(from = ?tier, to = ?next, %kind, "escalating swap tier");
                            }
                            tier = next;
                        }
                        None => {
                            let mut result = SwapResult::failed(kind, msg);
                            result.tier = Some(tier);
                            result.in_amount = quote.in_amount;
                            result.out_amount = quote.out_amount;
                            return result;
                        }
                    }
                }
            }
        }
    }

    fn tier_allowed(&self, tier: SwapTier) -> bool {
        !tier.shared() || self.shared_accounts_supported()
    }

    /// Next untried tier after a failure of `kind` at `current`
    fn next_tier(&self, current: SwapTier, kind: ErrorKind, tried: &[SwapTier]) -> Option<SwapTier> {
        let target = match kind.policy().escalation {
            Escalation::Surface | Escalation::WidenSlippage | Escalation::SplitSell => return None,
            Escalation::RetrySameTier => ladder_after(current)?,
            Escalation::SharedAccounts => {
                if current.shared() {
                    warn!("shared accounts unsupported, disabling");
                    self.shared_supported.store(false, Ordering::Relaxed);
                    ladder_after(current)?
                } else {
                    match current {
                        SwapTier::Assembled => SwapTier::AssembledShared,
                        SwapTier::Manual => SwapTier::ManualShared,
                        other => ladder_after(other)?,
                    }
                }
            }
            Escalation::Legacy => SwapTier::Legacy,
            Escalation::ManualBuild => SwapTier::Manual,
        };
        let start = LADDER.iter().position(|t| *t == target)?;
        LADDER[start..]
            .iter()
            .copied()
            .find(|t| !tried.contains(t) && self.tier_allowed(*t))
    }

    async fn try_tier(
        &self,
        tier: SwapTier,
        quote: &Quote,
        fee_account: Option<String>,
        signer: &dyn TradeSigner,
    ) -> std::result::Result<Signature, TierFailure> {
        let request = SwapRequest {
            user_public_key: signer.address().to_string(),
            quote_response: quote.raw.clone(),
            wrap_and_unwrap_sol: true,
            use_shared_accounts: tier.shared(),
            as_legacy_transaction: tier == SwapTier::Legacy,
            dynamic_compute_unit_limit: true,
            fee_account,
            prioritization_fee_lamports: Some(self.config.priority_fee_lamports),
        };

        let built = match tier {
            SwapTier::Assembled | SwapTier::AssembledShared | SwapTier::Legacy => {
                self.build_assembled(&request, signer).await
            }
            SwapTier::Manual | SwapTier::ManualShared => self.build_manual(&request, signer).await,
        };
        let tx = built.map_err(|e| (e.kind(), e.to_string()))?;
        self.send_and_confirm(&tx).await
    }

    async fn build_assembled(&self, request: &SwapRequest, signer: &dyn TradeSigner) -> Result<VersionedTransaction> {
        let response = self
            .state
            .call(CallClass::Aggregator, || self.router.swap(request))
            .await?;
        let tx = tx::sign_transaction(tx::decode_transaction(&response.swap_transaction)?, signer)?;
        tx::ensure_fits(&tx)?;
        Ok(tx)
    }

    async fn build_manual(&self, request: &SwapRequest, signer: &dyn TradeSigner) -> Result<VersionedTransaction> {
        let raw = self
            .state
            .call(CallClass::Aggregator, || self.router.swap_instructions(request))
            .await?;
        let instructions = raw
            .ordered()
            .into_iter()
            .map(tx::to_instruction)
            .collect::<Result<Vec<_>>>()?;

        let mut tables = Vec::with_capacity(raw.address_lookup_table_addresses.len());
        for address in &raw.address_lookup_table_addresses {
            let key = tx::parse_pubkey(address)?;
            let data = self
                .state
                .call(CallClass::Rpc, || self.rpc.account_data(&key))
                .await?
                .ok_or_else(|| Error::TransactionBuild(format!("lookup table {} not found", key)))?;
            tables.push(tx::parse_lookup_table(key, &data)?);
        }

        let blockhash = self
            .state
            .call(CallClass::Rpc, || self.rpc.latest_blockhash())
            .await?;
        let unsigned = tx::compile_v0(&signer.address(), &instructions, &tables, blockhash)?;
        let tx = tx::sign_transaction(unsigned, signer)?;
        tx::ensure_fits(&tx)?;
        Ok(tx)
    }

    async fn send_and_confirm(&self, tx: &VersionedTransaction) -> std::result::Result<Signature, TierFailure> {
        let sig = self
            .state
            .call_once(CallClass::Rpc, self.rpc.send_transaction(tx))
            .await
            .map_err(|e| (e.kind(), e.to_string()))?;
        debug!(%sig, "transaction sent");

        match await_confirmation(self.rpc.as_ref(), &self.state, &sig, self.confirm_spec).await {
            Confirmation::Landed => Ok(sig),
            Confirmation::Failed(err) => {
                Err(classify_failure(self.rpc.as_ref(), &self.state, tx, Some(&err)).await)
            }
            Confirmation::Unconfirmed => {
                resolve_unconfirmed(self.rpc.as_ref(), &self.state, &sig, tx)
                    .await
                    .map(|_| sig)
            }
        }
    }

    // === Cleanup ===

    /// Close the owner's now-empty token accounts for `mint` to reclaim rent
    async fn close_empty_accounts(&self, mint: &str, signer: &dyn TradeSigner) -> Result<()> {
        let owner = signer.address();
        let mint_key = Self::validate_mint(mint)?;
        let accounts = self
            .state
            .call(CallClass::Rpc, || self.rpc.token_accounts(&owner, &mint_key))
            .await?;
        let instructions: Vec<_> = accounts
            .iter()
            .filter(|a| a.amount == 0)
            .map(|a| tx::close_account_ix(&a.program_id, &a.address, &owner, &owner))
            .collect();
        if instructions.is_empty() {
            return Ok(());
        }
        let count = instructions.len();
        self.send_cleanup(&instructions, signer).await?;
        debug!(mint, count, "closed empty token accounts");
        Ok(())
    }

    /// Close the owner's wrapped-SOL account, unwrapping any balance
    async fn close_wrapped_sol(&self, signer: &dyn TradeSigner) -> Result<()> {
        let owner = signer.address();
        let wsol = Pubkey::from_str(WSOL_MINT).map_err(|e| Error::Internal(e.to_string()))?;
        let ata = spl_associated_token_account::get_associated_token_address(&owner, &wsol);
        let accounts = self
            .state
            .call(CallClass::Rpc, || self.rpc.token_accounts(&owner, &wsol))
            .await?;
        let Some(account) = accounts.iter().find(|a| a.address == ata) else {
            return Ok(());
        };
        let ix = tx::close_account_ix(&account.program_id, &account.address, &owner, &owner);
        self.send_cleanup(&[ix], signer).await?;
        debug!("closed wSOL account");
        Ok(())
    }

    async fn send_cleanup(&self, instructions: &[solana_sdk::instruction::Instruction], signer: &dyn TradeSigner) -> Result<()> {
        let blockhash = self
            .state
            .call(CallClass::Rpc, || self.rpc.latest_blockhash())
            .await?;
        let unsigned = tx::compile_v0(&signer.address(), instructions, &[], blockhash)?;
        let tx = tx::sign_transaction(unsigned, signer)?;
        self.state
            .call_once(CallClass::Rpc, self.rpc.send_transaction(&tx))
            .await?;
        Ok(())
    }
}

fn ladder_after(tier: SwapTier) -> Option<SwapTier> {
    let index = LADDER.iter().position(|t| *t == tier)?;
    LADDER.get(index + 1).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{self, MockRouter, MockRpc};
    use solana_sdk::signature::Keypair;

    struct Rig {
        client: ExchangeClient,
        router: Arc<MockRouter>,
        rpc: Arc<MockRpc>,
        registry: Arc<RiskRegistry>,
    }

    fn rig(config: RouterConfig) -> Rig {
        let router = Arc::new(MockRouter::new());
        let rpc = Arc::new(MockRpc::new());
        let registry = Arc::new(RiskRegistry::new());
        let keypair = Arc::new(Keypair::new());
        let client = ExchangeClient::new(
            router.clone(),
            rpc.clone(),
            Some(keypair),
            Arc::new(ResilienceState::new(&testkit::fast_resilience())),
            registry.clone(),
            config,
            &testkit::fast_resilience(),
            60_000,
        );
        Rig {
            client,
            router,
            rpc,
            registry,
        }
    }

    fn mint() -> String {
        Pubkey::new_unique().to_string()
    }

    #[tokio::test]
    async fn test_sell_lands_on_first_tier() {
        let rig = rig(RouterConfig::default());
        let mint = mint();
        rig.router.set_price(&mint, 80.0);
        let guard = rig.registry.lock_mint(&mint).await;

        let result = rig
            .client
            .sell(
                &guard,
                &SellRequest {
                    mint: mint.clone(),
                    amount: 1_000_000,
                    cost_basis: None,
                    allow_split: true,
                },
            )
            .await
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.tier, Some(SwapTier::Assembled));
        assert_eq!(result.sold_fraction, 1.0);
        assert_eq!(result.out_amount, 80_000_000);
        assert_eq!(rig.rpc.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_shared_accounts_escalation_and_disable() {
        let rig = rig(RouterConfig::default());
        let mint = mint();
        rig.router.set_price(&mint, 80.0);
        rig.router.fail_swap(false, false, "Simple AMMs are not supported with shared accounts");
        rig.router.fail_swap(true, false, "shared accounts not supported");
        let guard = rig.registry.lock_mint(&mint).await;

        let result = rig
            .client
            .sell(
                &guard,
                &SellRequest {
                    mint: mint.clone(),
                    amount: 1_000,
                    cost_basis: None,
                    allow_split: false,
                },
            )
            .await
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.tier, Some(SwapTier::Legacy));
        assert!(!rig.client.shared_accounts_supported());
    }

    #[tokio::test]
    async fn test_manual_build_after_send_failures() {
        let rig = rig(RouterConfig::default());
        let mint = mint();
        rig.router.set_price(&mint, 80.0);
        rig.router.fail_all_assembled("transaction too large: 1300 > 1232");
        let guard = rig.registry.lock_mint(&mint).await;

        let result = rig
            .client
            .sell(
                &guard,
                &SellRequest {
                    mint: mint.clone(),
                    amount: 1_000,
                    cost_basis: None,
                    allow_split: false,
                },
            )
            .await
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.tier, Some(SwapTier::Manual));
    }

    #[tokio::test]
    async fn test_split_sell_takes_largest_routable_fraction() {
        let rig = rig(RouterConfig::default());
        let mint = mint();
        rig.router.set_price(&mint, 80.0);
        // Only amounts up to 60% of the position route
        rig.router.set_max_routable(&mint, 600_000);
        let guard = rig.registry.lock_mint(&mint).await;

        let result = rig
            .client
            .sell(
                &guard,
                &SellRequest {
                    mint: mint.clone(),
                    amount: 1_000_000,
                    cost_basis: None,
                    allow_split: true,
                },
            )
            .await
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.sold_fraction, 0.5);
        assert_eq!(result.in_amount, 500_000);
        assert!(result.relaxed);
    }

    #[tokio::test]
    async fn test_unroutable_sets_cooldown_and_returns_sentinel() {
        let rig = rig(RouterConfig::default());
        let mint = mint();
        rig.router.set_price(&mint, 80.0);
        rig.router.set_max_routable(&mint, 0);
        let guard = rig.registry.lock_mint(&mint).await;

        let result = rig
            .client
            .sell(
                &guard,
                &SellRequest {
                    mint: mint.clone(),
                    amount: 1_000_000,
                    cost_basis: None,
                    allow_split: true,
                },
            )
            .await;

        assert!(matches!(result, Err(Error::NoRoute)));
        assert!(rig
            .registry
            .is_cooling(&mint, chrono::Utc::now().timestamp_millis()));
        assert_eq!(rig.rpc.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_slippage_failure_widens_once() {
        let rig = rig(RouterConfig::default());
        let mint = mint();
        rig.router.set_price(&mint, 80.0);
        rig.rpc.fail_next_confirmations(1, "custom program error: 0x1771");
        let guard = rig.registry.lock_mint(&mint).await;

        let result = rig
            .client
            .sell(
                &guard,
                &SellRequest {
                    mint: mint.clone(),
                    amount: 1_000,
                    cost_basis: None,
                    allow_split: false,
                },
            )
            .await
            .unwrap();

        assert!(result.ok);
        assert!(result.relaxed);
        let last = rig.router.last_quote().unwrap();
        assert_eq!(last.slippage_bps, 600);
        assert!(!last.restrict_intermediate);
    }

    #[tokio::test]
    async fn test_sentinels_checked_first() {
        let rig = rig(RouterConfig::default());
        let guard = rig.registry.lock_mint("not-a-mint").await;
        let result = rig
            .client
            .sell(
                &guard,
                &SellRequest {
                    mint: "not-a-mint".into(),
                    amount: 1,
                    cost_basis: None,
                    allow_split: false,
                },
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidMint(_))));
        assert_eq!(rig.router.quote_count(), 0);
    }

    #[tokio::test]
    async fn test_buy_checks_balance_then_swaps() {
        let rig = rig(RouterConfig::default());
        let mint = mint();
        rig.router.set_price(&mint, 80.0);

        rig.rpc.set_sol_balance(1_000);
        let poor = rig
            .client
            .buy(&BuyRequest {
                mint: mint.clone(),
                lamports: 100_000_000,
            })
            .await
            .unwrap();
        assert_eq!(poor.code, Some(ErrorKind::InsufficientLamports));

        rig.rpc.set_sol_balance(1_000_000_000);
        let bought = rig
            .client
            .buy(&BuyRequest {
                mint: mint.clone(),
                lamports: 100_000_000,
            })
            .await
            .unwrap();
        assert!(bought.ok);
    }
}
