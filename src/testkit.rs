//! In-memory router and chain doubles for tests

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use solana_sdk::hash::Hash;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::config::{ResilienceConfig, RouterConfig};
use crate::error::{Error, Result};
use crate::exchange::client::ExchangeClient;
use crate::exchange::router::RouterApi;
use crate::exchange::rpc::{ChainRpc, SignatureState, Simulation, TokenAccount};
use crate::exchange::tx;
use crate::exchange::types::{
    Quote, QuoteRequest, RouterAccountMeta, RouterInstruction, SwapInstructions, SwapRequest,
    SwapResponse, WSOL_MINT,
};
use crate::resilience::{ResilienceState, RiskRegistry};

/// Resilience settings with no pacing and millisecond waits
pub fn fast_resilience() -> ResilienceConfig {
    ResilienceConfig {
        quote_gap_ms: 0,
        aggregator_gap_ms: 0,
        rpc_gap_ms: 0,
        stress_window_ms: 0,
        backoff_initial_ms: 1,
        backoff_max_ms: 4,
        backoff_max_elapsed_ms: 200,
        confirm_interval_ms: 1,
        confirm_timeout_ms: 50,
        balance_wait_interval_ms: 1,
        debit_wait_timeout_ms: 30,
        credit_wait_timeout_ms: 30,
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn mint() -> String {
    Pubkey::new_unique().to_string()
}

fn no_route() -> Error {
    Error::RouterHttp {
        status: 400,
        message: "Could not find any route".into(),
    }
}

// === Router ===

#[derive(Default)]
struct RouterState {
    /// mint -> lamports per raw token unit
    prices: HashMap<String, f64>,
    max_routable: HashMap<String, u64>,
    quote_failures: HashMap<String, String>,
    /// (shared, legacy, message)
    swap_failures: Vec<(bool, bool, String)>,
    assembled_failure: Option<String>,
    quotes: Vec<QuoteRequest>,
}

/// Router double pricing every mint at a fixed rate
#[derive(Default)]
pub struct MockRouter {
    state: Mutex<RouterState>,
}

impl MockRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price in lamports per raw token unit
    pub fn set_price(&self, mint: &str, lamports_per_raw: f64) {
        self.state
            .lock()
            .unwrap()
            .prices
            .insert(mint.to_string(), lamports_per_raw);
    }

    /// Price in SOL per whole token
    pub fn set_px_sol(&self, mint: &str, px_sol: f64, decimals: u8) {
        self.set_price(mint, px_sol * 1e9 / 10f64.powi(decimals as i32));
    }

    /// Sell amounts above `raw` find no route
    pub fn set_max_routable(&self, mint: &str, raw: u64) {
        self.state
            .lock()
            .unwrap()
            .max_routable
            .insert(mint.to_string(), raw);
    }

    pub fn fail_quotes(&self, mint: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .quote_failures
            .insert(mint.to_string(), message.to_string());
    }

    pub fn restore_quotes(&self, mint: &str) {
        self.state.lock().unwrap().quote_failures.remove(mint);
    }

    /// Fail assembly for one shared/legacy combination
    pub fn fail_swap(&self, shared: bool, legacy: bool, message: &str) {
        self.state
            .lock()
            .unwrap()
            .swap_failures
            .push((shared, legacy, message.to_string()));
    }

    /// Fail every router-assembled transaction
    pub fn fail_all_assembled(&self, message: &str) {
        self.state.lock().unwrap().assembled_failure = Some(message.to_string());
    }

    pub fn last_quote(&self) -> Option<QuoteRequest> {
        self.state.lock().unwrap().quotes.last().cloned()
    }

    pub fn quote_count(&self) -> usize {
        self.state.lock().unwrap().quotes.len()
    }
}

#[async_trait]
impl RouterApi for MockRouter {
    async fn quote(&self, req: &QuoteRequest) -> Result<Quote> {
        let mut state = self.state.lock().unwrap();
        state.quotes.push(req.clone());

        let buying = req.input_mint == WSOL_MINT;
        let mint = if buying { &req.output_mint } else { &req.input_mint };
        if let Some(message) = state.quote_failures.get(mint) {
            return Err(Error::RouterHttp {
                status: 400,
                message: message.clone(),
            });
        }
        if !buying {
            if let Some(max) = state.max_routable.get(mint) {
                if req.amount > *max {
                    return Err(no_route());
                }
            }
        }
        let price = *state.prices.get(mint).ok_or_else(no_route)?;
        let mut out = if buying {
            (req.amount as f64 / price).floor() as u64
        } else {
            (req.amount as f64 * price).floor() as u64
        };
        if let Some(bps) = req.platform_fee_bps {
            out -= out * bps as u64 / 10_000;
        }

        Quote::from_value(json!({
            "inputMint": req.input_mint,
            "outputMint": req.output_mint,
            "inAmount": req.amount.to_string(),
            "outAmount": out.to_string(),
            "slippageBps": req.slippage_bps,
            "priceImpactPct": "0",
            "routePlan": [{ "percent": 100 }],
        }))
    }

    async fn swap(&self, req: &SwapRequest) -> Result<SwapResponse> {
        {
            let state = self.state.lock().unwrap();
            if let Some(message) = &state.assembled_failure {
                return Err(Error::Router(message.clone()));
            }
            if let Some((_, _, message)) = state.swap_failures.iter().find(|(shared, legacy, _)| {
                *shared == req.use_shared_accounts && *legacy == req.as_legacy_transaction
            }) {
                return Err(Error::Router(message.clone()));
            }
        }
        let user = tx::parse_pubkey(&req.user_public_key)?;
        let unsigned = tx::compile_v0(&user, &[], &[], Hash::new_unique())?;
        Ok(SwapResponse {
            swap_transaction: STANDARD.encode(bincode::serialize(&unsigned)?),
            last_valid_block_height: Some(0),
            simulation_error: None,
        })
    }

    async fn swap_instructions(&self, req: &SwapRequest) -> Result<SwapInstructions> {
        Ok(SwapInstructions {
            token_ledger_instruction: None,
            compute_budget_instructions: vec![],
            setup_instructions: vec![],
            swap_instruction: RouterInstruction {
                program_id: Pubkey::new_unique().to_string(),
                accounts: vec![RouterAccountMeta {
                    pubkey: req.user_public_key.clone(),
                    is_signer: true,
                    is_writable: true,
                }],
                data: STANDARD.encode([1u8, 2, 3]),
            },
            cleanup_instruction: None,
            other_instructions: vec![],
            address_lookup_table_addresses: vec![],
        })
    }
}

// === Chain ===

struct RpcState {
    sol_balance: u64,
    accounts: HashMap<Pubkey, TokenAccount>,
    after_send: Vec<(Pubkey, u64)>,
    mints: HashMap<Pubkey, Vec<u8>>,
    signatures: HashMap<Signature, SignatureState>,
    failing_confirmations: Vec<String>,
    simulation: Option<Simulation>,
    token_reads_fail: bool,
    sent: usize,
}

/// Single-owner chain double
pub struct MockRpc {
    state: Mutex<RpcState>,
}

impl Default for MockRpc {
    fn default() -> Self {
        Self::new()
    }
}

fn key(mint: &str) -> Pubkey {
    Pubkey::from_str(mint).expect("test mint must be a pubkey")
}

impl MockRpc {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RpcState {
                sol_balance: 10_000_000_000,
                accounts: HashMap::new(),
                after_send: Vec::new(),
                mints: HashMap::new(),
                signatures: HashMap::new(),
                failing_confirmations: Vec::new(),
                simulation: Some(Simulation {
                    err: None,
                    logs: vec![],
                }),
                token_reads_fail: false,
                sent: 0,
            }),
        }
    }

    pub fn set_sol_balance(&self, lamports: u64) {
        self.state.lock().unwrap().sol_balance = lamports;
    }

    pub fn set_token_balance(&self, mint: &str, raw: u64, decimals: u8) {
        let mut state = self.state.lock().unwrap();
        let account = state.accounts.entry(key(mint)).or_insert_with(|| TokenAccount {
            address: Pubkey::new_unique(),
            program_id: spl_token::ID,
            amount: 0,
            decimals,
        });
        account.amount = raw;
        account.decimals = decimals;
    }

    /// Balance the mint settles at once the next transaction is sent
    pub fn set_balance_after_send(&self, mint: &str, raw: u64) {
        self.state.lock().unwrap().after_send.push((key(mint), raw));
    }

    /// Serve an initialized mint account with `decimals`
    pub fn set_mint_decimals(&self, mint: &str, decimals: u8) {
        let state = spl_token::state::Mint {
            decimals,
            is_initialized: true,
            ..Default::default()
        };
        let mut data = vec![0u8; spl_token::state::Mint::LEN];
        spl_token::state::Mint::pack(state, &mut data).expect("mint pack");
        self.state.lock().unwrap().mints.insert(key(mint), data);
    }

    pub fn fail_token_reads(&self, fail: bool) {
        self.state.lock().unwrap().token_reads_fail = fail;
    }

    pub fn set_signature_state(&self, sig: Signature, status: SignatureState) {
        self.state.lock().unwrap().signatures.insert(sig, status);
    }

    pub fn set_simulation(&self, simulation: Option<Simulation>) {
        self.state.lock().unwrap().simulation = simulation;
    }

    /// The next `n` sent transactions fail on-chain with `message`
    pub fn fail_next_confirmations(&self, n: usize, message: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .failing_confirmations
            .extend(std::iter::repeat(message.to_string()).take(n));
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn sol_balance(&self, _owner: &Pubkey) -> Result<u64> {
        Ok(self.state.lock().unwrap().sol_balance)
    }

    async fn token_accounts(&self, _owner: &Pubkey, mint: &Pubkey) -> Result<Vec<TokenAccount>> {
        let state = self.state.lock().unwrap();
        if state.token_reads_fail {
            return Err(Error::Rpc("connection reset by peer".into()));
        }
        Ok(state.accounts.get(mint).cloned().into_iter().collect())
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().unwrap().mints.get(address).cloned())
    }

    async fn latest_blockhash(&self) -> Result<Hash> {
        Ok(Hash::new_unique())
    }

    async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<Signature> {
        let mut state = self.state.lock().unwrap();
        state.sent += 1;
        let sig = tx.signatures.first().copied().unwrap_or_default();

        let status = if state.failing_confirmations.is_empty() {
            for (mint, raw) in std::mem::take(&mut state.after_send) {
                if let Some(account) = state.accounts.get_mut(&mint) {
                    account.amount = raw;
                }
            }
            SignatureState {
                err: None,
                reached: true,
            }
        } else {
            SignatureState {
                err: Some(state.failing_confirmations.remove(0)),
                reached: true,
            }
        };
        state.signatures.insert(sig, status);
        Ok(sig)
    }

    async fn signature_state(&self, sig: &Signature) -> Result<Option<SignatureState>> {
        Ok(self.state.lock().unwrap().signatures.get(sig).cloned())
    }

    async fn simulate(&self, _tx: &VersionedTransaction) -> Result<Option<Simulation>> {
        Ok(self.state.lock().unwrap().simulation.clone())
    }
}

// === Wiring ===

/// Exchange client wired to the doubles
pub struct Harness {
    pub router: Arc<MockRouter>,
    pub rpc: Arc<MockRpc>,
    pub state: Arc<ResilienceState>,
    pub registry: Arc<RiskRegistry>,
    pub exchange: Arc<ExchangeClient>,
    pub owner: Pubkey,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Some(Arc::new(Keypair::new())))
    }

    /// No signer configured
    pub fn unsigned() -> Self {
        Self::build(None)
    }

    fn build(keypair: Option<Arc<Keypair>>) -> Self {
        let router = Arc::new(MockRouter::new());
        let rpc = Arc::new(MockRpc::new());
        let state = Arc::new(ResilienceState::new(&fast_resilience()));
        let registry = Arc::new(RiskRegistry::new());
        let owner = keypair
            .as_ref()
            .map(|k| k.pubkey())
            .unwrap_or_else(Pubkey::new_unique);
        let exchange = Arc::new(ExchangeClient::new(
            router.clone(),
            rpc.clone(),
            keypair.map(|k| k as Arc<dyn crate::exchange::TradeSigner>),
            state.clone(),
            registry.clone(),
            RouterConfig::default(),
            &fast_resilience(),
            60_000,
        ));
        Self {
            router,
            rpc,
            state,
            registry,
            exchange,
            owner,
        }
    }
}
