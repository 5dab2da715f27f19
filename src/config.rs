//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub exit: ExitConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_commitment")]
    pub commitment: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Set false for endpoints that reject simulateTransaction
    #[serde(default = "default_true")]
    pub simulation_enabled: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            commitment: default_commitment(),
            timeout_ms: default_timeout_ms(),
            simulation_enabled: true,
        }
    }
}

/// Aggregator router settings
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_router_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
    /// Ceiling used by the relaxed-slippage sell fallback
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u16,
    #[serde(default)]
    pub buy_restrict_intermediate: bool,
    #[serde(default = "default_true")]
    pub sell_restrict_intermediate: bool,
    /// Try shared program accounts when the unshared build is rejected
    #[serde(default = "default_true")]
    pub shared_accounts_enabled: bool,
    /// Fractions tried (largest first) when the full size is unroutable
    #[serde(default = "default_split_fractions")]
    pub split_fractions: Vec<f64>,
    /// A split chunk must quote at least this much SOL
    #[serde(default = "default_min_chunk_sol")]
    pub min_chunk_sol: f64,
    #[serde(default = "default_priority_fee")]
    pub priority_fee_lamports: u64,
    #[serde(default)]
    pub platform_fee: PlatformFeeConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            base_url: default_router_url(),
            api_key: String::new(),
            timeout_ms: default_timeout_ms(),
            slippage_bps: default_slippage_bps(),
            max_slippage_bps: default_max_slippage_bps(),
            buy_restrict_intermediate: false,
            sell_restrict_intermediate: true,
            shared_accounts_enabled: true,
            split_fractions: default_split_fractions(),
            min_chunk_sol: default_min_chunk_sol(),
            priority_fee_lamports: default_priority_fee(),
            platform_fee: PlatformFeeConfig::default(),
        }
    }
}

/// Sell-side platform fee, attached only when the trade stays profitable
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformFeeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_fee_bps")]
    pub fee_bps: u16,
    /// Token account that receives the fee (in the output mint)
    #[serde(default)]
    pub fee_account: String,
    /// Profit left after the fee must be at least this much
    #[serde(default = "default_fee_min_profit_sol")]
    pub min_profit_sol: f64,
    /// Fee may take at most this fraction of the profit
    #[serde(default = "default_fee_max_share")]
    pub max_profit_share: f64,
}

impl Default for PlatformFeeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fee_bps: default_fee_bps(),
            fee_account: String::new(),
            min_profit_sol: default_fee_min_profit_sol(),
            max_profit_share: default_fee_max_share(),
        }
    }
}

/// Pacing, backoff and wait bounds
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_quote_gap_ms")]
    pub quote_gap_ms: u64,
    #[serde(default = "default_aggregator_gap_ms")]
    pub aggregator_gap_ms: u64,
    #[serde(default = "default_rpc_gap_ms")]
    pub rpc_gap_ms: u64,
    #[serde(default = "default_stress_window_ms")]
    pub stress_window_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_max_elapsed_ms")]
    pub backoff_max_elapsed_ms: u64,
    #[serde(default = "default_confirm_interval_ms")]
    pub confirm_interval_ms: u64,
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
    #[serde(default = "default_balance_wait_interval_ms")]
    pub balance_wait_interval_ms: u64,
    #[serde(default = "default_debit_wait_timeout_ms")]
    pub debit_wait_timeout_ms: u64,
    #[serde(default = "default_credit_wait_timeout_ms")]
    pub credit_wait_timeout_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            quote_gap_ms: default_quote_gap_ms(),
            aggregator_gap_ms: default_aggregator_gap_ms(),
            rpc_gap_ms: default_rpc_gap_ms(),
            stress_window_ms: default_stress_window_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_max_elapsed_ms: default_backoff_max_elapsed_ms(),
            confirm_interval_ms: default_confirm_interval_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            balance_wait_interval_ms: default_balance_wait_interval_ms(),
            debit_wait_timeout_ms: default_debit_wait_timeout_ms(),
            credit_wait_timeout_ms: default_credit_wait_timeout_ms(),
        }
    }
}

/// How aggressively moderate rug signals are acted on
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskMode {
    Conservative,
    Normal,
    Degen,
}

impl Default for RiskMode {
    fn default() -> Self {
        Self::Normal
    }
}

/// Sell-decision pipeline thresholds (percent values are whole percents)
#[derive(Debug, Clone, Deserialize)]
pub struct ExitConfig {
    #[serde(default)]
    pub risk_mode: RiskMode,

    // === HOLD WINDOWS ===
    #[serde(default = "default_min_hold_ms")]
    pub min_hold_ms: i64,
    /// 0 disables max-hold expiry
    #[serde(default)]
    pub max_hold_ms: i64,
    /// Minimum gap between two sells of the same mint
    #[serde(default = "default_sell_cooldown_ms")]
    pub sell_cooldown_ms: i64,
    /// Evaluation is suppressed this long after a buy until size syncs
    #[serde(default = "default_pending_credit_grace_ms")]
    pub pending_credit_grace_ms: i64,
    /// Sells are held back this long after a buy unless a hard signal arrives
    #[serde(default)]
    pub sell_guard_ms: i64,
    /// Balance re-verification is reused for this long
    #[serde(default = "default_balance_recheck_ms")]
    pub balance_recheck_ms: i64,
    /// Router cooldown applied after failed or partial routes
    #[serde(default = "default_router_cooldown_ms")]
    pub router_cooldown_ms: i64,

    // === URGENT SIGNALS ===
    #[serde(default = "default_urgent_min_age_ms")]
    pub urgent_min_age_ms: i64,
    /// Severity at or above which an urgent signal is "hard"
    #[serde(default = "default_hard_severity")]
    pub hard_severity: f64,
    #[serde(default = "default_rug_pattern")]
    pub rug_pattern: String,

    // === QUOTE & EDGE ===
    #[serde(default = "default_quote_cache_ms")]
    pub quote_cache_ms: i64,
    /// A cached quote this old may still stand in when a fresh one fails
    #[serde(default = "default_quote_stale_ms")]
    pub quote_stale_ms: i64,
    #[serde(default = "default_shock_drop_pct")]
    pub shock_drop_pct: f64,
    #[serde(default = "default_shock_window_ms")]
    pub shock_window_ms: i64,
    #[serde(default = "default_true")]
    pub clamp_enabled: bool,
    #[serde(default = "default_clamp_drop_pct")]
    pub clamp_drop_pct: f64,
    #[serde(default = "default_clamp_window_ms")]
    pub clamp_window_ms: i64,
    /// Router fee assumed by the net estimator
    #[serde(default = "default_est_route_fee_bps")]
    pub est_route_fee_bps: u16,
    /// Slippage assumed by the net estimator
    #[serde(default = "default_est_slippage_bps")]
    pub est_slippage_bps: u16,
    /// Network + priority fee per sell
    #[serde(default = "default_est_tx_cost_sol")]
    pub est_tx_cost_sol: f64,

    // === FAST EXIT (built-in momentum check) ===
    #[serde(default = "default_true")]
    pub fast_exit_enabled: bool,
    /// Drop from the window high that triggers a fast exit
    #[serde(default = "default_fast_exit_drop_pct")]
    pub fast_exit_drop_pct: f64,
    #[serde(default = "default_fast_exit_window_ms")]
    pub fast_exit_window_ms: i64,

    // === DYNAMIC HARD STOP ===
    #[serde(default = "default_remorse_ms")]
    pub remorse_ms: i64,
    #[serde(default = "default_dyn_stop_base_pct")]
    pub dyn_stop_base_pct: f64,
    #[serde(default = "default_dyn_stop_min_pct")]
    pub dyn_stop_min_pct: f64,
    #[serde(default = "default_dyn_stop_max_pct")]
    pub dyn_stop_max_pct: f64,
    /// Points of stop tightening per point of peak profit
    #[serde(default = "default_dyn_stop_peak_weight")]
    pub dyn_stop_peak_weight: f64,
    /// Drawdown from the value high-water mark that collapses the stop to min
    #[serde(default = "default_dyn_stop_panic_drawdown_pct")]
    pub dyn_stop_panic_drawdown_pct: f64,
    /// Fraction of the stop removed at full gate intensity
    #[serde(default = "default_dyn_stop_gate_weight")]
    pub dyn_stop_gate_weight: f64,
    #[serde(default = "default_warming_grace_ms")]
    pub warming_grace_ms: i64,
    #[serde(default = "default_post_warming_grace_ms")]
    pub post_warming_grace_ms: i64,
    /// Newly opened positions start in the warming period
    #[serde(default = "default_true")]
    pub warm_new_positions: bool,

    // === PROFIT LOCK ===
    #[serde(default = "default_true")]
    pub profit_lock_enabled: bool,
    #[serde(default = "default_lock_arm_pct")]
    pub lock_arm_pct: f64,
    #[serde(default = "default_lock_retain_fraction")]
    pub lock_retain_fraction: f64,
    #[serde(default = "default_lock_breakeven_cushion_pct")]
    pub lock_breakeven_cushion_pct: f64,
    /// Partial sell fired when the lock arms; 0 disables
    #[serde(default = "default_lock_harvest_pct")]
    pub lock_harvest_pct: f64,

    // === FORCE FLAGS ===
    /// Degen mode ignores rug flags below this severity
    #[serde(default = "default_degen_rug_bypass_sev")]
    pub degen_rug_bypass_sev: f64,

    // === REBOUND GATE ===
    #[serde(default = "default_true")]
    pub rebound_enabled: bool,
    #[serde(default = "default_rebound_defer_ms")]
    pub rebound_defer_ms: i64,
    /// Total deferral allowed for one exit before it goes through anyway
    #[serde(default = "default_rebound_max_defer_ms")]
    pub rebound_max_defer_ms: i64,
    #[serde(default = "default_rebound_window_ms")]
    pub rebound_window_ms: i64,
    /// Bounce off the window low that counts as a recovery in progress
    #[serde(default = "default_rebound_bounce_pct")]
    pub rebound_bounce_pct: f64,

    // === FALLBACK RULES ===
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    /// Percent of the position sold on take-profit; 0 or 100 sells all
    #[serde(default)]
    pub partial_take_profit_pct: f64,
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: f64,
    #[serde(default = "default_min_profit_to_trail_pct")]
    pub min_profit_to_trail_pct: f64,
    #[serde(default = "default_min_notional_sol")]
    pub min_notional_sol: f64,
    /// Sell even below the minimum notional
    #[serde(default)]
    pub dust_exit_enabled: bool,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            risk_mode: RiskMode::Normal,
            min_hold_ms: default_min_hold_ms(),
            max_hold_ms: 0,
            sell_cooldown_ms: default_sell_cooldown_ms(),
            pending_credit_grace_ms: default_pending_credit_grace_ms(),
            sell_guard_ms: 0,
            balance_recheck_ms: default_balance_recheck_ms(),
            router_cooldown_ms: default_router_cooldown_ms(),
            urgent_min_age_ms: default_urgent_min_age_ms(),
            hard_severity: default_hard_severity(),
            rug_pattern: default_rug_pattern(),
            quote_cache_ms: default_quote_cache_ms(),
            quote_stale_ms: default_quote_stale_ms(),
            shock_drop_pct: default_shock_drop_pct(),
            shock_window_ms: default_shock_window_ms(),
            clamp_enabled: true,
            clamp_drop_pct: default_clamp_drop_pct(),
            clamp_window_ms: default_clamp_window_ms(),
            est_route_fee_bps: default_est_route_fee_bps(),
            est_slippage_bps: default_est_slippage_bps(),
            est_tx_cost_sol: default_est_tx_cost_sol(),
            fast_exit_enabled: true,
            fast_exit_drop_pct: default_fast_exit_drop_pct(),
            fast_exit_window_ms: default_fast_exit_window_ms(),
            remorse_ms: default_remorse_ms(),
            dyn_stop_base_pct: default_dyn_stop_base_pct(),
            dyn_stop_min_pct: default_dyn_stop_min_pct(),
            dyn_stop_max_pct: default_dyn_stop_max_pct(),
            dyn_stop_peak_weight: default_dyn_stop_peak_weight(),
            dyn_stop_panic_drawdown_pct: default_dyn_stop_panic_drawdown_pct(),
            dyn_stop_gate_weight: default_dyn_stop_gate_weight(),
            warming_grace_ms: default_warming_grace_ms(),
            post_warming_grace_ms: default_post_warming_grace_ms(),
            warm_new_positions: true,
            profit_lock_enabled: true,
            lock_arm_pct: default_lock_arm_pct(),
            lock_retain_fraction: default_lock_retain_fraction(),
            lock_breakeven_cushion_pct: default_lock_breakeven_cushion_pct(),
            lock_harvest_pct: default_lock_harvest_pct(),
            degen_rug_bypass_sev: default_degen_rug_bypass_sev(),
            rebound_enabled: true,
            rebound_defer_ms: default_rebound_defer_ms(),
            rebound_max_defer_ms: default_rebound_max_defer_ms(),
            rebound_window_ms: default_rebound_window_ms(),
            rebound_bounce_pct: default_rebound_bounce_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            partial_take_profit_pct: 0.0,
            trailing_stop_pct: default_trailing_stop_pct(),
            min_profit_to_trail_pct: default_min_profit_to_trail_pct(),
            min_notional_sol: default_min_notional_sol(),
            dust_exit_enabled: false,
        }
    }
}

/// Evaluation loop and persistence
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Environment variable holding the owner keypair path
    #[serde(default = "default_keypair_env")]
    pub keypair_env: String,
    #[serde(default = "default_positions_path")]
    pub positions_path: String,
    #[serde(default = "default_live_store_path")]
    pub live_store_path: String,
    #[serde(default = "default_dust_store_path")]
    pub dust_store_path: String,
    /// Balances seen this soon after a full close do not recreate the position
    #[serde(default = "default_resurrect_grace_ms")]
    pub resurrect_grace_ms: i64,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            keypair_env: default_keypair_env(),
            positions_path: default_positions_path(),
            live_store_path: default_live_store_path(),
            dust_store_path: default_dust_store_path(),
            resurrect_grace_ms: default_resurrect_grace_ms(),
            dry_run: false,
        }
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_commitment() -> String {
    "confirmed".into()
}

fn default_timeout_ms() -> u64 {
    15000
}

fn default_router_url() -> String {
    std::env::var("ROUTER_BASE_URL").unwrap_or_else(|_| "https://lite-api.jup.ag/swap/v1".into())
}

fn default_slippage_bps() -> u16 {
    300
}

fn default_max_slippage_bps() -> u16 {
    2500
}

fn default_split_fractions() -> Vec<f64> {
    vec![0.9, 0.75, 0.5, 0.33, 0.25]
}

fn default_min_chunk_sol() -> f64 {
    0.001
}

fn default_priority_fee() -> u64 {
    100000
}

fn default_fee_bps() -> u16 {
    50
}

fn default_fee_min_profit_sol() -> f64 {
    0.002
}

fn default_fee_max_share() -> f64 {
    0.1
}

fn default_quote_gap_ms() -> u64 {
    250
}

fn default_aggregator_gap_ms() -> u64 {
    150
}

fn default_rpc_gap_ms() -> u64 {
    40
}

fn default_stress_window_ms() -> u64 {
    5000
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    1500
}

fn default_backoff_max_elapsed_ms() -> u64 {
    6000
}

fn default_confirm_interval_ms() -> u64 {
    600
}

fn default_confirm_timeout_ms() -> u64 {
    45000
}

fn default_balance_wait_interval_ms() -> u64 {
    800
}

fn default_debit_wait_timeout_ms() -> u64 {
    12000
}

fn default_credit_wait_timeout_ms() -> u64 {
    12000
}

fn default_min_hold_ms() -> i64 {
    5000
}

fn default_sell_cooldown_ms() -> i64 {
    5000
}

fn default_pending_credit_grace_ms() -> i64 {
    8000
}

fn default_balance_recheck_ms() -> i64 {
    4000
}

fn default_router_cooldown_ms() -> i64 {
    60000
}

fn default_urgent_min_age_ms() -> i64 {
    7000
}

fn default_hard_severity() -> f64 {
    0.75
}

fn default_rug_pattern() -> String {
    r"(?i)rug|lp_?pull|liquidity_(pull|removed)|honeypot|freeze".into()
}

fn default_quote_cache_ms() -> i64 {
    2500
}

fn default_quote_stale_ms() -> i64 {
    15000
}

fn default_shock_drop_pct() -> f64 {
    25.0
}

fn default_shock_window_ms() -> i64 {
    15000
}

fn default_clamp_drop_pct() -> f64 {
    15.0
}

fn default_clamp_window_ms() -> i64 {
    4000
}

fn default_est_route_fee_bps() -> u16 {
    25
}

fn default_est_slippage_bps() -> u16 {
    100
}

fn default_est_tx_cost_sol() -> f64 {
    0.000105
}

fn default_fast_exit_drop_pct() -> f64 {
    40.0
}

fn default_fast_exit_window_ms() -> i64 {
    8000
}

fn default_remorse_ms() -> i64 {
    10000
}

fn default_dyn_stop_base_pct() -> f64 {
    15.0
}

fn default_dyn_stop_min_pct() -> f64 {
    4.0
}

fn default_dyn_stop_max_pct() -> f64 {
    35.0
}

fn default_dyn_stop_peak_weight() -> f64 {
    0.3
}

fn default_dyn_stop_panic_drawdown_pct() -> f64 {
    45.0
}

fn default_dyn_stop_gate_weight() -> f64 {
    0.4
}

fn default_warming_grace_ms() -> i64 {
    20000
}

fn default_post_warming_grace_ms() -> i64 {
    15000
}

fn default_lock_arm_pct() -> f64 {
    10.0
}

fn default_lock_retain_fraction() -> f64 {
    0.55
}

fn default_lock_breakeven_cushion_pct() -> f64 {
    1.0
}

fn default_lock_harvest_pct() -> f64 {
    30.0
}

fn default_degen_rug_bypass_sev() -> f64 {
    0.9
}

fn default_rebound_defer_ms() -> i64 {
    4000
}

fn default_rebound_max_defer_ms() -> i64 {
    20000
}

fn default_rebound_window_ms() -> i64 {
    12000
}

fn default_rebound_bounce_pct() -> f64 {
    4.0
}

fn default_stop_loss_pct() -> f64 {
    25.0
}

fn default_take_profit_pct() -> f64 {
    60.0
}

fn default_trailing_stop_pct() -> f64 {
    15.0
}

fn default_min_profit_to_trail_pct() -> f64 {
    8.0
}

fn default_min_notional_sol() -> f64 {
    0.002
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_keypair_env() -> String {
    "KEYPAIR_PATH".into()
}

fn default_positions_path() -> String {
    "data/positions.json".into()
}

fn default_live_store_path() -> String {
    "data/holdings.json".into()
}

fn default_dust_store_path() -> String {
    "data/dust.json".into()
}

fn default_resurrect_grace_ms() -> i64 {
    30000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("router.base_url", default_router_url())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SOLEXIT_)
            .add_source(
                config::Environment::with_prefix("SOLEXIT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.router.slippage_bps > 10000 || self.router.max_slippage_bps > 10000 {
            anyhow::bail!("slippage_bps cannot exceed 10000 (100%)");
        }

        if self.router.max_slippage_bps < self.router.slippage_bps {
            anyhow::bail!("max_slippage_bps must be >= slippage_bps");
        }

        if self.router.split_fractions.is_empty() {
            anyhow::bail!("split_fractions cannot be empty");
        }

        if self
            .router
            .split_fractions
            .iter()
            .any(|f| !(*f > 0.0 && *f < 1.0))
        {
            anyhow::bail!("split_fractions must lie strictly between 0 and 1");
        }

        let fee = &self.router.platform_fee;
        if fee.enabled {
            if fee.fee_account.is_empty() {
                anyhow::bail!("platform_fee.fee_account required when the fee is enabled");
            }
            if !(0.0..=1.0).contains(&fee.max_profit_share) {
                anyhow::bail!("platform_fee.max_profit_share must be between 0 and 1");
            }
        }

        let exit = &self.exit;
        if !(exit.lock_retain_fraction > 0.0 && exit.lock_retain_fraction <= 1.0) {
            anyhow::bail!("lock_retain_fraction must be in (0, 1]");
        }

        if !(0.0..=1.0).contains(&exit.hard_severity) {
            anyhow::bail!("hard_severity must be between 0 and 1");
        }

        if exit.stop_loss_pct <= 0.0 {
            anyhow::bail!("stop_loss_pct must be positive");
        }

        if exit.dyn_stop_min_pct > exit.dyn_stop_max_pct {
            anyhow::bail!("dyn_stop_min_pct must be <= dyn_stop_max_pct");
        }

        if exit.partial_take_profit_pct < 0.0 || exit.partial_take_profit_pct > 100.0 {
            anyhow::bail!("partial_take_profit_pct must be between 0 and 100");
        }

        regex::Regex::new(&exit.rug_pattern)
            .with_context(|| format!("Invalid rug_pattern regex: {}", exit.rug_pattern))?;

        if self.engine.dry_run {
            tracing::warn!("Dry-run enabled - decisions are logged, no swaps are sent");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    commitment: {}
    simulation: {}
  Router:
    base_url: {}
    api_key: {}
    slippage: {}bps (max {}bps)
    split_fractions: {:?}
    platform_fee: {}
  Exit:
    risk_mode: {:?}
    stop_loss: {}%
    take_profit: {}%
    trailing_stop: {}%
    profit_lock: arm {}% retain {}
    min_notional: {} SOL (dust exit: {})
  Engine:
    tick: {}ms
    dry_run: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.commitment,
            self.rpc.simulation_enabled,
            mask_url(&self.router.base_url),
            if self.router.api_key.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            self.router.slippage_bps,
            self.router.max_slippage_bps,
            self.router.split_fractions,
            if self.router.platform_fee.enabled {
                format!("{}bps", self.router.platform_fee.fee_bps)
            } else {
                "off".to_string()
            },
            self.exit.risk_mode,
            self.exit.stop_loss_pct,
            self.exit.take_profit_pct,
            self.exit.trailing_stop_pct,
            self.exit.lock_arm_pct,
            self.exit.lock_retain_fraction,
            self.exit.min_notional_sol,
            self.exit.dust_exit_enabled,
            self.engine.tick_interval_ms,
            self.engine.dry_run,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            router: RouterConfig::default(),
            resilience: ResilienceConfig::default(),
            exit: ExitConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.exit.urgent_min_age_ms, 7000);
        assert_eq!(config.exit.hard_severity, 0.75);
        assert_eq!(config.exit.lock_arm_pct, 10.0);
        assert_eq!(config.exit.shock_drop_pct, 25.0);
    }

    #[test]
    fn test_risk_mode_deserialize() {
        let mode: RiskMode = serde_json::from_str(r#""degen""#).unwrap();
        assert_eq!(mode, RiskMode::Degen);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.exit.lock_retain_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.router.split_fractions = vec![0.5, 1.0];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.exit.rug_pattern = "(unclosed".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solexit.toml");
        std::fs::write(
            &path,
            "[exit]\nstop_loss_pct = 9999.0\nrisk_mode = \"degen\"\n[router]\nslippage_bps = 500\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.exit.stop_loss_pct, 9999.0);
        assert_eq!(config.exit.risk_mode, RiskMode::Degen);
        assert_eq!(config.router.slippage_bps, 500);
        assert_eq!(config.exit.lock_arm_pct, 10.0);
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://rpc.example.com?api-key=secret"),
            "https://rpc.example.com?***"
        );
        assert_eq!(mask_url("https://rpc.example.com"), "https://rpc.example.com");
    }
}
