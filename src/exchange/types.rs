//! Router wire types and swap results

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::resilience::ErrorKind;

/// Wrapped SOL mint (settlement asset)
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// Quote request parameters
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Raw input amount
    pub amount: u64,
    pub slippage_bps: u16,
    pub restrict_intermediate: bool,
    /// Platform fee requested on the quote
    pub platform_fee_bps: Option<u16>,
    pub as_legacy: bool,
}

impl QuoteRequest {
    /// Query string pairs for the quote endpoint
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("inputMint", self.input_mint.clone()),
            ("outputMint", self.output_mint.clone()),
            ("amount", self.amount.to_string()),
            ("slippageBps", self.slippage_bps.to_string()),
            (
                "restrictIntermediateTokens",
                self.restrict_intermediate.to_string(),
            ),
        ];
        if let Some(bps) = self.platform_fee_bps {
            q.push(("platformFeeBps", bps.to_string()));
        }
        if self.as_legacy {
            q.push(("asLegacyTransaction", "true".to_string()));
        }
        q
    }
}

/// Parsed quote; `raw` is echoed back to the swap endpoints
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub in_amount: u64,
    pub out_amount: u64,
    pub route_plan: Vec<Value>,
    pub price_impact_pct: f64,
    pub raw: Value,
}

impl Quote {
    /// Parse a quote response body
    pub fn from_value(raw: Value) -> Result<Self> {
        if let Some(err) = raw.get("error").and_then(Value::as_str) {
            return Err(Error::Router(err.to_string()));
        }
        let in_amount = amount_field(&raw, "inAmount")?;
        let out_amount = amount_field(&raw, "outAmount")?;
        let route_plan = raw
            .get("routePlan")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if route_plan.is_empty() || out_amount == 0 {
            return Err(Error::NoRoute);
        }
        let price_impact_pct = raw
            .get("priceImpactPct")
            .and_then(|v| match v {
                Value::String(s) => s.parse().ok(),
                other => other.as_f64(),
            })
            .unwrap_or(0.0);
        Ok(Self {
            in_amount,
            out_amount,
            route_plan,
            price_impact_pct,
            raw,
        })
    }
}

fn amount_field(raw: &Value, field: &str) -> Result<u64> {
    match raw.get(field) {
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| Error::Deserialization(format!("bad {}: {}", field, s))),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| Error::Deserialization(format!("bad {}: {}", field, v))),
        None => Err(Error::Deserialization(format!("quote missing {}", field))),
    }
}

/// Body for the swap and swap-instructions endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub user_public_key: String,
    pub quote_response: Value,
    pub wrap_and_unwrap_sol: bool,
    pub use_shared_accounts: bool,
    pub as_legacy_transaction: bool,
    pub dynamic_compute_unit_limit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prioritization_fee_lamports: Option<u64>,
}

/// Assembled transaction returned by the swap endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    /// Base64 serialized unsigned transaction
    pub swap_transaction: String,
    #[serde(default)]
    pub last_valid_block_height: Option<u64>,
    #[serde(default)]
    pub simulation_error: Option<Value>,
}

/// One instruction as returned by the swap-instructions endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterInstruction {
    pub program_id: String,
    pub accounts: Vec<RouterAccountMeta>,
    /// Base64 instruction data
    pub data: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterAccountMeta {
    pub pubkey: String,
    pub is_signer: bool,
    pub is_writable: bool,
}

/// Raw instructions for the manual-build fallback
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapInstructions {
    #[serde(default)]
    pub token_ledger_instruction: Option<RouterInstruction>,
    #[serde(default)]
    pub compute_budget_instructions: Vec<RouterInstruction>,
    #[serde(default)]
    pub setup_instructions: Vec<RouterInstruction>,
    pub swap_instruction: RouterInstruction,
    #[serde(default)]
    pub cleanup_instruction: Option<RouterInstruction>,
    #[serde(default)]
    pub other_instructions: Vec<RouterInstruction>,
    #[serde(default)]
    pub address_lookup_table_addresses: Vec<String>,
}

impl SwapInstructions {
    /// Instructions in execution order
    pub fn ordered(&self) -> Vec<&RouterInstruction> {
        self.compute_budget_instructions
            .iter()
            .chain(self.other_instructions.iter())
            .chain(self.setup_instructions.iter())
            .chain(self.token_ledger_instruction.iter())
            .chain(std::iter::once(&self.swap_instruction))
            .chain(self.cleanup_instruction.iter())
            .collect()
    }
}

/// Which submission path produced (or last attempted) a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapTier {
    Assembled,
    AssembledShared,
    Legacy,
    Manual,
    ManualShared,
}

impl SwapTier {
    pub fn shared(self) -> bool {
        matches!(self, SwapTier::AssembledShared | SwapTier::ManualShared)
    }
}

/// Final outcome of a swap; the only thing callers above the exchange
/// client see besides the sentinel errors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapResult {
    pub ok: bool,
    pub sig: Option<String>,
    pub code: Option<ErrorKind>,
    pub msg: String,
    /// Raw input amount actually sent
    pub in_amount: u64,
    /// Quoted raw output amount
    pub out_amount: u64,
    /// Fraction of the requested size that was sold (1.0 unless split)
    pub sold_fraction: f64,
    pub tier: Option<SwapTier>,
    /// Slippage/routing restrictions were relaxed
    pub relaxed: bool,
}

impl SwapResult {
    pub fn failed(code: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            sig: None,
            code: Some(code),
            msg: msg.into(),
            in_amount: 0,
            out_amount: 0,
            sold_fraction: 0.0,
            tier: None,
            relaxed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_parse() {
        let quote = Quote::from_value(json!({
            "inAmount": "2000000000",
            "outAmount": "160000000",
            "priceImpactPct": "0.012",
            "routePlan": [{"swapInfo": {"label": "Pump.fun Amm"}, "percent": 100}]
        }))
        .unwrap();
        assert_eq!(quote.in_amount, 2_000_000_000);
        assert_eq!(quote.out_amount, 160_000_000);
        assert!((quote.price_impact_pct - 0.012).abs() < 1e-12);
    }

    #[test]
    fn test_quote_without_route_is_no_route() {
        let res = Quote::from_value(json!({"inAmount": "1", "outAmount": "0", "routePlan": []}));
        assert!(matches!(res, Err(Error::NoRoute)));
    }

    #[test]
    fn test_quote_query_flags() {
        let req = QuoteRequest {
            input_mint: "A".into(),
            output_mint: WSOL_MINT.into(),
            amount: 5,
            slippage_bps: 300,
            restrict_intermediate: true,
            platform_fee_bps: Some(50),
            as_legacy: false,
        };
        let q = req.query();
        assert!(q.contains(&("restrictIntermediateTokens", "true".to_string())));
        assert!(q.contains(&("platformFeeBps", "50".to_string())));
        assert!(!q.iter().any(|(k, _)| *k == "asLegacyTransaction"));
    }

    #[test]
    fn test_swap_request_serialization() {
        let req = SwapRequest {
            user_public_key: "owner".into(),
            quote_response: json!({}),
            wrap_and_unwrap_sol: true,
            use_shared_accounts: false,
            as_legacy_transaction: false,
            dynamic_compute_unit_limit: true,
            fee_account: None,
            prioritization_fee_lamports: Some(1000),
        };
        let body = serde_json::to_string(&req).unwrap();
        assert!(body.contains("\"useSharedAccounts\":false"));
        assert!(body.contains("\"prioritizationFeeLamports\":1000"));
        assert!(!body.contains("feeAccount"));
    }
}
