//! Error classification for router and RPC failures
//!
//! Every failure seen by the swap engine is reduced to one [`ErrorKind`].
//! Retry, escalation and cooldown behaviour is looked up in the policy
//! table ([`ErrorKind::policy`]) instead of being re-derived at each call site.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed taxonomy of swap/RPC failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No viable route for this pair/amount
    NoRoute,
    /// Router rejected the amount as dust
    RouterDust,
    /// Not enough SOL to pay fees/rent
    InsufficientLamports,
    /// On-chain slippage tolerance exceeded
    Slippage,
    /// Versioned transactions not accepted by the path in use
    NeedLegacy,
    /// Serialized transaction exceeds the packet limit
    TxTooLarge,
    /// Blockhash expired or not found
    Blockhash,
    /// RPC node lagging behind the cluster
    NodeBehind,
    /// Aggregator does not support shared program accounts for this route
    SharedAccountsUnsupported,
    /// HTTP 429 / rate limited
    RpcLimit,
    /// Request timed out
    RpcTimeout,
    /// Connection-level failure
    Network,
    /// 401/403 from a gated endpoint
    RpcAuth,
    /// Anything else
    SendFail,
}

/// Next strategy to try after a failure of a given kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Give up on this attempt and surface the failure
    Surface,
    /// Repeat the same tier (fresh blockhash / fresh assembly)
    RetrySameTier,
    /// Re-assemble allowing shared program accounts
    SharedAccounts,
    /// Re-assemble as a legacy transaction
    Legacy,
    /// Fetch raw instructions and compile the transaction locally
    ManualBuild,
    /// Re-quote with wider slippage and relaxed routing
    WidenSlippage,
    /// Try smaller fractions of the position
    SplitSell,
}

/// Handling policy for one error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    /// Safe to retry the same call generically (with backoff)
    pub retry_generic: bool,
    /// Puts the call class into a stress window
    pub opens_stress_window: bool,
    /// Puts the mint under router cooldown
    pub cools_router: bool,
    /// What the swap engine tries next
    pub escalation: Escalation,
}

impl ErrorKind {
    /// Policy table
    pub const fn policy(self) -> ErrorPolicy {
        use Escalation::*;
        let (retry_generic, opens_stress_window, cools_router, escalation) = match self {
            ErrorKind::NoRoute => (false, false, true, SplitSell),
            ErrorKind::RouterDust => (false, false, true, SplitSell),
            ErrorKind::InsufficientLamports => (false, false, false, Surface),
            ErrorKind::Slippage => (false, false, false, WidenSlippage),
            ErrorKind::NeedLegacy => (false, false, false, Legacy),
            ErrorKind::TxTooLarge => (false, false, false, ManualBuild),
            ErrorKind::Blockhash => (true, false, false, RetrySameTier),
            ErrorKind::NodeBehind => (true, false, false, RetrySameTier),
            ErrorKind::SharedAccountsUnsupported => (false, false, false, SharedAccounts),
            ErrorKind::RpcLimit => (true, true, false, RetrySameTier),
            ErrorKind::RpcTimeout => (true, false, false, RetrySameTier),
            ErrorKind::Network => (true, false, false, RetrySameTier),
            ErrorKind::RpcAuth => (true, true, false, RetrySameTier),
            ErrorKind::SendFail => (false, false, false, ManualBuild),
        };
        ErrorPolicy {
            retry_generic,
            opens_stress_window,
            cools_router,
            escalation,
        }
    }

    /// Route-level failure (no path or dust rejection)
    pub fn is_unroutable(self) -> bool {
        matches!(self, ErrorKind::NoRoute | ErrorKind::RouterDust)
    }

    /// Stable code used in logs and `SwapResult::code`
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NoRoute => "NO_ROUTE",
            ErrorKind::RouterDust => "ROUTER_DUST",
            ErrorKind::InsufficientLamports => "INSUFFICIENT_LAMPORTS",
            ErrorKind::Slippage => "SLIPPAGE",
            ErrorKind::NeedLegacy => "NEED_LEGACY",
            ErrorKind::TxTooLarge => "TX_TOO_LARGE",
            ErrorKind::Blockhash => "BLOCKHASH",
            ErrorKind::NodeBehind => "NODE_BEHIND",
            ErrorKind::SharedAccountsUnsupported => "SHARED_ACCOUNTS_UNSUPPORTED",
            ErrorKind::RpcLimit => "RPC_LIMIT",
            ErrorKind::RpcTimeout => "RPC_TIMEOUT",
            ErrorKind::Network => "NETWORK",
            ErrorKind::RpcAuth => "RPC_AUTH",
            ErrorKind::SendFail => "SEND_FAIL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

lazy_static! {
    /// Ordered matchers; first hit wins
    static ref MATCHERS: Vec<(Regex, ErrorKind)> = {
        let table: &[(&str, ErrorKind)] = &[
            (r"(?i)shared.?accounts?.*(not supported|unsupported)|simple.?amm|not.?support.*shared", ErrorKind::SharedAccountsUnsupported),
            (r"(?i)could not find any route|no.?route|route.?not.?found|NO_ROUTES_FOUND|TOKEN_NOT_TRADABLE", ErrorKind::NoRoute),
            (r"(?i)dust|amount.?too.?small|cannot compute other amount threshold|CIRCULAR_ARBITRAGE", ErrorKind::RouterDust),
            (r"(?i)insufficient lamports|insufficient funds for (fee|rent)|0x1\b.*lamports|InsufficientFundsForRent", ErrorKind::InsufficientLamports),
            (r"(?i)slippage|0x1771|custom program error: 6001\b", ErrorKind::Slippage),
            (r"(?i)versioned|version.*not supported|asLegacyTransaction|legacy", ErrorKind::NeedLegacy),
            (r"(?i)too large|exceeds? .*packet|1232", ErrorKind::TxTooLarge),
            (r"(?i)blockhash", ErrorKind::Blockhash),
            (r"(?i)node is behind|behind by \d+ slots|min context slot", ErrorKind::NodeBehind),
            (r"(?i)\b429\b|too many requests|rate.?limit", ErrorKind::RpcLimit),
            (r"(?i)\b40[13]\b|unauthori[sz]ed|forbidden|api.?key", ErrorKind::RpcAuth),
            (r"(?i)timed? ?out|deadline", ErrorKind::RpcTimeout),
            (r"(?i)connection|connect error|dns|reset by peer|broken pipe|eof", ErrorKind::Network),
        ];
        table
            .iter()
            .map(|(pattern, kind)| (Regex::new(pattern).expect("static classifier regex"), *kind))
            .collect()
    };
}

/// Classify a free-form error message
pub fn classify_message(message: &str) -> ErrorKind {
    MATCHERS
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::SendFail)
}

/// Aggregator program error codes that mean the route cannot carry the amount
pub const DUST_ROUTE_CODES: &[u32] = &[6008, 6014, 6017, 6024];

/// Aggregator slippage violation
pub const SLIPPAGE_CODE: u32 = 6001;

lazy_static! {
    static ref CUSTOM_CODE: Regex =
        Regex::new(r"(?i)custom(?: program error:)?\s*\(?\s*(0x[0-9a-f]+|\d+)").expect("static regex");
}

/// Classify an on-chain error string obtained from a simulation
///
/// Distinguishes dust-routing program errors from ordinary slippage; falls
/// back to message classification for everything else.
pub fn classify_onchain(err: &str, logs: &[String]) -> ErrorKind {
    if let Some(code) = extract_custom_code(err) {
        if code == SLIPPAGE_CODE {
            return ErrorKind::Slippage;
        }
        if DUST_ROUTE_CODES.contains(&code) {
            return ErrorKind::RouterDust;
        }
    }
    for line in logs {
        if line.contains("SlippageToleranceExceeded") {
            return ErrorKind::Slippage;
        }
        if line.contains("InsufficientFunds") && line.contains("lamports") {
            return ErrorKind::InsufficientLamports;
        }
    }
    classify_message(err)
}

fn extract_custom_code(err: &str) -> Option<u32> {
    let caps = CUSTOM_CODE.captures(err)?;
    let raw = caps.get(1)?.as_str();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_route_errors() {
        assert_eq!(
            classify_message("Could not find any route for this pair"),
            ErrorKind::NoRoute
        );
        assert_eq!(
            classify_message("quote failed: amount is dust"),
            ErrorKind::RouterDust
        );
        assert_eq!(
            classify_message("Simple AMMs are not supported with shared accounts"),
            ErrorKind::SharedAccountsUnsupported
        );
    }

    #[test]
    fn test_classify_transport_errors() {
        assert_eq!(classify_message("HTTP 429 Too Many Requests"), ErrorKind::RpcLimit);
        assert_eq!(classify_message("Blockhash not found"), ErrorKind::Blockhash);
        assert_eq!(classify_message("request timed out"), ErrorKind::RpcTimeout);
        assert_eq!(classify_message("403 Forbidden"), ErrorKind::RpcAuth);
        assert_eq!(classify_message("something odd"), ErrorKind::SendFail);
    }

    #[test]
    fn test_classify_onchain_codes() {
        let slip = "Error processing Instruction 3: custom program error: 0x1771";
        assert_eq!(classify_onchain(slip, &[]), ErrorKind::Slippage);

        let dust = "InstructionError(2, Custom(6024))";
        assert_eq!(classify_onchain(dust, &[]), ErrorKind::RouterDust);

        let logs = vec!["Program log: Error: SlippageToleranceExceeded".to_string()];
        assert_eq!(classify_onchain("failed", &logs), ErrorKind::Slippage);
    }

    #[test]
    fn test_policy_table() {
        assert!(ErrorKind::RpcLimit.policy().opens_stress_window);
        assert!(ErrorKind::NoRoute.policy().cools_router);
        assert_eq!(
            ErrorKind::InsufficientLamports.policy().escalation,
            Escalation::Surface
        );
        assert!(!ErrorKind::InsufficientLamports.policy().retry_generic);
        assert_eq!(ErrorKind::NeedLegacy.policy().escalation, Escalation::Legacy);
    }
}
