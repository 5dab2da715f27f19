//! Dynamic platform fee
//!
//! The fee is requested on a sell quote only when the trade stays
//! profitable after it, and only if it does not eat too large a share of
//! the profit. The no-fee quote remains the fallback.

use crate::config::PlatformFeeConfig;

/// Outcome of the fee check for one sell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeePlan {
    pub fee_bps: u16,
    /// Expected fee in raw output units
    pub expected_fee: u64,
}

/// Decide whether to request a platform fee.
///
/// `expected_out` is the no-fee quote output and `cost_basis` the cost of
/// the amount being sold, both in raw output units (lamports).
pub fn plan_fee(config: &PlatformFeeConfig, expected_out: u64, cost_basis: Option<u64>) -> Option<FeePlan> {
    if !config.enabled || config.fee_bps == 0 || config.fee_account.is_empty() {
        return None;
    }
    let cost_basis = cost_basis?;
    let profit = expected_out.saturating_sub(cost_basis);
    if profit == 0 {
        return None;
    }

    let expected_fee = (expected_out as u128 * config.fee_bps as u128 / 10_000) as u64;
    let min_profit = (config.min_profit_sol * 1_000_000_000.0).max(0.0) as u64;
    if profit.saturating_sub(expected_fee) < min_profit {
        return None;
    }
    if expected_fee as f64 > profit as f64 * config.max_profit_share {
        return None;
    }
    Some(FeePlan {
        fee_bps: config.fee_bps,
        expected_fee,
    })
}

/// Use the fee-bearing quote only if its route is as good as the no-fee
/// route once the fee itself is accounted for (within `slack_bps`).
pub fn fee_quote_acceptable(fee_out: u64, no_fee_out: u64, plan: &FeePlan, slack_bps: u16) -> bool {
    let slack = (no_fee_out as u128 * slack_bps as u128 / 10_000) as u64;
    fee_out.saturating_add(plan.expected_fee).saturating_add(slack) >= no_fee_out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PlatformFeeConfig {
        PlatformFeeConfig {
            enabled: true,
            fee_bps: 100,
            fee_account: "FeeAcct".into(),
            min_profit_sol: 0.01,
            max_profit_share: 0.2,
        }
    }

    #[test]
    fn test_no_fee_when_losing() {
        assert!(plan_fee(&config(), 100_000_000, Some(120_000_000)).is_none());
        assert!(plan_fee(&config(), 100_000_000, None).is_none());
    }

    #[test]
    fn test_fee_when_profit_covers_it() {
        // out 0.3 SOL, cost 0.2 SOL, fee 0.003 SOL
        let plan = plan_fee(&config(), 300_000_000, Some(200_000_000)).unwrap();
        assert_eq!(plan.expected_fee, 3_000_000);
    }

    #[test]
    fn test_fee_share_cap() {
        // profit 0.012, fee 0.0102 -> share too high and min profit missed
        assert!(plan_fee(&config(), 1_020_000_000, Some(1_008_000_000)).is_none());
    }

    #[test]
    fn test_fee_quote_comparison() {
        let plan = FeePlan {
            fee_bps: 100,
            expected_fee: 3_000_000,
        };
        assert!(fee_quote_acceptable(297_000_000, 300_000_000, &plan, 10));
        assert!(!fee_quote_acceptable(290_000_000, 300_000_000, &plan, 10));
    }
}
