//! Per-tick evaluation context and the sell decision

use regex::Regex;
use std::fmt;

use crate::config::ExitConfig;
use crate::error::{Error, Result};
use crate::position::{Position, Valuation};

/// Why a position is being sold
#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    FastExit(String),
    DynHardStop,
    ProfitLockHarvest,
    ProfitLockFloor,
    Rug,
    PumpDrop,
    ObserverDrop(String),
    MaxHoldExpire,
    MaxHold,
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::FastExit(why) => write!(f, "fast_exit:{}", why),
            ExitReason::DynHardStop => f.write_str("dyn_hard_stop"),
            ExitReason::ProfitLockHarvest => f.write_str("profit_lock_harvest"),
            ExitReason::ProfitLockFloor => f.write_str("profit_lock_floor"),
            ExitReason::Rug => f.write_str("rug"),
            ExitReason::PumpDrop => f.write_str("pump_drop"),
            ExitReason::ObserverDrop(why) => write!(f, "observer_drop:{}", why),
            ExitReason::MaxHoldExpire => f.write_str("max_hold_expire"),
            ExitReason::MaxHold => f.write_str("max_hold"),
            ExitReason::StopLoss => f.write_str("stop_loss"),
            ExitReason::TakeProfit => f.write_str("take_profit"),
            ExitReason::TrailingStop => f.write_str("trailing_stop"),
        }
    }
}

/// Why a sell was held back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    ReboundPredictHold,
    BelowMinNotional,
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoldReason::ReboundPredictHold => f.write_str("rebound-predict-hold"),
            HoldReason::BelowMinNotional => f.write_str("below-min-notional"),
        }
    }
}

/// Outcome of one pipeline pass
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Hold { reason: Option<HoldReason> },
    /// Sell `pct` percent of the position
    SellPartial { pct: f64, reason: ExitReason },
    SellAll { reason: ExitReason, hard_stop: bool },
}

impl Default for Decision {
    fn default() -> Self {
        Decision::Hold { reason: None }
    }
}

impl Decision {
    pub fn hold(reason: HoldReason) -> Self {
        Decision::Hold {
            reason: Some(reason),
        }
    }

    pub fn sell_all(reason: ExitReason) -> Self {
        Decision::SellAll {
            reason,
            hard_stop: false,
        }
    }

    /// `none`, `sell_partial` or `sell_all`
    pub fn action(&self) -> &'static str {
        match self {
            Decision::Hold { .. } => "none",
            Decision::SellPartial { .. } => "sell_partial",
            Decision::SellAll { .. } => "sell_all",
        }
    }

    pub fn is_hold(&self) -> bool {
        matches!(self, Decision::Hold { .. })
    }

    pub fn is_hard_stop(&self) -> bool {
        matches!(self, Decision::SellAll { hard_stop: true, .. })
    }

    /// Percent of the position to sell; `None` when holding
    pub fn sell_pct(&self) -> Option<f64> {
        match self {
            Decision::Hold { .. } => None,
            Decision::SellPartial { pct, .. } => Some(*pct),
            Decision::SellAll { .. } => Some(100.0),
        }
    }

    pub fn reason(&self) -> Option<&ExitReason> {
        match self {
            Decision::Hold { .. } => None,
            Decision::SellPartial { reason, .. } | Decision::SellAll { reason, .. } => Some(reason),
        }
    }

    /// Reason label for logs and reports
    pub fn label(&self) -> String {
        match self {
            Decision::Hold { reason: Some(r) } => r.to_string(),
            Decision::Hold { reason: None } => String::new(),
            Decision::SellPartial { reason, .. } | Decision::SellAll { reason, .. } => {
                reason.to_string()
            }
        }
    }
}

/// Force flags in effect for this tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForceFlags {
    pub rug: bool,
    pub pump_drop: bool,
    pub observer_drop: bool,
    /// Max-hold expiry
    pub expire: bool,
}

impl ForceFlags {
    pub fn any(&self) -> bool {
        self.rug || self.pump_drop || self.observer_drop || self.expire
    }
}

/// Mutable state threaded through the stages for one mint
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub mint: String,
    pub now_ms: i64,
    /// Working copy, written back to the book after the pass
    pub pos: Position,
    pub flags: ForceFlags,
    pub rug_sev: f64,
    /// Severity of the urgent signal consumed this tick
    pub urgent_sev: f64,
    pub urgent_reason: Option<String>,
    pub valuation: Valuation,
    pub age_ms: i64,
    pub in_min_hold: bool,
    pub in_sell_guard: bool,
    pub is_fast_exit: bool,
    pub decision: Decision,
    /// Evaluate again at this time even between regular ticks
    pub wake_at_ms: Option<i64>,
}

impl PipelineContext {
    pub fn new(pos: Position, now_ms: i64) -> Self {
        Self {
            mint: pos.mint.clone(),
            now_ms,
            age_ms: pos.age_ms(now_ms),
            pos,
            flags: ForceFlags::default(),
            rug_sev: 0.0,
            urgent_sev: 0.0,
            urgent_reason: None,
            valuation: Valuation::default(),
            in_min_hold: false,
            in_sell_guard: false,
            is_fast_exit: false,
            decision: Decision::default(),
            wake_at_ms: None,
        }
    }

    /// Urgent signal this tick is severe enough to bypass soft gates
    pub fn urgent_is_hard(&self, config: &ExitConfig) -> bool {
        self.urgent_sev >= config.hard_severity
    }

    pub fn schedule_wake(&mut self, at_ms: i64) {
        self.wake_at_ms = Some(match self.wake_at_ms {
            Some(existing) => existing.min(at_ms),
            None => at_ms,
        });
    }
}

/// Exit settings plus the compiled rug pattern
#[derive(Debug, Clone)]
pub struct ExitRules {
    pub config: ExitConfig,
    rug_pattern: Regex,
}

impl ExitRules {
    pub fn new(config: ExitConfig) -> Result<Self> {
        let rug_pattern = Regex::new(&config.rug_pattern)
            .map_err(|e| Error::Config(format!("exit.rug_pattern: {}", e)))?;
        Ok(Self {
            config,
            rug_pattern,
        })
    }

    pub fn is_rug_reason(&self, reason: &str) -> bool {
        self.rug_pattern.is_match(reason)
    }

    /// Severe enough to override cooldowns and guards: the reason matches
    /// the rug pattern or the severity reaches the hard level
    pub fn is_hard_urgent(&self, reason: &str, sev: f64) -> bool {
        sev >= self.config.hard_severity || self.is_rug_reason(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_actions() {
        assert_eq!(Decision::default().action(), "none");
        assert_eq!(
            Decision::SellPartial {
                pct: 30.0,
                reason: ExitReason::ProfitLockHarvest
            }
            .sell_pct(),
            Some(30.0)
        );
        let hard = Decision::SellAll {
            reason: ExitReason::DynHardStop,
            hard_stop: true,
        };
        assert!(hard.is_hard_stop());
        assert_eq!(hard.label(), "dyn_hard_stop");
        assert_eq!(
            Decision::hold(HoldReason::ReboundPredictHold).label(),
            "rebound-predict-hold"
        );
    }

    #[test]
    fn test_hard_urgent_by_pattern_or_severity() {
        let rules = ExitRules::new(ExitConfig::default()).unwrap();
        assert!(rules.is_hard_urgent("lp_pull detected", 0.1));
        assert!(rules.is_hard_urgent("momentum_drop", 0.9));
        assert!(!rules.is_hard_urgent("momentum_drop", 0.5));
    }

    #[test]
    fn test_wake_keeps_earliest() {
        let mut ctx = PipelineContext::new(Position::new("m", 6, 1.0, 1.0, 0), 10);
        ctx.schedule_wake(500);
        ctx.schedule_wake(300);
        ctx.schedule_wake(900);
        assert_eq!(ctx.wake_at_ms, Some(300));
    }
}
