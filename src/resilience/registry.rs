//! Process-wide risk state
//!
//! Router cooldowns, pending urgent signals, externally raised force flags
//! and per-mint swap locks. One instance is shared by the pipeline stages,
//! the executor and the exchange client.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Ephemeral exit hint raised by an observer or by the quote-shock detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrgentSignal {
    pub reason: String,
    /// Severity in 0..=1
    pub sev: f64,
    pub raised_at_ms: i64,
}

/// Flags an external detector can raise for a mint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalFlag {
    Rug,
    PumpDrop,
}

/// Exclusive swap lock for one mint; released on drop
pub struct MintGuard {
    mint: String,
    _guard: OwnedMutexGuard<()>,
}

impl MintGuard {
    pub fn mint(&self) -> &str {
        &self.mint
    }
}

impl std::fmt::Debug for MintGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintGuard").field("mint", &self.mint).finish()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RaisedFlags {
    rug: Option<f64>,
    pump_drop: bool,
}

/// Shared registry
#[derive(Default)]
pub struct RiskRegistry {
    router_cooldowns: DashMap<String, i64>,
    urgent: DashMap<String, UrgentSignal>,
    flags: DashMap<String, RaisedFlags>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RiskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // === Router cooldown ===

    /// Put a mint under router cooldown until `until_ms`; never shortens an
    /// existing cooldown
    pub fn set_router_cooldown(&self, mint: &str, until_ms: i64) {
        let mut entry = self.router_cooldowns.entry(mint.to_string()).or_insert(until_ms);
        if *entry < until_ms {
            *entry = until_ms;
        }
        info!(mint, until_ms, "router cooldown set");
    }

    pub fn router_cooldown_until(&self, mint: &str) -> Option<i64> {
        self.router_cooldowns.get(mint).map(|v| *v)
    }

    /// True while `now_ms < cooldownUntil`
    pub fn is_cooling(&self, mint: &str, now_ms: i64) -> bool {
        match self.router_cooldown_until(mint) {
            Some(until) if now_ms < until => true,
            Some(_) => {
                self.router_cooldowns.remove(mint);
                false
            }
            None => false,
        }
    }

    // === Urgent signals ===

    /// Raise (or escalate) an urgent signal; a weaker signal never replaces a
    /// stronger pending one
    pub fn raise_urgent(&self, mint: &str, reason: &str, sev: f64, now_ms: i64) {
        let sev = sev.clamp(0.0, 1.0);
        let signal = UrgentSignal {
            reason: reason.to_string(),
            sev,
            raised_at_ms: now_ms,
        };
        match self.urgent.get_mut(mint) {
            Some(existing) if existing.sev > sev => {
                debug!(mint, reason, sev, pending = existing.sev, "weaker urgent signal ignored");
                return;
            }
            Some(mut existing) => *existing = signal,
            None => {
                self.urgent.insert(mint.to_string(), signal);
            }
        }
        info!(mint, reason, sev, "urgent signal raised");
    }

    pub fn peek_urgent(&self, mint: &str) -> Option<UrgentSignal> {
        self.urgent.get(mint).map(|s| s.clone())
    }

    /// Consume the pending signal; a signal is delivered at most once
    pub fn take_urgent(&self, mint: &str) -> Option<UrgentSignal> {
        self.urgent.remove(mint).map(|(_, s)| s)
    }

    // === External force flags ===

    pub fn raise_flag(&self, mint: &str, flag: ExternalFlag, sev: f64) {
        let mut entry = self.flags.entry(mint.to_string()).or_default();
        match flag {
            ExternalFlag::Rug => {
                let prev = entry.rug.unwrap_or(0.0);
                entry.rug = Some(prev.max(sev.clamp(0.0, 1.0)));
            }
            ExternalFlag::PumpDrop => entry.pump_drop = true,
        }
        info!(mint, ?flag, sev, "force flag raised");
    }

    /// Raised flags without consuming them: (rug severity, pump-drop)
    pub fn peek_flags(&self, mint: &str) -> (Option<f64>, bool) {
        self.flags
            .get(mint)
            .map(|f| (f.rug, f.pump_drop))
            .unwrap_or((None, false))
    }

    // === Per-mint swap locks ===

    /// Acquire the exclusive swap lock for a mint
    pub async fn lock_mint(&self, mint: &str) -> MintGuard {
        let lock = self
            .locks
            .entry(mint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        MintGuard {
            mint: mint.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Drop the lock entry of a closed mint once nobody holds or waits on it
    pub fn release_lock(&self, mint: &str) {
        self.locks
            .remove_if(mint, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Forget all per-mint state (position fully closed)
    pub fn forget(&self, mint: &str) {
        self.urgent.remove(mint);
        self.flags.remove(mint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_until_expiry() {
        let registry = RiskRegistry::new();
        registry.set_router_cooldown("mint", 1_000);
        assert!(registry.is_cooling("mint", 999));
        assert!(!registry.is_cooling("mint", 1_000));
        assert!(registry.router_cooldown_until("mint").is_none());
    }

    #[test]
    fn test_cooldown_never_shortened() {
        let registry = RiskRegistry::new();
        registry.set_router_cooldown("mint", 5_000);
        registry.set_router_cooldown("mint", 2_000);
        assert_eq!(registry.router_cooldown_until("mint"), Some(5_000));
    }

    #[test]
    fn test_urgent_consumed_once() {
        let registry = RiskRegistry::new();
        registry.raise_urgent("mint", "momentum_drop_x28", 0.9, 10);
        assert!(registry.peek_urgent("mint").is_some());
        let taken = registry.take_urgent("mint").unwrap();
        assert_eq!(taken.reason, "momentum_drop_x28");
        assert!(registry.take_urgent("mint").is_none());
    }

    #[test]
    fn test_weaker_urgent_does_not_replace() {
        let registry = RiskRegistry::new();
        registry.raise_urgent("mint", "rug_quote_shock", 1.0, 10);
        registry.raise_urgent("mint", "soft_drop", 0.3, 20);
        let s = registry.peek_urgent("mint").unwrap();
        assert_eq!(s.reason, "rug_quote_shock");
        assert_eq!(s.sev, 1.0);
        assert_eq!(s.raised_at_ms, 10);
    }

    #[test]
    fn test_flags_persist_until_forgotten() {
        let registry = RiskRegistry::new();
        registry.raise_flag("mint", ExternalFlag::Rug, 0.4);
        registry.raise_flag("mint", ExternalFlag::Rug, 0.8);
        registry.raise_flag("mint", ExternalFlag::PumpDrop, 0.0);
        assert_eq!(registry.peek_flags("mint"), (Some(0.8), true));
        assert_eq!(registry.peek_flags("mint"), (Some(0.8), true));
        registry.forget("mint");
        assert_eq!(registry.peek_flags("mint"), (None, false));
    }

    #[tokio::test]
    async fn test_mint_lock_is_exclusive() {
        let registry = Arc::new(RiskRegistry::new());
        let guard = registry.lock_mint("a").await;

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _guard = registry.lock_mint("a").await;
            })
        };
        let _other = registry.lock_mint("b").await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_released_only_when_unused() {
        let registry = RiskRegistry::new();
        let guard = registry.lock_mint("a").await;
        registry.release_lock("a");
        assert_eq!(registry.lock_count(), 1);

        drop(guard);
        registry.release_lock("a");
        assert_eq!(registry.lock_count(), 0);
    }
}
