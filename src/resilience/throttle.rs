//! Call pacing and stress windows
//!
//! Each call class keeps a minimum gap between requests. Rate-limit and auth
//! failures open a stress window for that class; every call issued while the
//! window is open first waits out the remaining stress time.

use backoff::{future::retry, ExponentialBackoff};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::ResilienceConfig;
use crate::error::Result;
use crate::resilience::classify::ErrorKind;

/// Class of outbound call, each with its own pacing lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallClass {
    /// Router quote endpoint
    Quote,
    /// Router swap / swap-instructions endpoints
    Aggregator,
    /// Chain RPC
    Rpc,
}

impl CallClass {
    fn index(self) -> usize {
        match self {
            CallClass::Quote => 0,
            CallClass::Aggregator => 1,
            CallClass::Rpc => 2,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Lane {
    next_slot: Option<Instant>,
    stress_until: Option<Instant>,
}

/// Shared pacing state passed to every network-facing component
pub struct ResilienceState {
    gaps: [Duration; 3],
    stress_window: Duration,
    backoff_initial: Duration,
    backoff_max: Duration,
    backoff_elapsed: Duration,
    lanes: Mutex<[Lane; 3]>,
}

impl ResilienceState {
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            gaps: [
                Duration::from_millis(config.quote_gap_ms),
                Duration::from_millis(config.aggregator_gap_ms),
                Duration::from_millis(config.rpc_gap_ms),
            ],
            stress_window: Duration::from_millis(config.stress_window_ms),
            backoff_initial: Duration::from_millis(config.backoff_initial_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            backoff_elapsed: Duration::from_millis(config.backoff_max_elapsed_ms),
            lanes: Mutex::new([Lane::default(); 3]),
        }
    }

    /// Wait until this class may issue its next call, then reserve the slot
    pub async fn pace(&self, class: CallClass) {
        let wake = {
            let mut lanes = self.lanes.lock().await;
            let lane = &mut lanes[class.index()];
            let now = Instant::now();

            let mut at = now;
            if let Some(stress) = lane.stress_until {
                if stress > at {
                    at = stress;
                } else {
                    lane.stress_until = None;
                }
            }
            if let Some(slot) = lane.next_slot {
                if slot > at {
                    at = slot;
                }
            }
            lane.next_slot = Some(at + self.gaps[class.index()]);
            at
        };

        if wake > Instant::now() {
            debug!(?class, wait_ms = (wake - Instant::now()).as_millis() as u64, "pacing call");
            sleep_until(wake).await;
        }
    }

    /// Record a failure; opens the stress window when the policy says so
    pub async fn observe_failure(&self, class: CallClass, kind: ErrorKind) {
        if !kind.policy().opens_stress_window {
            return;
        }
        let mut lanes = self.lanes.lock().await;
        let lane = &mut lanes[class.index()];
        let until = Instant::now() + self.stress_window;
        if lane.stress_until.map_or(true, |current| current < until) {
            lane.stress_until = Some(until);
        }
        warn!(?class, %kind, window_ms = self.stress_window.as_millis() as u64, "stress window opened");
    }

    #[cfg(test)]
    async fn stress_remaining(&self, class: CallClass) -> Option<Duration> {
        let lanes = self.lanes.lock().await;
        lanes[class.index()]
            .stress_until
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    fn backoff_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.backoff_initial,
            max_interval: self.backoff_max,
            max_elapsed_time: Some(self.backoff_elapsed),
            ..Default::default()
        }
    }

    /// Run a paced call, retrying generically-retryable failures with backoff
    ///
    /// Non-retryable kinds are returned on the first failure so the caller's
    /// escalation logic can act on them.
    pub async fn call<T, F, Fut>(&self, class: CallClass, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry(self.backoff_policy(), || {
            let fut = op();
            async move {
                self.pace(class).await;
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        let kind = e.kind();
                        self.observe_failure(class, kind).await;
                        if kind.policy().retry_generic {
                            debug!(?class, %kind, "transient failure: {}", e);
                            Err(backoff::Error::transient(e))
                        } else {
                            Err(backoff::Error::permanent(e))
                        }
                    }
                }
            }
        })
        .await
    }

    /// Run a paced call once, without retry (used for sends)
    pub async fn call_once<T, Fut>(&self, class: CallClass, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.pace(class).await;
        let result = fut.await;
        if let Err(e) = &result {
            self.observe_failure(class, e.kind()).await;
        }
        result
    }
}
