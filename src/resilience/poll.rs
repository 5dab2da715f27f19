//! Timeout-bounded polling shared by every wait site
//!
//! Confirmation polling, debit waits and credit waits all go through
//! [`poll_until`]. A wait never errors past its deadline; it reports
//! [`PollOutcome::TimedOut`] with the last observation instead.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Interval/timeout/jitter for one wait site
#[derive(Debug, Clone, Copy)]
pub struct PollSpec {
    pub interval: Duration,
    pub timeout: Duration,
    /// Fraction of the interval added as random jitter (0 disables)
    pub jitter: f64,
}

impl PollSpec {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            jitter: 0.2,
        }
    }

    pub fn from_millis(interval_ms: u64, timeout_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        )
    }

    fn next_delay(&self) -> Duration {
        if self.jitter <= 0.0 || self.interval.is_zero() {
            return self.interval;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter);
        self.interval.mul_f64(1.0 + extra)
    }
}

/// Result of a bounded wait
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// The check reported completion
    Ready(T),
    /// Deadline passed; carries the last observation if any
    TimedOut(Option<T>),
}

impl<T> PollOutcome<T> {
    /// Ready value, or the last observation on timeout
    pub fn into_last(self) -> Option<T> {
        match self {
            PollOutcome::Ready(v) => Some(v),
            PollOutcome::TimedOut(last) => last,
        }
    }
}

/// What a single check observed
#[derive(Debug, Clone, PartialEq)]
pub enum Check<T> {
    /// Condition met
    Done(T),
    /// Not yet; keep the observation as the best-effort result
    Pending(Option<T>),
}

/// Poll `check` every `spec.interval` until it returns `Check::Done` or
/// `spec.timeout` elapses. The check runs at least once.
pub async fn poll_until<T, F, Fut>(spec: PollSpec, mut check: F) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Check<T>>,
{
    let deadline = Instant::now() + spec.timeout;
    let mut last = None;

    loop {
        match check().await {
            Check::Done(value) => return PollOutcome::Ready(value),
            Check::Pending(observed) => {
                if observed.is_some() {
                    last = observed;
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return PollOutcome::TimedOut(last);
        }
        let delay = spec.next_delay().min(deadline - now);
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_ready_after_a_few_checks() {
        let calls = AtomicU32::new(0);
        let outcome = poll_until(PollSpec::from_millis(1, 500), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n >= 3 {
                    Check::Done(n)
                } else {
                    Check::Pending(Some(n))
                }
            }
        })
        .await;
        assert_eq!(outcome, PollOutcome::Ready(3));
    }

    #[tokio::test]
    async fn test_timeout_keeps_last_observation() {
        let outcome: PollOutcome<u32> = poll_until(PollSpec::from_millis(5, 30), || async {
            Check::Pending(Some(7))
        })
        .await;
        assert_eq!(outcome, PollOutcome::TimedOut(Some(7)));
        assert_eq!(outcome.into_last(), Some(7));
    }

    #[tokio::test]
    async fn test_zero_timeout_checks_once() {
        let calls = AtomicU32::new(0);
        let outcome: PollOutcome<()> = poll_until(PollSpec::from_millis(5, 0), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Check::Pending(None) }
        })
        .await;
        assert_eq!(outcome, PollOutcome::TimedOut(None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
