//! Pluggable market signals consumed by the pipeline
//!
//! The fast-exit check, the gate intensity and the rebound predictor are
//! collaborators behind traits. Built-in implementations work off a rolling
//! price window per mint, fed by the quote stage.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::ExitConfig;
use crate::pipeline::context::PipelineContext;

/// Rolling window of timestamped samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<(i64, f64)>,
    window_ms: i64,
    max_samples: usize,
}

impl RollingWindow {
    pub fn new(window_ms: i64) -> Self {
        Self {
            samples: VecDeque::new(),
            window_ms,
            max_samples: 1000, // Prevent unbounded growth
        }
    }

    /// Add a sample taken at `at_ms`
    pub fn add(&mut self, at_ms: i64, value: f64) {
        self.samples.push_back((at_ms, value));
        self.prune(at_ms);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        while let Some((at, _)) = self.samples.front() {
            if *at < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Copy restricted to the last `window_ms` before the newest sample
    pub fn tail(&self, window_ms: i64) -> RollingWindow {
        let mut out = RollingWindow::new(window_ms);
        if let Some((newest, _)) = self.samples.back() {
            let cutoff = newest - window_ms;
            out.samples = self
                .samples
                .iter()
                .filter(|(at, _)| *at >= cutoff)
                .copied()
                .collect();
        }
        out
    }

    pub fn latest(&self) -> f64 {
        self.samples.back().map(|(_, v)| *v).unwrap_or(0.0)
    }

    pub fn min(&self) -> f64 {
        self.samples.iter().map(|(_, v)| *v).fold(f64::MAX, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.samples.iter().map(|(_, v)| *v).fold(f64::MIN, f64::max)
    }

    /// Rate of change per second between the last two samples
    pub fn recent_slope(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let (t0, v0) = self.samples[n - 2];
        let (t1, v1) = self.samples[n - 1];
        let secs = (t1 - t0) as f64 / 1000.0;
        if secs < 0.001 {
            return 0.0;
        }
        (v1 - v0) / secs
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Per-mint price windows (SOL per token)
pub struct PriceHistory {
    windows: DashMap<String, RollingWindow>,
    window_ms: i64,
}

impl PriceHistory {
    pub fn new(window_ms: i64) -> Self {
        Self {
            windows: DashMap::new(),
            window_ms,
        }
    }

    /// Window long enough for every built-in signal
    pub fn for_config(config: &ExitConfig) -> Self {
        Self::new(config.fast_exit_window_ms.max(config.rebound_window_ms))
    }

    pub fn record(&self, mint: &str, at_ms: i64, px: f64) {
        if px <= 0.0 {
            return;
        }
        self.windows
            .entry(mint.to_string())
            .or_insert_with(|| RollingWindow::new(self.window_ms))
            .add(at_ms, px);
    }

    /// Samples of the last `window_ms`
    pub fn window(&self, mint: &str, window_ms: i64) -> Option<RollingWindow> {
        self.windows.get(mint).map(|w| w.tail(window_ms))
    }

    pub fn forget(&self, mint: &str) {
        self.windows.remove(mint);
    }
}

/// Fast-exit trigger
#[derive(Debug, Clone, PartialEq)]
pub struct FastExitSignal {
    pub reason: String,
}

/// External fast-exit check; a hit produces an immediate full exit
pub trait FastExitCheck: Send + Sync {
    fn check(&self, ctx: &PipelineContext) -> Option<FastExitSignal>;
}

/// Market-stress intensity in 0..=1; tightens the dynamic hard stop
pub trait GateIntensity: Send + Sync {
    fn intensity(&self, ctx: &PipelineContext) -> f64;
}

/// Short-horizon rebound prediction used to defer soft exits
pub trait ReboundPredictor: Send + Sync {
    fn predicts_rebound(&self, ctx: &PipelineContext) -> bool;
}

/// Fires when the price falls `drop_pct` from its high inside the window
pub struct MomentumFastExit {
    history: Arc<PriceHistory>,
    drop_pct: f64,
    window_ms: i64,
    enabled: bool,
}

impl MomentumFastExit {
    pub fn new(history: Arc<PriceHistory>, config: &ExitConfig) -> Self {
        Self {
            history,
            drop_pct: config.fast_exit_drop_pct,
            window_ms: config.fast_exit_window_ms,
            enabled: config.fast_exit_enabled,
        }
    }
}

impl FastExitCheck for MomentumFastExit {
    fn check(&self, ctx: &PipelineContext) -> Option<FastExitSignal> {
        if !self.enabled || !ctx.valuation.known {
            return None;
        }
        let window = self.history.window(&ctx.mint, self.window_ms)?;
        if window.count() < 3 {
            return None;
        }
        let high = window.max();
        if high <= 0.0 {
            return None;
        }
        let drop = (high - window.latest()) / high * 100.0;
        (drop >= self.drop_pct).then(|| FastExitSignal {
            reason: format!("momentum_drop_{:.0}pct", drop),
        })
    }
}

/// No market stress information
pub struct NeutralGate;

impl GateIntensity for NeutralGate {
    fn intensity(&self, _ctx: &PipelineContext) -> f64 {
        0.0
    }
}

/// Predicts a rebound when the price has bounced off its window low and is
/// still rising
pub struct RollingReboundPredictor {
    history: Arc<PriceHistory>,
    window_ms: i64,
    bounce_pct: f64,
}

impl RollingReboundPredictor {
    pub fn new(history: Arc<PriceHistory>, config: &ExitConfig) -> Self {
        Self {
            history,
            window_ms: config.rebound_window_ms,
            bounce_pct: config.rebound_bounce_pct,
        }
    }
}

impl ReboundPredictor for RollingReboundPredictor {
    fn predicts_rebound(&self, ctx: &PipelineContext) -> bool {
        let Some(window) = self.history.window(&ctx.mint, self.window_ms) else {
            return false;
        };
        if window.count() < 3 {
            return false;
        }
        let low = window.min();
        if low <= 0.0 {
            return false;
        }
        let bounce = (window.latest() - low) / low * 100.0;
        bounce >= self.bounce_pct && window.recent_slope() > 0.0
    }
}
