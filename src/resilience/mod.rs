//! Resilience layer - pacing, backoff, classification and shared risk state
//!
//! Every network call made by the exchange client and the pipeline stages
//! goes through this layer:
//! - `classify` - closed error taxonomy and its policy table
//! - `throttle` - per call-class gaps and stress windows
//! - `poll` - timeout-bounded polling for confirmations and balance waits
//! - `registry` - router cooldowns, urgent signals, force flags, mint locks

pub mod classify;
pub mod poll;
pub mod registry;
pub mod throttle;

pub use classify::{classify_message, classify_onchain, ErrorKind, ErrorPolicy, Escalation};
pub use poll::{poll_until, Check, PollOutcome, PollSpec};
pub use registry::{ExternalFlag, MintGuard, RiskRegistry, UrgentSignal};
pub use throttle::{CallClass, ResilienceState};
