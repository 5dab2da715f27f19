//! Standard pipeline stages, in execution order

pub mod preflight;
pub mod urgent;
pub mod quote_edge;
pub mod fast_exit;
pub mod hard_stop;
pub mod profit_lock;
pub mod force_flags;
pub mod rebound;
pub mod fallback;

pub use fallback::FallbackSell;
pub use fast_exit::FastExit;
pub use force_flags::ForceFlagDecision;
pub use hard_stop::DynamicHardStop;
pub use preflight::Preflight;
pub use profit_lock::ProfitLock;
pub use quote_edge::{QuoteEdge, QUOTE_SHOCK_REASON};
pub use rebound::ReboundGate;
pub use urgent::UrgentIntake;
