//! Sell-decision pipeline
//!
//! Each tick a [`PipelineContext`] is built per open position and passed
//! through the standard stages by the [`Orchestrator`]. The resulting
//! [`Decision`] is carried out by the [`DecisionExecutor`].

pub mod context;
pub mod executor;
pub mod orchestrator;
pub mod signals;
pub mod stages;

pub use context::{Decision, ExitReason, ExitRules, ForceFlags, HoldReason, PipelineContext};
pub use executor::{DecisionExecutor, ExecOutcome, HoldingStores};
pub use orchestrator::{HaltReason, Orchestrator, PipelineDeps, Stage, StageResult};
pub use signals::{
    FastExitCheck, GateIntensity, MomentumFastExit, NeutralGate, PriceHistory, ReboundPredictor,
    RollingReboundPredictor,
};
