//! Position management module

pub mod book;
pub mod model;
pub mod store;
pub mod valuation;

pub use book::{DailyStats, PositionBook};
pub use model::{Position, SIZE_EPSILON};
pub use store::{Holding, HoldingStore, JsonFileStore, MemoryStore};
pub use valuation::{NetEstimator, QuoteSample, Valuation};
