pub mod history;
pub mod tracker;

pub use history::{HistorySample, RateHistory};
pub use tracker::RateTracker;
