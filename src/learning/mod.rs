//! 利用履歴からの学習（使用頻度トラッカーと動的重み）。
pub mod tracker;
pub mod weights;

pub use tracker::{TagStatistics, TagUsage, UsageTracker};
pub use weights::DynamicWeightCalculator;
