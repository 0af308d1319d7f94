//! 学習履歴・頻度・文脈類似度を合成した動的重み。
use std::sync::Arc;

use super::tracker::UsageTracker;

/// 重みの下限。
pub const MIN_WEIGHT: f64 = 0.1;
/// 重みの上限。
pub const MAX_WEIGHT: f64 = 2.0;
/// 学習ボーナスの上限。
pub const MAX_LEARNING_BONUS: f64 = 300.0;
/// 強化1回あたりの学習ボーナス。
pub const LEARNING_BONUS_PER_USE: f64 = 50.0;

/// 動的重み計算器。
#[derive(Debug, Clone)]
pub struct DynamicWeightCalculator {
    tracker: Arc<UsageTracker>,
}

impl DynamicWeightCalculator {
    #[must_use]
    pub fn new(tracker: Arc<UsageTracker>) -> Self {
        Self { tracker }
    }

    /// 最頻カテゴリが一致する場合の学習ボーナス `min(300, frequency × 50)`。
    #[must_use]
    pub fn learning_bonus(&self, tag: &str, category: &str) -> f64 {
        if self.tracker.most_common_category(tag).as_deref() != Some(category) {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let frequency = self.tracker.frequency(tag) as f64;
        (frequency * LEARNING_BONUS_PER_USE).min(MAX_LEARNING_BONUS)
    }

    /// タグとカテゴリに対する重み（[0.1, 2.0] にクランプ）。
    #[must_use]
    pub fn weight(&self, tag: &str, category: &str, peers: &[String]) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let frequency = self.tracker.frequency(tag) as f64;

        let mut weight = 1.0 + self.learning_bonus(tag, category);
        weight *= (1.0 - frequency * 0.01).max(0.5);

        if !peers.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            let mean = peers
                .iter()
                .map(|peer| self.tracker.context_similarity(tag, peer))
                .sum::<f64>()
                / peers.len() as f64;
            weight *= 1.0 + 0.5 * mean;
        }

        weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
    }
}
