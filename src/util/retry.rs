//! モデル読み込みの再試行スケジュール。
//!
//! 初回失敗後、`step × n` 秒（既定 5/10/15 秒）の線形バックオフで最大 `max_retries` 回再試行する。
use std::time::Duration;

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRetryPolicy {
    /// 初回を除く最大再試行回数
    pub(crate) max_retries: usize,
    /// バックオフの単位
    pub(crate) step: Duration,
}

impl Default for LoadRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            step: Duration::from_secs(5),
        }
    }
}

impl LoadRetryPolicy {
    /// 新しい再試行設定を作成する。
    #[must_use]
    pub const fn new(max_retries: usize, step: Duration) -> Self {
        Self { max_retries, step }
    }

    /// 指定された試行回数の前に待機する時間。
    ///
    /// # Arguments
    /// * `attempt` - 試行回数（0から開始、0は初回）
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.step
            .saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
    }

    /// この試行回数が許可されているかどうか。
    #[must_use]
    pub const fn can_attempt(&self, attempt: usize) -> bool {
        attempt <= self.max_retries
    }

    /// すべての待機時間の合計。
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        (1..=self.max_retries)
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}
