use chrono::Utc;

/// 現在時刻（UNIX秒）。
#[must_use]
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// 日数を秒数に換算する。`i64` に収まらない値は `i64::MAX` に丸める。
#[must_use]
pub const fn days_to_secs(days: u64) -> i64 {
    let secs = days.saturating_mul(SECS_PER_DAY);
    if secs > i64::MAX as u64 {
        i64::MAX
    } else {
        secs as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn days_to_secs_converts_whole_days() {
        assert_eq!(days_to_secs(0), 0);
        assert_eq!(days_to_secs(1), 86_400);
        assert_eq!(days_to_secs(30), 2_592_000);
    }

    #[test]
    fn days_to_secs_saturates() {
        assert_eq!(days_to_secs(u64::MAX), i64::MAX);
        assert_eq!(days_to_secs(u64::MAX / SECS_PER_DAY), i64::MAX);
    }

    #[test]
    fn unix_now_is_after_2024() {
        assert!(unix_now() > 1_704_067_200);
    }
}
