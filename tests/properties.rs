use proptest::prelude::*;

use tag_classifier::TagPredictor;
use tag_classifier::classification::keywords::DEFAULT_CATEGORIES;
use tag_classifier::classification::{is_test_marker, score};
use tag_classifier::classification::common_words::is_common;
use tag_classifier::config::AiSettings;
use tag_classifier::learning::{DynamicWeightCalculator, UsageTracker};
use tag_classifier::predictor::PredictionCache;
use tag_classifier::predictor::CacheKey;

fn predictor() -> TagPredictor {
    TagPredictor::builder()
        .settings(AiSettings {
            local_ai_disabled: true,
            ..AiSettings::default()
        })
        .build()
        .expect("predictor")
}

fn category() -> impl Strategy<Value = String> {
    prop::sample::select(DEFAULT_CATEGORIES.to_vec()).prop_map(|(name, _)| name.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn confidence_is_always_bounded(tag in "\\PC{0,80}", peers in prop::collection::vec("[a-z ]{0,12}", 0..4)) {
        let prediction = predictor().predict(&tag, &peers);
        prop_assert!((0.0..=1.0).contains(&prediction.confidence));
    }

    #[test]
    fn common_words_never_score(keyword in "[a-z]{1,12}") {
        for word in ["the", "a", "and", "of"] {
            prop_assert!(is_common(word));
            prop_assert_eq!(score(word, &keyword), 0);
            prop_assert_eq!(score(&keyword, word), 0);
        }
    }

    #[test]
    fn learning_dominates_after_three_corrections(
        tag in "[a-z]{3,10}( [a-z]{3,10})?",
        target in category(),
    ) {
        prop_assume!(!is_test_marker(&tag));
        let predictor = predictor();
        for _ in 0..3 {
            predictor.record_prediction_result(&tag, "", Some(target.as_str()), &[]);
        }
        prop_assert_eq!(predictor.predict(&tag, &[]).category, target);
    }

    #[test]
    fn dynamic_weight_is_clamped(
        uses in 0usize..80,
        category in category(),
        peers in prop::collection::vec("[a-z]{1,6}", 0..4),
    ) {
        let tracker = std::sync::Arc::new(UsageTracker::in_memory());
        for _ in 0..uses {
            tracker.record("hat", Some(category.as_str()), &peers);
        }
        let weights = DynamicWeightCalculator::new(tracker);
        let weight = weights.weight("hat", &category, &peers);
        prop_assert!((0.1..=2.0).contains(&weight));
    }

    #[test]
    fn prediction_cache_is_bounded_fifo(capacity in 1usize..8, inserts in 0usize..30) {
        let mut cache = PredictionCache::new(capacity);
        for i in 0..inserts {
            cache.insert(CacheKey::new(&format!("tag{i}"), &[], 0.5, 3), i);
            prop_assert!(cache.len() <= capacity);
        }
        let kept: Vec<String> = cache.keys().map(|key| key.tag().to_string()).collect();
        let expected: Vec<String> = (inserts.saturating_sub(capacity)..inserts)
            .map(|i| format!("tag{i}"))
            .collect();
        prop_assert_eq!(kept, expected);
    }

    #[test]
    fn test_markers_never_recorded(
        prefix in "[a-z]{0,5}",
        marker in prop::sample::select(vec!["test", "テスト", "サンプル", "sample", "デモ", "demo", "example", "例"]),
    ) {
        let tracker = UsageTracker::in_memory();
        let tag = format!("{prefix}{marker}");
        prop_assert!(!tracker.record(&tag, Some("服装・衣装"), &[]));
        prop_assert_eq!(tracker.frequency(&tag), 0);
        prop_assert!(tracker.is_empty());
    }
}
