use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use tag_classifier::classification::CategoryKeywords;
use tag_classifier::config::{AiSettings, EMBEDDING_CACHE_FILE};
use tag_classifier::embedding::{
    EmbeddingError, EmbeddingMode, ModelStatus, SentenceEncoder, encoder_loader,
};
use tag_classifier::predictor::PredictionPath;
use tag_classifier::similarity::SimilarityMethod;
use tag_classifier::util::retry::LoadRetryPolicy;
use tag_classifier::{TagPredictor, TagPredictorBuilder};

const WAIT: Duration = Duration::from_secs(5);

/// 髪・服・その他の3方向に振り分ける偽エンコーダ。
struct AxisEncoder;

impl SentenceEncoder for AxisEncoder {
    fn model_name(&self) -> &str {
        "axis-encoder"
    }

    fn dimension(&self) -> usize {
        3
    }

    fn encode(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                if text.contains("hair") {
                    vec![1.0, 0.0, 0.0]
                } else if text.contains("dress") || text.contains("skirt") {
                    vec![0.0, 1.0, 0.0]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect())
    }
}

/// 指定したタグを初めて推論するときに、ゲートが2回開くまで止まるエンコーダ。
struct GatedEncoder {
    gated_tag: &'static str,
    armed: AtomicBool,
    gate: Arc<Barrier>,
}

impl SentenceEncoder for GatedEncoder {
    fn model_name(&self) -> &str {
        "axis-encoder"
    }

    fn dimension(&self) -> usize {
        3
    }

    fn encode(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.iter().any(|text| text == self.gated_tag) && self.armed.swap(false, Ordering::SeqCst)
        {
            self.gate.wait();
            self.gate.wait();
        }
        AxisEncoder.encode(texts)
    }
}

fn keywords() -> CategoryKeywords {
    CategoryKeywords::from_map([
        ("髪型・髪色", vec!["long hair", "short hair", "ponytail"]),
        ("服装・衣装", vec!["dress", "skirt"]),
        ("背景・環境", vec!["forest"]),
    ])
}

fn neural_builder() -> TagPredictorBuilder {
    TagPredictor::builder()
        .settings(AiSettings::default())
        .keywords(keywords())
        .load_retry(LoadRetryPolicy::new(1, Duration::from_millis(1)))
        .encoder_loader(encoder_loader(|_, _| {
            Ok(Box::new(AxisEncoder) as Box<dyn SentenceEncoder>)
        }))
}

/// 読み込みがゲートで止まるビルダー。
fn gated_loader_builder(gate: Arc<Barrier>, embedding_wait_ms: u64) -> TagPredictorBuilder {
    TagPredictor::builder()
        .settings(AiSettings {
            embedding_wait_ms,
            ..AiSettings::default()
        })
        .keywords(keywords())
        .load_retry(LoadRetryPolicy::new(0, Duration::from_millis(1)))
        .encoder_loader(encoder_loader(move |_, _| {
            gate.wait();
            Ok(Box::new(AxisEncoder) as Box<dyn SentenceEncoder>)
        }))
}

fn ready_predictor() -> TagPredictor {
    let predictor = neural_builder().build().expect("predictor");
    assert!(predictor.wait_for_load(WAIT), "fake encoder should load");
    predictor
}

#[test]
fn neural_similarity_drives_unseen_tags() {
    let predictor = ready_predictor();

    let prediction = predictor.predict("messy hair", &[]);

    assert_eq!(prediction.category, "髪型・髪色");
    assert_eq!(prediction.details.path, PredictionPath::Embedding);
    assert_eq!(prediction.details.reason, "neural similarity");
    assert!((0.3..=0.95).contains(&prediction.confidence));
    let similar: Vec<&str> = prediction
        .details
        .similar_tags
        .iter()
        .map(|(tag, _)| tag.as_str())
        .collect();
    assert_eq!(similar, vec!["long hair", "short hair"]);
}

#[test]
fn learned_tags_skip_the_embedding_path() {
    let predictor = ready_predictor();
    predictor.record_prediction_result("messy hair", "髪型・髪色", Some("服装・衣装"), &[]);

    let prediction = predictor.predict("messy hair", &[]);

    assert_eq!(prediction.category, "服装・衣装");
    assert_eq!(prediction.details.path, PredictionPath::Keyword);
    assert!(prediction.details.learning_applied);
}

#[test]
fn neural_suggestions_use_embeddings() {
    let predictor = ready_predictor();

    let suggestions = predictor.suggest_similar("messy hair", 5);

    assert_eq!(suggestions.len(), 2);
    assert!(suggestions.iter().all(|(tag, _)| tag.ends_with("hair")));
    assert!(
        suggestions
            .iter()
            .all(|(_, similarity)| (*similarity - 1.0).abs() < 1e-6)
    );
}

#[test]
fn neural_similarity_between_tags() {
    let predictor = ready_predictor();

    let close = predictor.similarity("long hair", "short hair", SimilarityMethod::Cosine);
    let far = predictor.similarity("long hair", "dress", SimilarityMethod::Cosine);

    assert!((close - 1.0).abs() < 1e-6);
    assert!(far.abs() < 1e-6);
    assert!(
        (predictor.similarity("dress", "long hair", SimilarityMethod::Cosine) - far).abs() < 1e-6
    );
}

#[test]
fn failed_load_retries_then_degrades() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let predictor = TagPredictor::builder()
        .settings(AiSettings::default())
        .load_retry(LoadRetryPolicy::new(2, Duration::from_millis(1)))
        .encoder_loader(encoder_loader(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(EmbeddingError::LoadFailed("weights missing".to_string()))
        }))
        .build()
        .expect("predictor");

    assert!(!predictor.wait_for_load(WAIT));
    assert!(matches!(
        predictor.embedding_status(),
        Some(ModelStatus::Errored(_))
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(predictor.is_ready());
    assert_eq!(predictor.embedding_mode(), EmbeddingMode::HashFallback);

    let prediction = predictor.predict("long hair", &[]);
    assert_eq!(prediction.category, "髪型・髪色");
    assert!(prediction.details.reason.contains("neural unavailable"));
}

#[cfg(not(feature = "neural"))]
#[test]
fn missing_backend_settles_without_retries() {
    let predictor = TagPredictor::builder()
        .settings(AiSettings::default())
        .build()
        .expect("predictor");

    assert!(!predictor.wait_for_load(WAIT));
    assert!(matches!(
        predictor.embedding_status(),
        Some(ModelStatus::Errored(_))
    ));
    assert_eq!(predictor.suggest_similar("hair", 1).len(), 1);
}

#[test]
fn lightweight_mode_never_loads_a_model() {
    let predictor = TagPredictor::builder()
        .settings(AiSettings {
            use_lightweight_embeddings: true,
            ..AiSettings::default()
        })
        .encoder_loader(encoder_loader(|_, _| {
            Err(EmbeddingError::LoadFailed("must not be called".to_string()))
        }))
        .build()
        .expect("predictor");

    assert_eq!(predictor.embedding_status(), None);
    assert_eq!(predictor.embedding_mode(), EmbeddingMode::HashFallback);
    assert!(predictor.is_ready());

    let same = predictor.similarity("hat", "hat", SimilarityMethod::Cosine);
    assert!((same - 1.0).abs() < 1e-5);
}

#[test]
fn neural_vectors_are_persisted_with_model_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let predictor = neural_builder()
        .data_dir(dir.path())
        .build()
        .expect("predictor");
    assert!(predictor.wait_for_load(WAIT));

    let _ = predictor.predict("messy hair", &[]);
    predictor.flush();

    let raw = std::fs::read_to_string(dir.path().join(EMBEDDING_CACHE_FILE)).expect("cache file");
    assert!(raw.contains("axis-encoder"));
    assert!(raw.contains("messy hair"));
}

#[test]
fn neural_vectors_survive_restart_without_flush() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let predictor = neural_builder()
            .data_dir(dir.path())
            .cache_persist_interval(1)
            .build()
            .expect("predictor");
        assert!(predictor.wait_for_load(WAIT));
        let _ = predictor.predict("messy hair", &[]);
    }

    let raw = std::fs::read_to_string(dir.path().join(EMBEDDING_CACHE_FILE)).expect("cache file");
    assert!(raw.contains("axis-encoder"));
    assert!(raw.contains("messy hair"));
}

#[test]
fn low_confidence_neural_result_falls_back_to_keywords() {
    let predictor = ready_predictor();

    let strict = predictor.predict_with("messy hair", &[], 0.99, 3);
    let relaxed = predictor.predict_with("messy hair", &[], 0.5, 3);

    assert_eq!(strict.details.path, PredictionPath::Keyword);
    assert_eq!(strict.category, "髪型・髪色");
    assert_eq!(relaxed.details.path, PredictionPath::Embedding);
}

#[test]
fn prediction_waits_for_loading_model_when_configured() {
    let gate = Arc::new(Barrier::new(2));
    let predictor = gated_loader_builder(Arc::clone(&gate), 5_000)
        .build()
        .expect("predictor");
    assert_eq!(predictor.embedding_status(), Some(ModelStatus::Loading));

    let prediction = std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(50));
            gate.wait();
        });
        predictor.predict("messy hair", &[])
    });

    assert_eq!(prediction.details.path, PredictionPath::Embedding);
    assert_eq!(prediction.category, "髪型・髪色");
}

#[test]
fn loading_predictions_are_replaced_once_model_is_ready() {
    let gate = Arc::new(Barrier::new(2));
    let predictor = gated_loader_builder(Arc::clone(&gate), 0)
        .build()
        .expect("predictor");

    let during = predictor.predict("messy hair", &[]);
    assert_eq!(predictor.embedding_status(), Some(ModelStatus::Loading));
    assert_eq!(during.details.path, PredictionPath::Keyword);

    gate.wait();
    assert!(predictor.wait_for_load(WAIT));

    let after = predictor.predict("messy hair", &[]);
    assert_eq!(after.details.path, PredictionPath::Embedding);
}

#[test]
fn feedback_recorded_during_a_prediction_wins() {
    let gate = Arc::new(Barrier::new(2));
    let loader_gate = Arc::clone(&gate);
    let predictor = TagPredictor::builder()
        .settings(AiSettings::default())
        .keywords(keywords())
        .load_retry(LoadRetryPolicy::new(1, Duration::from_millis(1)))
        .encoder_loader(encoder_loader(move |_, _| {
            Ok(Box::new(GatedEncoder {
                gated_tag: "zzz hair",
                armed: AtomicBool::new(true),
                gate: Arc::clone(&loader_gate),
            }) as Box<dyn SentenceEncoder>)
        }))
        .build()
        .expect("predictor");
    assert!(predictor.wait_for_load(WAIT));

    let in_flight = std::thread::scope(|scope| {
        let handle = scope.spawn(|| predictor.predict("zzz hair", &[]));
        gate.wait();
        for _ in 0..3 {
            predictor.record_prediction_result("zzz hair", "髪型・髪色", Some("服装・衣装"), &[]);
        }
        gate.wait();
        handle.join().expect("prediction thread")
    });
    assert_eq!(in_flight.details.path, PredictionPath::Embedding);

    let next = predictor.predict("zzz hair", &[]);
    assert_eq!(next.category, "服装・衣装");
    assert_eq!(next.details.path, PredictionPath::Keyword);
}
