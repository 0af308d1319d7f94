//! タグのカテゴリ予測。
//!
//! 判定順序は次の通り。最初にしきい値を満たした経路の結果を返す。
//!
//! 1. カスタム規則によるカテゴリ上書き（確信度 1.0）
//! 2. ニューラル埋め込みによる類似タグ集計（学習履歴のないタグのみ）
//! 3. キーワード・文脈・動的重み・学習ボーナス・同義語による従来のスコアリング
//!
//! 結果は入力ごとに FIFO キャッシュへ保存し、フィードバック時に関係するエントリを捨てる。
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

pub mod cache;

pub use cache::{CacheKey, CacheStats, PredictionCache};

use crate::classification::scorer::best_score;
use crate::classification::{
    CategoryKeywords, CategoryPriorities, ContextAnalyzer, ContextBoostRule, UNCLASSIFIED,
    synonyms, validate_tag,
};
use crate::config::{
    AiSettings, CUSTOMIZATION_FILE, Config, EMBEDDING_CACHE_FILE, SIMILARITY_CACHE_FILE,
    USAGE_FILE,
};
use crate::customization::{CustomRule, CustomizationError, CustomizationStore, Customizations};
use crate::embedding::cache::DEFAULT_TTL_DAYS as EMBEDDING_TTL_DAYS;
use crate::embedding::{
    EmbeddingCache, EmbeddingMode, EmbeddingProvider, EncoderLoader, HashEmbedder, ModelStatus,
    default_loader,
};
use crate::learning::tracker::DEFAULT_SAVE_INTERVAL;
use crate::learning::{DynamicWeightCalculator, TagStatistics, UsageTracker};
use crate::observability::Metrics;
use crate::similarity::{
    DEFAULT_MAX_ENTRIES as SIMILARITY_MAX_ENTRIES, DEFAULT_TTL_DAYS as SIMILARITY_TTL_DAYS,
    SimilarityCache, SimilarityEngine, SimilarityMethod,
};
use crate::util::lru_store::DEFAULT_PERSIST_INTERVAL;
use crate::util::retry::LoadRetryPolicy;

/// `category_scores` に載せる既定の件数。
pub const DEFAULT_TOP_N: usize = 3;
/// 埋め込み経路で集める類似タグの最大数。
pub const SIMILAR_LIMIT: usize = 15;
/// 埋め込み経路で採用する類似度の下限。
pub const SIMILAR_THRESHOLD: f32 = 0.2;
/// 同義語経由のスコア係数。
pub const SYNONYM_FACTOR: f64 = 0.8;
/// 埋め込みが使えない場合に同義語へ付ける類似度。
pub const SYNONYM_SIMILARITY: f32 = 0.8;
/// 埋め込み経路の確信度の下限と上限。
pub const NEURAL_CONFIDENCE_RANGE: (f64, f64) = (0.3, 0.95);
/// 読み込み完了後のキャッシュ温めを待つ上限。
const WARM_UP_BOUND: Duration = Duration::from_secs(60);

/// どの経路で決まったか。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionPath {
    Invalid,
    Override,
    Embedding,
    Keyword,
}

/// 予測の詳細。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionDetails {
    pub reason: String,
    pub path: PredictionPath,
    /// スコア上位のカテゴリ（降順）
    pub category_scores: Vec<(String, f64)>,
    pub synonyms_found: Vec<String>,
    pub context_tags: Vec<String>,
    pub similar_tags: Vec<(String, f32)>,
    pub learning_applied: bool,
}

impl PredictionDetails {
    fn new(path: PredictionPath, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            path,
            category_scores: Vec::new(),
            synonyms_found: Vec::new(),
            context_tags: Vec::new(),
            similar_tags: Vec::new(),
            learning_applied: false,
        }
    }

    /// カテゴリのスコア。上位に含まれなければ `None`。
    #[must_use]
    pub fn score_for(&self, category: &str) -> Option<f64> {
        self.category_scores
            .iter()
            .find(|(name, _)| name == category)
            .map(|(_, score)| *score)
    }
}

/// 予測結果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub category: String,
    /// [0.0, 1.0]
    pub confidence: f64,
    pub details: PredictionDetails,
}

impl Prediction {
    fn invalid() -> Self {
        Self {
            category: UNCLASSIFIED.to_string(),
            confidence: 0.0,
            details: PredictionDetails::new(PredictionPath::Invalid, "invalid input"),
        }
    }
}

/// 従来経路で発火した仕組み。
#[derive(Debug, Clone, Copy, Default)]
struct Signals {
    keyword: bool,
    context: bool,
    synonym: bool,
    custom: bool,
    learning: bool,
}

impl Signals {
    fn describe(self) -> String {
        let parts: Vec<&str> = [
            (self.keyword, "keyword"),
            (self.context, "context"),
            (self.synonym, "synonym"),
            (self.custom, "custom rule"),
            (self.learning, "learning history"),
        ]
        .into_iter()
        .filter_map(|(fired, label)| fired.then_some(label))
        .collect();

        if parts.is_empty() {
            "no match".to_string()
        } else {
            parts.join(" + ")
        }
    }
}

/// タグ分類器。
#[derive(Debug)]
pub struct TagPredictor {
    keywords: CategoryKeywords,
    priorities: CategoryPriorities,
    context: ContextAnalyzer,
    tracker: Arc<UsageTracker>,
    weights: DynamicWeightCalculator,
    embeddings: Arc<EmbeddingProvider>,
    similarity: SimilarityEngine,
    customizations: RwLock<CustomizationStore>,
    cache: Mutex<PredictionCache<Prediction>>,
    /// 準備完了への遷移をキャッシュに反映済みか
    model_ready_seen: AtomicBool,
    default_threshold: f64,
    metrics: Arc<Metrics>,
}

impl TagPredictor {
    #[must_use]
    pub fn builder() -> TagPredictorBuilder {
        TagPredictorBuilder::default()
    }

    /// 設定ファイルと環境変数から構築する。
    ///
    /// # Errors
    /// 設定の読み込みやメトリクス登録に失敗した場合。
    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> Result<Self> {
        let settings = config
            .load_settings()
            .context("failed to load ai settings")?;
        Self::builder()
            .data_dir(config.data_dir())
            .settings(settings)
            .cache_capacity(config.prediction_cache_size())
            .usage_save_interval(config.usage_save_interval())
            .embedding_ttl_days(config.embedding_ttl_days())
            .similarity_ttl_days(config.similarity_ttl_days())
            .embedding_cache_max(config.embedding_cache_max())
            .similarity_cache_max(config.similarity_cache_max())
            .cache_persist_interval(config.cache_persist_interval())
            .metrics(metrics)
            .build()
    }

    /// 既定のしきい値と件数で予測する。
    #[must_use]
    pub fn predict(&self, tag: &str, peers: &[String]) -> Prediction {
        self.predict_with(tag, peers, self.default_threshold, DEFAULT_TOP_N)
    }

    /// タグのカテゴリを予測する。
    ///
    /// 不正な入力は `("未分類", 0.0)` を返し、キャッシュや学習データに触れない。
    #[must_use]
    pub fn predict_with(
        &self,
        tag: &str,
        peers: &[String],
        threshold: f64,
        top_n: usize,
    ) -> Prediction {
        let Ok(tag) = validate_tag(tag) else {
            self.metrics.predictions_invalid.inc();
            return Prediction::invalid();
        };
        let threshold = if threshold.is_nan() {
            self.default_threshold
        } else {
            threshold.clamp(0.0, 1.0)
        };
        let peers: Vec<String> = peers
            .iter()
            .filter_map(|peer| validate_tag(peer).ok())
            .filter(|peer| *peer != tag)
            .collect();

        self.drop_stale_on_model_ready();
        let key = CacheKey::new(&tag, &peers, threshold, top_n);
        let generation = {
            let mut cache = self.cache.lock();
            if let Some(cached) = cache.get(&key) {
                self.metrics.cache_hits.inc();
                return cached;
            }
            cache.generation()
        };
        self.metrics.cache_misses.inc();

        let timer = self.metrics.predict_duration.start_timer();
        let prediction = self.compute(&tag, &peers, threshold, top_n);
        timer.observe_duration();

        match prediction.details.path {
            PredictionPath::Override => self.metrics.predictions_override.inc(),
            PredictionPath::Embedding => self.metrics.predictions_embedding.inc(),
            PredictionPath::Keyword => self.metrics.predictions_keyword.inc(),
            PredictionPath::Invalid => self.metrics.predictions_invalid.inc(),
        }
        debug!(
            tag = %tag,
            category = %prediction.category,
            confidence = prediction.confidence,
            path = ?prediction.details.path,
            "prediction computed"
        );

        let mut cache = self.cache.lock();
        if !cache.insert_if_current(key, prediction.clone(), generation) {
            debug!(tag = %tag, "cache invalidated while computing; result not cached");
        }
        #[allow(clippy::cast_precision_loss)]
        let size = cache.len() as f64;
        self.metrics.prediction_cache_size.set(size);
        prediction
    }

    /// モデルが準備完了になって最初の呼び出しで、読み込み中に作られた結果を捨てる。
    fn drop_stale_on_model_ready(&self) {
        if self.model_ready_seen.load(Ordering::Acquire) || !self.embeddings.neural_ready() {
            return;
        }
        if !self.model_ready_seen.swap(true, Ordering::AcqRel) {
            info!("embedding model ready; clearing cached predictions");
            self.clear_cache();
        }
    }

    fn compute(&self, tag: &str, peers: &[String], threshold: f64, top_n: usize) -> Prediction {
        let synonyms = synonyms::expand(tag);
        let custom = self.customizations.read();

        if let Some((rule, category)) = custom.override_for(tag, &synonyms) {
            debug!(tag, rule = %rule.name, "custom override matched");
            let mut details = PredictionDetails::new(PredictionPath::Override, "custom rule override");
            details.category_scores = vec![(category.to_string(), 1.0)];
            details.context_tags = peers.to_vec();
            return Prediction {
                category: category.to_string(),
                confidence: 1.0,
                details,
            };
        }

        self.metrics
            .embedding_ready
            .set(if self.embeddings.neural_ready() { 1.0 } else { 0.0 });
        let neural_available = matches!(
            self.embeddings.neural_status(),
            Some(ModelStatus::Ready | ModelStatus::Loading)
        );
        if neural_available && self.tracker.frequency(tag) == 0 {
            if let Some(prediction) = self.embedding_path(tag, peers, threshold, top_n, &custom) {
                return prediction;
            }
        }

        self.traditional_path(tag, peers, &synonyms, top_n, &custom)
    }

    fn embedding_path(
        &self,
        tag: &str,
        peers: &[String],
        threshold: f64,
        top_n: usize,
        custom: &CustomizationStore,
    ) -> Option<Prediction> {
        let universe = self.universe(custom);
        let similar = match self
            .embeddings
            .find_similar(tag, &universe, SIMILAR_THRESHOLD, SIMILAR_LIMIT)
        {
            Ok(similar) => similar,
            Err(err) => {
                debug!(tag, error = %err, "embedding path skipped");
                return None;
            }
        };

        let mut accumulated: BTreeMap<String, f64> = BTreeMap::new();
        for (similar_tag, similarity) in &similar {
            let mut categories: BTreeSet<&str> = self
                .keywords
                .categories_containing(similar_tag)
                .into_iter()
                .collect();
            categories.extend(
                custom
                    .keyword_categories()
                    .filter(|category| custom.contains_keyword(category, similar_tag)),
            );
            for category in categories {
                *accumulated.entry(category.to_string()).or_default() += f64::from(*similarity);
            }
        }

        let total: f64 = accumulated.values().sum();
        if total <= 0.0 {
            return None;
        }
        let ranked = self.rank(accumulated.into_iter().collect());
        let (category, best) = ranked.first()?.clone();
        let (low, high) = NEURAL_CONFIDENCE_RANGE;
        let confidence = (best / total).clamp(low, high);
        if confidence < threshold {
            debug!(tag, confidence, threshold, "embedding result below threshold");
            return None;
        }

        let mut details = PredictionDetails::new(PredictionPath::Embedding, "neural similarity");
        details.category_scores = ranked.into_iter().take(top_n).collect();
        details.similar_tags = similar.into_iter().take(3).collect();
        details.context_tags = peers.to_vec();
        Some(Prediction {
            category,
            confidence,
            details,
        })
    }

    fn traditional_path(
        &self,
        tag: &str,
        peers: &[String],
        synonyms: &[String],
        top_n: usize,
        custom: &CustomizationStore,
    ) -> Prediction {
        let learned = self.tracker.most_common_category(tag);
        let mut categories: BTreeSet<&str> = self.keywords.categories().into_iter().collect();
        categories.extend(custom.keyword_categories());
        if let Some(learned) = learned.as_deref() {
            categories.insert(learned);
        }

        let mut synonyms_found: BTreeSet<&str> = BTreeSet::new();
        let mut scored: Vec<(String, f64, Signals)> = Vec::with_capacity(categories.len());
        for category in categories {
            let base: &[String] = self.keywords.get(category).unwrap_or_default();
            let keyword = f64::from(best_score(tag, base)).max(custom.keyword_score(tag, category));
            let context = f64::from(self.context.context_boost(tag, category, peers));
            let weight = self.weights.weight(tag, category, peers);
            let bonus = self.weights.learning_bonus(tag, category);

            let mut score = (keyword + context) * weight + bonus;
            let mut signals = Signals {
                keyword: keyword > 0.0,
                context: context > 0.0,
                learning: bonus > 0.0,
                ..Signals::default()
            };
            if let Some(factor) = custom.score_factor(tag, category) {
                score *= factor;
                signals.custom = true;
            }

            for synonym in synonyms {
                if !base.contains(synonym) && !custom.contains_keyword(category, synonym) {
                    continue;
                }
                synonyms_found.insert(synonym.as_str());
                let candidate = f64::from(best_score(synonym, base))
                    .max(custom.keyword_score(synonym, category))
                    * SYNONYM_FACTOR;
                if candidate > score {
                    score = candidate;
                    signals = Signals {
                        synonym: true,
                        ..Signals::default()
                    };
                }
            }
            scored.push((category.to_string(), score, signals));
        }

        let signals_by_category: BTreeMap<String, Signals> = scored
            .iter()
            .map(|(category, _, signals)| (category.clone(), *signals))
            .collect();
        let ranked = self.rank(
            scored
                .into_iter()
                .map(|(category, score, _)| (category, score))
                .collect(),
        );
        let total: f64 = ranked.iter().map(|(_, score)| score).sum();

        let (category, confidence, signals) = match ranked.first() {
            Some((category, best)) if *best > 0.0 && total > 0.0 => (
                category.clone(),
                (best / total).clamp(0.0, 1.0),
                signals_by_category
                    .get(category)
                    .copied()
                    .unwrap_or_default(),
            ),
            _ => (UNCLASSIFIED.to_string(), 0.0, Signals::default()),
        };

        let mut reason = signals.describe();
        if signals.learning {
            reason.push_str(" (learning bonus applied)");
        }
        if self.embeddings.neural_errored() {
            reason.push_str("; neural unavailable");
        }

        let mut details = PredictionDetails::new(PredictionPath::Keyword, reason);
        details.category_scores = ranked
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .take(top_n)
            .collect();
        details.synonyms_found = synonyms_found.into_iter().map(str::to_string).collect();
        details.context_tags = peers.to_vec();
        details.learning_applied = signals.learning;

        Prediction {
            category,
            confidence,
            details,
        }
    }

    /// スコア降順、同点は優先度、さらにカテゴリ名の順。
    fn rank(&self, mut scores: Vec<(String, f64)>) -> Vec<(String, f64)> {
        scores.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| self.priorities.get(&a.0).cmp(&self.priorities.get(&b.0)))
                .then_with(|| a.0.cmp(&b.0))
        });
        scores
    }

    /// 基本キーワードとカスタムキーワードの和集合。
    fn universe(&self, custom: &CustomizationStore) -> Vec<String> {
        let mut universe = self.keywords.universe();
        for category in custom.keyword_categories() {
            universe.extend(
                custom
                    .keywords(category)
                    .iter()
                    .map(|entry| entry.keyword.clone()),
            );
        }
        universe.sort_unstable();
        universe.dedup();
        universe
    }

    /// 類似タグの候補。埋め込みが使えなければ静的な同義語を類似度 0.8 で返す。
    #[must_use]
    pub fn suggest_similar(&self, tag: &str, limit: usize) -> Vec<(String, f32)> {
        let Ok(tag) = validate_tag(tag) else {
            return Vec::new();
        };
        if limit == 0 {
            return Vec::new();
        }

        if self.embeddings.neural_ready() {
            let universe = self.universe(&self.customizations.read());
            match self
                .embeddings
                .find_similar(&tag, &universe, SIMILAR_THRESHOLD, limit)
            {
                Ok(similar) if !similar.is_empty() => return similar,
                Ok(_) => {}
                Err(err) => debug!(tag = %tag, error = %err, "neural suggestion failed"),
            }
        }

        synonyms::expand(&tag)
            .into_iter()
            .take(limit)
            .map(|synonym| (synonym, SYNONYM_SIMILARITY))
            .collect()
    }

    /// 予測結果のフィードバック。正解カテゴリがあれば学習し、関係するキャッシュを捨てる。
    ///
    /// 学習した場合は `true`。
    pub fn record_prediction_result(
        &self,
        tag: &str,
        predicted: &str,
        actual: Option<&str>,
        peers: &[String],
    ) -> bool {
        let Ok(tag) = validate_tag(tag) else {
            return false;
        };
        self.metrics.feedback_total.inc();
        let Some(actual) = actual.map(str::trim).filter(|actual| !actual.is_empty()) else {
            debug!(tag = %tag, predicted, "feedback without actual category");
            return false;
        };

        let recorded = self.tracker.record(&tag, Some(actual), peers);
        if actual != predicted {
            self.metrics.corrections_total.inc();
            info!(tag = %tag, predicted, actual, "prediction corrected");
        }
        let mut cache = self.cache.lock();
        let dropped = cache.invalidate_tag(&tag);
        #[allow(clippy::cast_precision_loss)]
        let size = cache.len() as f64;
        self.metrics.prediction_cache_size.set(size);
        debug!(tag = %tag, dropped, "invalidated cached predictions");
        recorded
    }

    #[must_use]
    pub fn tag_statistics(&self, tag: &str) -> TagStatistics {
        self.tracker.statistics(tag)
    }

    /// 予測キャッシュを空にする。
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
        self.metrics.prediction_cache_size.set(0.0);
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// 埋め込みの方式が確定しているか。
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.embeddings.is_ready()
    }

    /// ニューラルモデルの読み込みを最大 `timeout` 待つ。
    pub fn wait_for_load(&self, timeout: Duration) -> bool {
        self.embeddings.wait_for_load(timeout)
    }

    #[must_use]
    pub fn embedding_status(&self) -> Option<ModelStatus> {
        self.embeddings.neural_status()
    }

    #[must_use]
    pub fn embedding_mode(&self) -> EmbeddingMode {
        self.embeddings.mode()
    }

    #[must_use]
    pub fn similarity(&self, tag1: &str, tag2: &str, method: SimilarityMethod) -> f32 {
        self.similarity.similarity(tag1, tag2, method)
    }

    #[must_use]
    pub fn default_threshold(&self) -> f64 {
        self.default_threshold
    }

    /// テスト用マーカーを含む学習データを消す。削除件数を返す。
    pub fn cleanup_test_tags(&self) -> usize {
        let removed = self.tracker.cleanup_test_tags();
        if removed > 0 {
            self.clear_cache();
        }
        removed
    }

    /// カスタムキーワードを追加する。
    ///
    /// # Errors
    /// キーワードが汎用語または不正な場合。
    pub fn add_custom_keyword(
        &self,
        category: &str,
        keyword: &str,
        weight: f64,
    ) -> Result<(), CustomizationError> {
        self.mutate_customizations(|store| store.add_keyword(category, keyword, weight))
    }

    pub fn remove_custom_keyword(&self, category: &str, keyword: &str) -> bool {
        self.mutate_customizations(|store| Ok::<_, CustomizationError>(store.remove_keyword(category, keyword)))
            .unwrap_or(false)
    }

    /// カスタム規則を追加する。
    ///
    /// # Errors
    /// 規則の内容が不正な場合。
    pub fn add_custom_rule(&self, rule: CustomRule) -> Result<(), CustomizationError> {
        self.mutate_customizations(|store| store.add_rule(rule))
    }

    pub fn remove_custom_rule(&self, name: &str) -> bool {
        self.mutate_customizations(|store| Ok::<_, CustomizationError>(store.remove_rule(name)))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn customizations(&self) -> Customizations {
        self.customizations.read().snapshot().clone()
    }

    fn mutate_customizations<T, F>(&self, mutate: F) -> Result<T, CustomizationError>
    where
        F: FnOnce(&mut CustomizationStore) -> Result<T, CustomizationError>,
    {
        let mut store = self.customizations.write();
        let outcome = mutate(&mut store)?;
        if let Err(err) = store.save() {
            error!(error = ?err, "failed to persist customizations");
        }
        drop(store);
        self.clear_cache();
        Ok(outcome)
    }

    /// 学習データとキャッシュをファイルへ書き出す。
    pub fn flush(&self) {
        self.tracker.flush();
        self.embeddings.flush();
        self.similarity.flush();
        if let Err(err) = self.customizations.read().save() {
            error!(error = ?err, "failed to persist customizations");
        }
    }
}

/// [`TagPredictor`] のビルダー。
pub struct TagPredictorBuilder {
    data_dir: Option<PathBuf>,
    settings: AiSettings,
    keywords: Option<CategoryKeywords>,
    priorities: Option<CategoryPriorities>,
    context_rules: Option<Vec<ContextBoostRule>>,
    cache_capacity: usize,
    usage_save_interval: u64,
    embedding_ttl_days: u64,
    similarity_ttl_days: u64,
    embedding_cache_max: Option<usize>,
    similarity_cache_max: Option<usize>,
    cache_persist_interval: usize,
    encoder_loader: Option<EncoderLoader>,
    load_retry: LoadRetryPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl Default for TagPredictorBuilder {
    fn default() -> Self {
        Self {
            data_dir: None,
            settings: AiSettings::default(),
            keywords: None,
            priorities: None,
            context_rules: None,
            cache_capacity: cache::DEFAULT_CAPACITY,
            usage_save_interval: DEFAULT_SAVE_INTERVAL,
            embedding_ttl_days: EMBEDDING_TTL_DAYS,
            similarity_ttl_days: SIMILARITY_TTL_DAYS,
            embedding_cache_max: None,
            similarity_cache_max: Some(SIMILARITY_MAX_ENTRIES),
            cache_persist_interval: DEFAULT_PERSIST_INTERVAL,
            encoder_loader: None,
            load_retry: LoadRetryPolicy::default(),
            metrics: None,
        }
    }
}

impl TagPredictorBuilder {
    /// 永続化先。未指定ならすべてメモリ上のみ。
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: AiSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 基本キーワードを差し替える。
    #[must_use]
    pub fn keywords(mut self, keywords: CategoryKeywords) -> Self {
        self.keywords = Some(keywords);
        self
    }

    #[must_use]
    pub fn priorities(mut self, priorities: CategoryPriorities) -> Self {
        self.priorities = Some(priorities);
        self
    }

    #[must_use]
    pub fn context_rules(mut self, rules: Vec<ContextBoostRule>) -> Self {
        self.context_rules = Some(rules);
        self
    }

    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn usage_save_interval(mut self, interval: u64) -> Self {
        self.usage_save_interval = interval;
        self
    }

    #[must_use]
    pub fn embedding_ttl_days(mut self, days: u64) -> Self {
        self.embedding_ttl_days = days;
        self
    }

    #[must_use]
    pub fn similarity_ttl_days(mut self, days: u64) -> Self {
        self.similarity_ttl_days = days;
        self
    }

    #[must_use]
    pub fn embedding_cache_max(mut self, max: Option<usize>) -> Self {
        self.embedding_cache_max = max;
        self
    }

    /// `None` なら上限なし。
    #[must_use]
    pub fn similarity_cache_max(mut self, max: Option<usize>) -> Self {
        self.similarity_cache_max = max;
        self
    }

    /// 埋め込み・類似度キャッシュを何件登録するごとにファイルへ書き出すか。
    #[must_use]
    pub fn cache_persist_interval(mut self, interval: usize) -> Self {
        self.cache_persist_interval = interval;
        self
    }

    /// ニューラルエンコーダの生成方法を差し替える。
    #[must_use]
    pub fn encoder_loader(mut self, loader: EncoderLoader) -> Self {
        self.encoder_loader = Some(loader);
        self
    }

    #[must_use]
    pub fn load_retry(mut self, retry: LoadRetryPolicy) -> Self {
        self.load_retry = retry;
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 分類器を組み立て、必要ならニューラルモデルの読み込みを開始する。
    ///
    /// # Errors
    /// 設定値が不正、またはメトリクス登録に失敗した場合。
    pub fn build(self) -> Result<TagPredictor> {
        let settings = self.settings;
        settings.validate().context("invalid ai settings")?;

        let dir = self.data_dir.as_deref();
        let tracker = Arc::new(match dir {
            Some(dir) => UsageTracker::load(dir.join(USAGE_FILE), self.usage_save_interval),
            None => UsageTracker::in_memory(),
        });
        let embedding_cache = match dir {
            Some(dir) => EmbeddingCache::load(
                dir.join(EMBEDDING_CACHE_FILE),
                self.embedding_ttl_days,
                self.embedding_cache_max,
            ),
            None => EmbeddingCache::in_memory(self.embedding_ttl_days, self.embedding_cache_max),
        }
        .with_persist_interval(self.cache_persist_interval);
        let similarity_cache = match dir {
            Some(dir) => SimilarityCache::load(
                dir.join(SIMILARITY_CACHE_FILE),
                self.similarity_ttl_days,
                self.similarity_cache_max,
            ),
            None => SimilarityCache::in_memory(self.similarity_ttl_days, self.similarity_cache_max),
        }
        .with_persist_interval(self.cache_persist_interval);
        let customizations = match dir {
            Some(dir) => CustomizationStore::load(dir.join(CUSTOMIZATION_FILE)),
            None => CustomizationStore::in_memory(),
        };

        let keywords = self.keywords.unwrap_or_else(CategoryKeywords::default_keywords);
        let hash = HashEmbedder::new(settings.hash_dimension);
        let embeddings = if settings.wants_neural() {
            let spec = settings.model_spec().context("invalid model name")?.clone();
            EmbeddingProvider::with_neural(
                spec,
                hash,
                embedding_cache,
                Duration::from_millis(settings.embedding_wait_ms),
            )
        } else {
            info!(
                local_ai_disabled = settings.local_ai_disabled,
                lightweight = settings.use_lightweight_embeddings,
                "neural embeddings disabled; using hash fallback"
            );
            EmbeddingProvider::hash_only(hash, embedding_cache)
        };
        let embeddings = Arc::new(embeddings);
        if settings.wants_neural() {
            let loader = self.encoder_loader.unwrap_or_else(default_loader);
            embeddings.start_loading(loader, settings.device_options(), self.load_retry);
            embeddings.spawn_warm_up(keywords.universe(), WARM_UP_BOUND);
        }

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Metrics::standalone().context("failed to register metrics")?,
        };

        Ok(TagPredictor {
            keywords,
            priorities: self.priorities.unwrap_or_default(),
            context: self
                .context_rules
                .map_or_else(ContextAnalyzer::default, ContextAnalyzer::new),
            weights: DynamicWeightCalculator::new(Arc::clone(&tracker)),
            tracker,
            similarity: SimilarityEngine::new(Arc::clone(&embeddings), similarity_cache),
            embeddings,
            customizations: RwLock::new(customizations),
            cache: Mutex::new(PredictionCache::new(self.cache_capacity)),
            model_ready_seen: AtomicBool::new(false),
            default_threshold: settings.confidence_threshold,
            metrics,
        })
    }
}
