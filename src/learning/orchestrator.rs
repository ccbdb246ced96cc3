//! 分類リクエストごとの状態機械。
//!
//! 類似の検証済みパターンがあれば参照モード（分類器1回）、無ければ一括モード
//! （合意形成して保存）、合意に至らなければプラットフォーム既定のフォールバックを返す。
//! 返却するパスには常に一貫性レベルに応じた深さ制御をかける。
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::consensus::{ConsensusBuilder, ConsensusError, ConsensusRequest, ConsensusSettings};
use super::model::{PatternMatch, VerifiedPattern};
use super::prompt::PromptBuilder;
use super::response;
use super::signature::{ContentMetadata, SignatureGenerator};
use super::store::{StoreStats, VerifiedPatternStore};
use crate::clients::{Classifier, ClassifierError};
use crate::observability::metrics::Metrics;
use crate::taxonomy::{
    CategoryPath, CategoryRecommendation, ConsistencyLevel, PathNormalizer, PopularCategory,
    StateError, TaxonomyStateFiles, apply_depth_policy,
};
use crate::util::keyed_lock::KeyedLocks;

/// Confidence reported for platform-default classifications.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Similarity reported when a signature was learned while waiting on it.
const EXACT_MATCH_SIMILARITY: f64 = 1.0;

/// Usage stats are written after this many new normalizations.
pub const USAGE_FLUSH_INTERVAL: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorSettings {
    pub self_learning: bool,
    pub similarity_threshold: f64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            self_learning: false,
            similarity_threshold: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    Referenced,
    Verified,
    Fallback,
    Direct,
}

impl ClassificationSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Referenced => "referenced",
            Self::Verified => "verified",
            Self::Fallback => "fallback",
            Self::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceInfo {
    pub signature: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub request_id: Uuid,
    pub platform: String,
    pub signature: String,
    pub category: CategoryPath,
    pub keywords: Vec<String>,
    pub hashtags: Vec<String>,
    pub summary: String,
    pub confidence: f64,
    pub source: ClassificationSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency_level: Option<ConsistencyLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_ratio: Option<f64>,
    /// 新規に検証したパターンがディスクへ書き込めたか。`verified` のときだけ付く。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted: Option<bool>,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("platform {0:?} has no registered categories to fall back on")]
    NoCategories(String),
}

struct RequestContext<'a> {
    request_id: Uuid,
    metadata: &'a ContentMetadata,
    platform: String,
    signature: String,
}

/// Everything a finished branch knows before the depth policy is applied.
struct Outcome {
    path: CategoryPath,
    consistency_level: Option<ConsistencyLevel>,
    confidence: f64,
    keywords: Vec<String>,
    hashtags: Vec<String>,
    summary: String,
    reference: Option<ReferenceInfo>,
    vote_ratio: Option<f64>,
    persisted: Option<bool>,
}

impl Outcome {
    fn from_pattern(pattern: &VerifiedPattern) -> Self {
        let example = pattern.examples.first();
        Self {
            path: pattern.verified_category.clone(),
            consistency_level: pattern.consistency_level(),
            confidence: pattern.confidence,
            keywords: example.map(|e| e.keywords.clone()).unwrap_or_default(),
            hashtags: example.map(|e| e.hashtags.clone()).unwrap_or_default(),
            summary: example.map(|e| e.summary.clone()).unwrap_or_default(),
            reference: None,
            vote_ratio: Some(pattern.vote_ratio),
            persisted: None,
        }
    }
}

pub struct ClassificationOrchestrator {
    generator: SignatureGenerator,
    classifier: Arc<dyn Classifier>,
    normalizer: Arc<PathNormalizer>,
    store: Arc<VerifiedPatternStore>,
    consensus: ConsensusBuilder,
    prompts: PromptBuilder,
    settings: OrchestratorSettings,
    metrics: Arc<Metrics>,
    in_flight: KeyedLocks,
    state: Arc<TaxonomyStateFiles>,
    usage_flushed_at: AtomicU64,
}

impl ClassificationOrchestrator {
    #[must_use]
    pub fn new(
        classifier: Arc<dyn Classifier>,
        normalizer: Arc<PathNormalizer>,
        store: Arc<VerifiedPatternStore>,
        consensus_settings: ConsensusSettings,
        settings: OrchestratorSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        let consensus = ConsensusBuilder::new(
            Arc::clone(&classifier),
            Arc::clone(&normalizer),
            consensus_settings,
            Arc::clone(&metrics),
        );
        let prompts = PromptBuilder::new(Arc::clone(normalizer.registry()));
        Self {
            generator: SignatureGenerator::default(),
            classifier,
            normalizer,
            store,
            consensus,
            prompts,
            settings,
            metrics,
            in_flight: KeyedLocks::default(),
            state: Arc::new(TaxonomyStateFiles::disabled()),
            usage_flushed_at: AtomicU64::new(0),
        }
    }

    /// 学習済み同義語と使用統計の保存先を設定する。
    #[must_use]
    pub fn with_state_files(self, state: Arc<TaxonomyStateFiles>) -> Self {
        let usage_flushed_at = AtomicU64::new(self.normalizer.usage_total());
        Self {
            state,
            usage_flushed_at,
            ..self
        }
    }

    #[must_use]
    pub fn with_signature_generator(mut self, generator: SignatureGenerator) -> Self {
        self.generator = generator;
        self
    }

    #[must_use]
    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    #[must_use]
    pub fn store(&self) -> &Arc<VerifiedPatternStore> {
        &self.store
    }

    /// コンテンツを分類する。
    ///
    /// 一致なし・合意なしでもエラーにはならず、`source` と `confidence` 付きの結果を返す。
    ///
    /// # Errors
    /// 参照モード／直接モードで分類器呼び出しが失敗した場合、またはフォールバック先の
    /// 大カテゴリが存在しない場合。
    #[instrument(skip_all, fields(platform = %metadata.platform))]
    pub async fn classify(
        &self,
        metadata: &ContentMetadata,
    ) -> Result<ClassificationResult, ClassifyError> {
        let timer = self.metrics.classify_duration.start_timer();
        let signature = self.generator.generate(metadata);
        let context = RequestContext {
            request_id: Uuid::now_v7(),
            metadata,
            platform: signature.platform().to_string(),
            signature: signature.to_string(),
        };

        let result = if !self.settings.self_learning {
            self.classify_direct(&context).await
        } else if let Some(reference) = self
            .store
            .find_similar(&signature, self.settings.similarity_threshold)
            .await
        {
            self.classify_referenced(&context, reference).await
        } else {
            self.classify_bulk(&context).await
        };

        timer.observe_duration();
        if result.is_ok() {
            self.flush_usage_if_due().await;
        }
        result
    }

    /// 自己学習の統計（機能フラグを含む）。
    pub async fn stats(&self) -> StoreStats {
        StoreStats {
            enabled: self.settings.self_learning,
            ..self.store.stats().await
        }
    }

    /// ユーザー修正から同義語を学習し、新しい規則ができたらすぐ保存する。
    ///
    /// Returns whether a rule was learned.
    ///
    /// # Errors
    /// 学習済み規則の保存に失敗した場合。規則はメモリ上では有効なまま。
    pub async fn learn_from_feedback(
        &self,
        original_path: &str,
        corrected_path: &str,
    ) -> Result<bool, StateError> {
        if !self
            .normalizer
            .learn_from_feedback(original_path, corrected_path)
        {
            return Ok(false);
        }
        self.state.save_learned(&self.normalizer).await?;
        Ok(true)
    }

    /// 使用回数の多いカテゴリ。
    #[must_use]
    pub fn popular_categories(&self, limit: usize) -> Vec<PopularCategory> {
        self.normalizer.popular_categories(limit)
    }

    /// キーワードと使用実績からカテゴリを推薦する。
    #[must_use]
    pub fn recommend_categories<S: AsRef<str>>(
        &self,
        keywords: &[S],
        limit: usize,
    ) -> Vec<CategoryRecommendation> {
        self.normalizer.recommend_categories(keywords, limit)
    }

    /// 学習済み同義語と使用統計を書き出す。
    ///
    /// # Errors
    /// どちらかの保存に失敗した場合。
    pub async fn flush_state(&self) -> Result<(), StateError> {
        self.state.save_learned(&self.normalizer).await?;
        self.save_usage().await
    }

    async fn flush_usage_if_due(&self) {
        let pending = self
            .normalizer
            .usage_total()
            .saturating_sub(self.usage_flushed_at.load(Ordering::Relaxed));
        if pending < USAGE_FLUSH_INTERVAL {
            return;
        }
        if let Err(error) = self.save_usage().await {
            warn!(error = %error, "failed to persist category usage stats");
        }
    }

    async fn save_usage(&self) -> Result<(), StateError> {
        let total = self.normalizer.usage_total();
        self.state.save_usage(&self.normalizer).await?;
        self.usage_flushed_at.fetch_max(total, Ordering::Relaxed);
        Ok(())
    }

    async fn classify_referenced(
        &self,
        context: &RequestContext<'_>,
        reference: PatternMatch,
    ) -> Result<ClassificationResult, ClassifyError> {
        info!(
            signature = %context.signature,
            reference = %reference.signature,
            similarity = reference.similarity,
            "reusing similar verified pattern"
        );
        let prompt = self.prompts.reference_prompt(context.metadata, &reference);
        let raw = self.invoke(&prompt, context).await?;
        let usage_count = self.store.touch(&reference.signature).await;

        let mut outcome = match response::analyze(&raw, &self.normalizer, &context.platform) {
            Ok(analysis) => Outcome {
                path: analysis.category_path,
                consistency_level: analysis.consistency_level,
                confidence: analysis.confidence,
                keywords: analysis.keywords,
                hashtags: analysis.hashtags,
                summary: analysis.summary,
                reference: None,
                vote_ratio: None,
                persisted: None,
            },
            Err(error) => {
                self.metrics.response_parse_failures.inc();
                warn!(
                    error = %error,
                    reference = %reference.signature,
                    "reference response unusable, returning the verified category"
                );
                Outcome {
                    vote_ratio: None,
                    ..Outcome::from_pattern(&reference.pattern)
                }
            }
        };
        outcome.reference = Some(ReferenceInfo {
            signature: reference.signature,
            similarity: reference.similarity,
        });
        info!(usage_count, "recorded verified pattern reuse");
        Ok(self.finish(context, ClassificationSource::Referenced, outcome))
    }

    #[allow(clippy::cast_precision_loss)]
    async fn classify_bulk(
        &self,
        context: &RequestContext<'_>,
    ) -> Result<ClassificationResult, ClassifyError> {
        let _guard = self.in_flight.lock(&context.signature).await;
        if let Some(pattern) = self.store.get(&context.signature).await {
            let reference = PatternMatch {
                signature: context.signature.clone(),
                pattern,
                similarity: EXACT_MATCH_SIMILARITY,
            };
            return self.classify_referenced(context, reference).await;
        }

        let request = ConsensusRequest {
            prompt: self.prompts.base_prompt(context.metadata),
            platform: context.platform.clone(),
            media: Arc::from(context.metadata.media.as_slice()),
        };
        match self.consensus.build_consensus(&request).await {
            Ok(pattern) => {
                let persisted = match self.store.put(&context.signature, pattern.clone()).await {
                    Ok(()) => true,
                    Err(error) => {
                        self.metrics.store_persist_failures.inc();
                        error!(
                            signature = %context.signature,
                            error = %error,
                            "verified pattern kept in memory but not persisted"
                        );
                        false
                    }
                };
                self.metrics
                    .verified_patterns
                    .set(self.store.len().await as f64);
                Ok(self.finish(
                    context,
                    ClassificationSource::Verified,
                    Outcome {
                        persisted: Some(persisted),
                        ..Outcome::from_pattern(&pattern)
                    },
                ))
            }
            Err(ConsensusError::InsufficientData { attempted }) => {
                warn!(
                    signature = %context.signature,
                    attempted,
                    "no consensus, falling back to platform default"
                );
                self.fallback(context)
            }
        }
    }

    async fn classify_direct(
        &self,
        context: &RequestContext<'_>,
    ) -> Result<ClassificationResult, ClassifyError> {
        let prompt = self.prompts.base_prompt(context.metadata);
        let raw = self.invoke(&prompt, context).await?;
        match response::analyze(&raw, &self.normalizer, &context.platform) {
            Ok(analysis) => Ok(self.finish(
                context,
                ClassificationSource::Direct,
                Outcome {
                    path: analysis.category_path,
                    consistency_level: analysis.consistency_level,
                    confidence: analysis.confidence,
                    keywords: analysis.keywords,
                    hashtags: analysis.hashtags,
                    summary: analysis.summary,
                    reference: None,
                    vote_ratio: None,
                    persisted: None,
                },
            )),
            Err(error) => {
                self.metrics.response_parse_failures.inc();
                warn!(error = %error, "direct response unusable, falling back to platform default");
                self.fallback(context)
            }
        }
    }

    fn fallback(&self, context: &RequestContext<'_>) -> Result<ClassificationResult, ClassifyError> {
        let path = self
            .normalizer
            .registry()
            .default_category(&context.platform)
            .and_then(|main| CategoryPath::from_parts([main]))
            .ok_or_else(|| ClassifyError::NoCategories(context.platform.clone()))?;
        Ok(self.finish(
            context,
            ClassificationSource::Fallback,
            Outcome {
                path,
                consistency_level: Some(ConsistencyLevel::Low),
                confidence: FALLBACK_CONFIDENCE,
                keywords: Vec::new(),
                hashtags: Vec::new(),
                summary: String::new(),
                reference: None,
                vote_ratio: None,
                persisted: None,
            },
        ))
    }

    async fn invoke(
        &self,
        prompt: &str,
        context: &RequestContext<'_>,
    ) -> Result<String, ClassifierError> {
        self.metrics.classifier_calls.inc();
        self.classifier
            .invoke(prompt, &context.metadata.media)
            .await
            .inspect_err(|error| {
                self.metrics.classifier_failures.inc();
                warn!(
                    signature = %context.signature,
                    kind = error.kind(),
                    error = %error,
                    "classifier call failed"
                );
            })
    }

    fn finish(
        &self,
        context: &RequestContext<'_>,
        source: ClassificationSource,
        outcome: Outcome,
    ) -> ClassificationResult {
        match source {
            ClassificationSource::Referenced => self.metrics.classifications_referenced.inc(),
            ClassificationSource::Verified => self.metrics.classifications_verified.inc(),
            ClassificationSource::Fallback => self.metrics.classifications_fallback.inc(),
            ClassificationSource::Direct => self.metrics.classifications_direct.inc(),
        }
        let category = apply_depth_policy(&outcome.path, outcome.consistency_level);
        info!(
            request_id = %context.request_id,
            signature = %context.signature,
            source = source.as_str(),
            full_path = %category,
            depth = category.depth(),
            confidence = outcome.confidence,
            "classification finished"
        );

        ClassificationResult {
            request_id: context.request_id,
            platform: context.platform.clone(),
            signature: context.signature.clone(),
            category,
            keywords: outcome.keywords,
            hashtags: outcome.hashtags,
            summary: outcome.summary,
            confidence: outcome.confidence,
            source,
            consistency_level: outcome.consistency_level,
            reference: outcome.reference,
            vote_ratio: outcome.vote_ratio,
            persisted: outcome.persisted,
        }
    }
}
