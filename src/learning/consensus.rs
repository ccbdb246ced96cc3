//! 多数決による合意形成。
//!
//! 同じプロンプトで分類器を `sample_size` 回呼び出し（`batch_size` 件ずつ並行、
//! バッチ間に待機）、正規化後のフルパスで投票して検証済みパターンを作る。
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::model::{AnalysisResult, VerifiedPattern};
use super::response;
use crate::clients::{Classifier, MediaFrame};
use crate::observability::metrics::Metrics;
use crate::taxonomy::PathNormalizer;
use crate::util::batch::BatchPacer;

/// Winning results retained on a pattern.
pub const MAX_EXAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusSettings {
    pub sample_size: usize,
    pub batch_size: NonZeroUsize,
    pub inter_batch_delay: Duration,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            sample_size: 20,
            batch_size: NonZeroUsize::new(5).unwrap_or(NonZeroUsize::MIN),
            inter_batch_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsensusRequest {
    pub prompt: String,
    pub platform: String,
    pub media: Arc<[MediaFrame]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("no valid classifier result out of {attempted} attempts")]
    InsufficientData { attempted: usize },
}

pub struct ConsensusBuilder {
    classifier: Arc<dyn Classifier>,
    normalizer: Arc<PathNormalizer>,
    settings: ConsensusSettings,
    metrics: Arc<Metrics>,
}

impl ConsensusBuilder {
    #[must_use]
    pub fn new(
        classifier: Arc<dyn Classifier>,
        normalizer: Arc<PathNormalizer>,
        settings: ConsensusSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            classifier,
            normalizer,
            settings,
            metrics,
        }
    }

    #[must_use]
    pub fn settings(&self) -> ConsensusSettings {
        self.settings
    }

    /// 分類器を繰り返し呼び出し、多数決で検証済みパターンを作る。
    ///
    /// 個々の呼び出しの失敗・パース失敗・正規化失敗は無効票として捨てる。
    ///
    /// # Errors
    /// 有効な結果が1件も残らなかった場合は [`ConsensusError::InsufficientData`]。
    #[instrument(skip_all, fields(platform = %request.platform, sample_size = self.settings.sample_size))]
    pub async fn build_consensus(
        &self,
        request: &ConsensusRequest,
    ) -> Result<VerifiedPattern, ConsensusError> {
        self.metrics.consensus_runs.inc();
        let timer = self.metrics.consensus_duration.start_timer();

        let prompt: Arc<str> = Arc::from(request.prompt.as_str());
        let platform: Arc<str> = Arc::from(request.platform.as_str());
        let pacer = BatchPacer::new(self.settings.batch_size, self.settings.inter_batch_delay);

        let results = pacer
            .run(self.settings.sample_size, |index| {
                let classifier = Arc::clone(&self.classifier);
                let normalizer = Arc::clone(&self.normalizer);
                let metrics = Arc::clone(&self.metrics);
                let prompt = Arc::clone(&prompt);
                let platform = Arc::clone(&platform);
                let media = Arc::clone(&request.media);
                async move {
                    analyze_once(
                        index,
                        classifier.as_ref(),
                        &normalizer,
                        &metrics,
                        &prompt,
                        &platform,
                        &media,
                    )
                    .await
                }
            })
            .await;
        timer.observe_duration();

        let outcome = aggregate(results);
        match &outcome {
            Ok(pattern) => info!(
                full_path = %pattern.verified_category,
                total_votes = pattern.total_votes,
                analysis_count = pattern.analysis_count,
                vote_ratio = pattern.vote_ratio,
                confidence = pattern.confidence,
                "consensus reached"
            ),
            Err(error) => {
                self.metrics.consensus_insufficient.inc();
                warn!(error = %error, "consensus failed");
            }
        }
        outcome
    }
}

async fn analyze_once(
    index: usize,
    classifier: &dyn Classifier,
    normalizer: &PathNormalizer,
    metrics: &Metrics,
    prompt: &str,
    platform: &str,
    media: &[MediaFrame],
) -> Option<AnalysisResult> {
    metrics.classifier_calls.inc();
    let raw = match classifier.invoke(prompt, media).await {
        Ok(raw) => raw,
        Err(error) => {
            metrics.classifier_failures.inc();
            warn!(index, kind = error.kind(), error = %error, "classifier call failed");
            return None;
        }
    };
    match response::analyze(&raw, normalizer, platform) {
        Ok(result) => Some(result),
        Err(error) => {
            metrics.response_parse_failures.inc();
            debug!(index, error = %error, "discarding unusable classifier response");
            None
        }
    }
}

/// 呼び出し順に並んだ結果から多数決を取る。
///
/// 同票の場合は辞書順で最小のフルパスを採用する。信頼度は
/// `vote_ratio × 採用例（最大5件）の平均信頼度`。
///
/// # Errors
/// 有効な結果が無い場合は [`ConsensusError::InsufficientData`]。
#[allow(clippy::cast_precision_loss)]
pub fn aggregate(results: Vec<Option<AnalysisResult>>) -> Result<VerifiedPattern, ConsensusError> {
    let attempted = results.len();
    let valid: Vec<AnalysisResult> = results.into_iter().flatten().collect();

    let mut tally: FxHashMap<String, usize> = FxHashMap::default();
    for result in &valid {
        *tally.entry(result.category_path.full_path()).or_default() += 1;
    }
    let Some((winner, total_votes)) = tally
        .into_iter()
        .max_by(|(left_path, left_votes), (right_path, right_votes)| {
            left_votes
                .cmp(right_votes)
                .then_with(|| right_path.cmp(left_path))
        })
    else {
        return Err(ConsensusError::InsufficientData { attempted });
    };

    let examples: Vec<AnalysisResult> = valid
        .iter()
        .filter(|result| result.category_path.full_path() == winner)
        .take(MAX_EXAMPLES)
        .cloned()
        .collect();
    let Some(verified_category) = examples.first().map(|example| example.category_path.clone())
    else {
        return Err(ConsensusError::InsufficientData { attempted });
    };

    let average_confidence =
        examples.iter().map(|example| example.confidence).sum::<f64>() / examples.len() as f64;
    let vote_ratio = total_votes as f64 / valid.len() as f64;
    let now = Utc::now();

    Ok(VerifiedPattern {
        verified_category,
        analysis_count: valid.len(),
        total_votes,
        vote_ratio,
        confidence: (vote_ratio * average_confidence).clamp(0.0, 1.0),
        examples,
        created_at: now,
        last_used_at: now,
        usage_count: 0,
    })
}
