/// Prometheusメトリクス定義。
use std::sync::Arc;

use prometheus::{
    Counter, Gauge, Histogram, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};

const CONSENSUS_BUCKETS: &[f64] = &[1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0, 160.0];

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // 分類の出所別カウンター
    pub classifications_referenced: Counter,
    pub classifications_verified: Counter,
    pub classifications_fallback: Counter,
    pub classifications_direct: Counter,

    pub classifier_calls: Counter,
    pub classifier_failures: Counter,
    pub consensus_runs: Counter,
    pub consensus_insufficient: Counter,
    pub response_parse_failures: Counter,
    pub store_persist_failures: Counter,

    // ヒストグラム
    pub consensus_duration: Histogram,
    pub classify_duration: Histogram,

    // ゲージ
    pub verified_patterns: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを `registry` に登録して作成する。
    ///
    /// # Errors
    /// 同名のコレクターが既に登録されている場合など。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            classifications_referenced: register_counter_with_registry!(
                "category_classifications_referenced_total",
                "Classifications answered by reusing a similar verified pattern",
                registry
            )?,
            classifications_verified: register_counter_with_registry!(
                "category_classifications_verified_total",
                "Classifications answered by a new consensus run",
                registry
            )?,
            classifications_fallback: register_counter_with_registry!(
                "category_classifications_fallback_total",
                "Classifications answered with the platform default category",
                registry
            )?,
            classifications_direct: register_counter_with_registry!(
                "category_classifications_direct_total",
                "Classifications answered by a single call with self-learning disabled",
                registry
            )?,
            classifier_calls: register_counter_with_registry!(
                "category_classifier_calls_total",
                "Total classifier invocations",
                registry
            )?,
            classifier_failures: register_counter_with_registry!(
                "category_classifier_failures_total",
                "Classifier invocations that returned an error",
                registry
            )?,
            consensus_runs: register_counter_with_registry!(
                "category_consensus_runs_total",
                "Consensus runs started",
                registry
            )?,
            consensus_insufficient: register_counter_with_registry!(
                "category_consensus_insufficient_total",
                "Consensus runs that ended without any valid result",
                registry
            )?,
            response_parse_failures: register_counter_with_registry!(
                "category_response_parse_failures_total",
                "Classifier responses discarded by parsing or normalization",
                registry
            )?,
            store_persist_failures: register_counter_with_registry!(
                "category_store_persist_failures_total",
                "Verified patterns that could not be written to disk",
                registry
            )?,
            consensus_duration: register_histogram_with_registry!(
                "category_consensus_duration_seconds",
                "Wall time of a consensus run",
                CONSENSUS_BUCKETS.to_vec(),
                registry
            )?,
            classify_duration: register_histogram_with_registry!(
                "category_classify_duration_seconds",
                "Wall time of a classify request",
                registry
            )?,
            verified_patterns: register_gauge_with_registry!(
                "category_verified_patterns",
                "Verified patterns currently held by the store",
                registry
            )?,
        })
    }
}
