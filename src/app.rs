use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::{
    clients::{Classifier, GeminiClassifier, GeminiConfig},
    config::Config,
    learning::{
        ClassificationOrchestrator, ConsensusSettings, OrchestratorSettings, VerifiedPatternStore,
    },
    observability::{Telemetry, tracing::TracingConfig},
    taxonomy::{
        CategoryRules, PathNormalizer, StaticCategoryRegistry, SynonymDictionary,
        TaxonomyStateFiles,
    },
    util::retry::RetryConfig,
};

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    normalizer: Arc<PathNormalizer>,
    store: Arc<VerifiedPatternStore>,
    orchestrator: Arc<ClassificationOrchestrator>,
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、共有レジストリを構築する。
    ///
    /// # Errors
    /// Telemetry の初期化、カテゴリルールの読み込み、HTTP クライアント構築が失敗した場合。
    pub async fn build(config: Config) -> Result<Self> {
        let telemetry = Telemetry::new(&tracing_config(&config))?;
        let classifier = Arc::new(GeminiClassifier::new(gemini_config(&config))?);
        Self::with_components(config, telemetry, classifier).await
    }

    /// 分類器とTelemetryを外から差し込んで構築する。
    ///
    /// # Errors
    /// カテゴリルールの読み込みまたは検証に失敗した場合。
    /// 学習済み同義語と使用統計のファイルが無い・壊れている場合は空で始める。
    pub async fn with_components(
        config: Config,
        telemetry: Telemetry,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let rules = CategoryRules::load_or_default(config.rules_path())
            .context("failed to load category rules")?;
        let registry = StaticCategoryRegistry::from_rules(&rules)
            .context("category rules are inconsistent")?;
        let state = Arc::new(TaxonomyStateFiles::new(
            config.learned_rules_path(),
            config.usage_path(),
        ));
        let mut synonyms = SynonymDictionary::from_groups(&rules.synonyms);
        synonyms.merge_learned(&state.load_learned().await);
        let normalizer = Arc::new(
            PathNormalizer::new(Arc::new(registry), synonyms)
                .with_usage_stats(state.load_usage().await),
        );
        let store = Arc::new(VerifiedPatternStore::load(config.store_path()).await);

        let metrics = telemetry.metrics();
        metrics.verified_patterns.set(gauge_value(store.len().await));

        let orchestrator = Arc::new(
            ClassificationOrchestrator::new(
                classifier,
                Arc::clone(&normalizer),
                Arc::clone(&store),
                consensus_settings(&config),
                orchestrator_settings(&config),
                metrics,
            )
            .with_state_files(state),
        );

        info!(
            self_learning = config.self_learning_enabled(),
            similarity_threshold = config.similarity_threshold(),
            sample_size = config.consensus_sample_size().get(),
            store_path = %config.store_path().display(),
            synonyms = normalizer.synonym_count(),
            usage_total = normalizer.usage_total(),
            "category consensus components initialized"
        );

        Ok(Self {
            config,
            telemetry,
            normalizer,
            store,
            orchestrator,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    #[must_use]
    pub fn normalizer(&self) -> Arc<PathNormalizer> {
        Arc::clone(&self.normalizer)
    }

    #[must_use]
    pub fn store(&self) -> Arc<VerifiedPatternStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn orchestrator(&self) -> Arc<ClassificationOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// ストア・学習済み同義語・使用統計をディスクへ書き出して終了する。
    ///
    /// # Errors
    /// いずれかの永続化に失敗した場合。
    pub async fn shutdown(&self) -> Result<()> {
        self.store
            .flush()
            .await
            .context("failed to flush verified pattern store on shutdown")?;
        self.orchestrator
            .flush_state()
            .await
            .context("failed to save taxonomy state on shutdown")?;
        info!(patterns = self.store.len().await, "category consensus shut down");
        Ok(())
    }
}

fn gemini_config(config: &Config) -> GeminiConfig {
    GeminiConfig {
        base_url: config.classifier_base_url().to_string(),
        api_key: config.classifier_api_key().to_string(),
        model: config.classifier_model().to_string(),
        timeout: config.classifier_timeout(),
        retry: RetryConfig::new(
            config.http_max_retries(),
            config.http_backoff_base_ms(),
            config.http_backoff_cap_ms(),
        ),
    }
}

fn tracing_config(config: &Config) -> TracingConfig {
    TracingConfig {
        otlp_endpoint: config.otel_exporter_endpoint().map(str::to_string),
        sampling_ratio: config.otel_sampling_ratio(),
    }
}

fn consensus_settings(config: &Config) -> ConsensusSettings {
    ConsensusSettings {
        sample_size: config.consensus_sample_size().get(),
        batch_size: config.consensus_batch_size(),
        inter_batch_delay: config.consensus_batch_delay(),
    }
}

fn orchestrator_settings(config: &Config) -> OrchestratorSettings {
    OrchestratorSettings {
        self_learning: config.self_learning_enabled(),
        similarity_threshold: config.similarity_threshold(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn gauge_value(patterns: usize) -> f64 {
    patterns as f64
}
