use std::{env, num::NonZeroUsize, path::PathBuf, time::Duration};

use thiserror::Error;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    self_learning_enabled: bool,
    similarity_threshold: f64,
    consensus_sample_size: NonZeroUsize,
    consensus_batch_size: NonZeroUsize,
    consensus_batch_delay: Duration,
    store_path: PathBuf,
    rules_path: Option<PathBuf>,
    learned_rules_path: PathBuf,
    usage_path: PathBuf,
    classifier_api_key: String,
    classifier_base_url: String,
    classifier_model: String,
    classifier_timeout: Duration,
    http_max_retries: usize,
    http_backoff_base_ms: u64,
    http_backoff_cap_ms: u64,
    otel_exporter_endpoint: Option<String>,
    otel_sampling_ratio: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から分類エンジンの設定値を読み込み、検証する。
    ///
    /// # Errors
    /// `CLASSIFIER_API_KEY` が未設定、もしくは各種値のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let classifier_api_key = env_var("CLASSIFIER_API_KEY")?;
        let self_learning_enabled = parse_bool("USE_SELF_LEARNING_CATEGORIES", false)?;
        let similarity_threshold = parse_ratio("CATEGORY_SIMILARITY_THRESHOLD", 0.4)?;
        let consensus_sample_size = parse_non_zero_usize("CONSENSUS_SAMPLE_SIZE", 20)?;
        let consensus_batch_size = parse_non_zero_usize("CONSENSUS_BATCH_SIZE", 5)?;
        let consensus_batch_delay = parse_duration_ms("CONSENSUS_BATCH_DELAY_MS", 1000)?;
        let store_path = PathBuf::from(
            env::var("CATEGORY_STORE_PATH")
                .unwrap_or_else(|_| "data/verified-categories.json".to_string()),
        );
        let rules_path = optional_var("CATEGORY_RULES_PATH").map(PathBuf::from);
        let learned_rules_path = PathBuf::from(
            env::var("CATEGORY_LEARNED_RULES_PATH")
                .unwrap_or_else(|_| "data/learned-synonyms.json".to_string()),
        );
        let usage_path = PathBuf::from(
            env::var("CATEGORY_USAGE_PATH")
                .unwrap_or_else(|_| "data/category-usage.json".to_string()),
        );
        let classifier_base_url = env::var("CLASSIFIER_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/".to_string());
        let classifier_model =
            env::var("CLASSIFIER_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());
        let classifier_timeout = parse_duration_ms("CLASSIFIER_TIMEOUT_MS", 60_000)?;
        let http_max_retries = parse_usize("HTTP_MAX_RETRIES", 3)?;
        let http_backoff_base_ms = parse_u64("HTTP_BACKOFF_BASE_MS", 250)?;
        let http_backoff_cap_ms = parse_u64("HTTP_BACKOFF_CAP_MS", 10_000)?;
        let otel_exporter_endpoint = optional_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        let otel_sampling_ratio = parse_ratio("OTEL_SAMPLING_RATIO", 1.0)?;

        Ok(Self {
            self_learning_enabled,
            similarity_threshold,
            consensus_sample_size,
            consensus_batch_size,
            consensus_batch_delay,
            store_path,
            rules_path,
            learned_rules_path,
            usage_path,
            classifier_api_key,
            classifier_base_url,
            classifier_model,
            classifier_timeout,
            http_max_retries,
            http_backoff_base_ms,
            http_backoff_cap_ms,
            otel_exporter_endpoint,
            otel_sampling_ratio,
        })
    }

    #[must_use]
    pub fn self_learning_enabled(&self) -> bool {
        self.self_learning_enabled
    }

    #[must_use]
    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    #[must_use]
    pub fn consensus_sample_size(&self) -> NonZeroUsize {
        self.consensus_sample_size
    }

    #[must_use]
    pub fn consensus_batch_size(&self) -> NonZeroUsize {
        self.consensus_batch_size
    }

    #[must_use]
    pub fn consensus_batch_delay(&self) -> Duration {
        self.consensus_batch_delay
    }

    #[must_use]
    pub fn store_path(&self) -> &std::path::Path {
        &self.store_path
    }

    #[must_use]
    pub fn rules_path(&self) -> Option<&std::path::Path> {
        self.rules_path.as_deref()
    }

    /// フィードバックから学習した同義語規則の保存先。
    #[must_use]
    pub fn learned_rules_path(&self) -> &std::path::Path {
        &self.learned_rules_path
    }

    #[must_use]
    pub fn usage_path(&self) -> &std::path::Path {
        &self.usage_path
    }

    #[must_use]
    pub fn classifier_api_key(&self) -> &str {
        &self.classifier_api_key
    }

    #[must_use]
    pub fn classifier_base_url(&self) -> &str {
        &self.classifier_base_url
    }

    #[must_use]
    pub fn classifier_model(&self) -> &str {
        &self.classifier_model
    }

    #[must_use]
    pub fn classifier_timeout(&self) -> Duration {
        self.classifier_timeout
    }

    #[must_use]
    pub fn http_max_retries(&self) -> usize {
        self.http_max_retries
    }

    #[must_use]
    pub fn http_backoff_base_ms(&self) -> u64 {
        self.http_backoff_base_ms
    }

    #[must_use]
    pub fn http_backoff_cap_ms(&self) -> u64 {
        self.http_backoff_cap_ms
    }

    #[must_use]
    pub fn otel_exporter_endpoint(&self) -> Option<&str> {
        self.otel_exporter_endpoint.as_deref()
    }

    #[must_use]
    pub fn otel_sampling_ratio(&self) -> f64 {
        self.otel_sampling_ratio
    }
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional_var(name: &'static str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let parsed = parse_usize(name, default)?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(parse_u64(name, default_ms)?))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_ratio(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("value must be between 0 and 1"),
        });
    }
    Ok(parsed)
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("invalid boolean value: {raw}"),
        }),
    }
}
