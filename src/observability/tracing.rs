use anyhow::{Context, Error, Result};
use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracer, SdkTracerProvider},
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "category-consensus";

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// OTLPエクスポートの設定。
#[derive(Debug, Clone, PartialEq)]
pub struct TracingConfig {
    pub otlp_endpoint: Option<String>,
    pub sampling_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            sampling_ratio: 1.0,
        }
    }
}

/// Tracing サブスクライバを一度だけ初期化する。
///
/// `otlp_endpoint` が設定されていればOTLPエクスポーターを追加する。
/// エクスポーターの構築に失敗した場合はJSONログのみで続行する。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init(config: &TracingConfig) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).json();
        let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

        let Some(endpoint) = config.otlp_endpoint.as_deref() else {
            registry.try_init().map_err(|e| Error::msg(e.to_string()))?;
            info!(otel_enabled = false, "standard tracing initialized");
            return Ok::<(), Error>(());
        };

        match init_tracer(endpoint, config.sampling_ratio) {
            Ok(tracer) => {
                registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .try_init()
                    .map_err(|e| Error::msg(e.to_string()))?;
                info!(otel_enabled = true, endpoint = %endpoint, "tracing initialized with OpenTelemetry");
            }
            Err(e) => {
                registry.try_init().map_err(|e| Error::msg(e.to_string()))?;
                info!(otel_enabled = false, error = %e, "tracing initialized without OpenTelemetry (init failed)");
            }
        }
        Ok(())
    })?;
    Ok(())
}

/// OTLPエクスポーター経由でトレーサーを作る。
fn init_tracer(endpoint: &str, sampling_ratio: f64) -> Result<SdkTracer> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer(SERVICE_NAME);
    global::set_tracer_provider(tracer_provider);
    Ok(tracer)
}
