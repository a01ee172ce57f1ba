//! Tracing subscriber and optional OpenTelemetry export.

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{LogFormat, TelemetrySection};

const SERVICE_NAME: &str = "inkworks";

/// Keeps the span exporter alive; call [`Telemetry::shutdown`] before exit so
/// buffered spans are flushed.
pub struct Telemetry {
    provider: Option<TracerProvider>,
}

/// Installs the global subscriber.
///
/// Logs go to stderr so that stdout carries only command output. The filter
/// comes from `RUST_LOG` and defaults to `info`.
pub fn init(config: &TelemetrySection) -> Result<Telemetry> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer().with_target(false).with_writer(std::io::stderr).boxed(),
    };

    let provider = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => Some(otlp_provider(endpoint)?),
        None => None,
    };
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(SERVICE_NAME)));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .with(otel_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(Telemetry { provider })
}

fn otlp_provider(endpoint: &str) -> Result<TracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .with_context(|| format!("Failed to build OTLP exporter for {endpoint}"))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]))
        .build();
    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}

impl Telemetry {
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("warning: failed to flush spans: {e}");
            }
        }
    }
}
