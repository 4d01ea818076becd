//! Tracing subscriber and optional OTLP export.
//!
//! With an OTLP endpoint configured, spans go out through a batch exporter and
//! the execution metrics recorded by `lifecycle` through a periodic reader
//! installed as the global meter provider.

use std::time::Duration;

use anyhow::Context;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, ObservabilityConfig};

/// How often metrics are pushed to the collector.
const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Keeps the exporters alive; call [`Telemetry::shutdown`] before exit to
/// flush pending spans and metrics.
pub struct Telemetry {
    provider: Option<TracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    /// Flushes and stops the exporters, if any were installed.
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(err) = provider.shutdown() {
                warn!(error = %err, "Trace exporter shutdown failed");
            }
        }
        if let Some(meter_provider) = self.meter_provider {
            if let Err(err) = meter_provider.shutdown() {
                warn!(error = %err, "Metric exporter shutdown failed");
            }
        }
    }
}

/// Installs the global subscriber.
///
/// Filtering comes from `RUST_LOG` and defaults to `info`.
pub fn init(config: &ObservabilityConfig) -> anyhow::Result<Telemetry> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(false).boxed(),
    };

    let (provider, meter_provider) = match &config.otlp_endpoint {
        Some(endpoint) => (
            Some(tracer_provider(endpoint, &config.service_name)?),
            Some(meter_provider(endpoint, &config.service_name)?),
        ),
        None => (None, None),
    };
    if let Some(meter_provider) = &meter_provider {
        global::set_meter_provider(meter_provider.clone());
    }
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter)
        .try_init()
        .context("cannot install the tracing subscriber")?;

    Ok(Telemetry {
        provider,
        meter_provider,
    })
}

fn resource(service_name: &str) -> Resource {
    Resource::new(vec![KeyValue::new(
        "service.name",
        service_name.to_string(),
    )])
}

fn tracer_provider(endpoint: &str, service_name: &str) -> anyhow::Result<TracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .with_context(|| format!("cannot build the OTLP span exporter for '{endpoint}'"))?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource(service_name))
        .build())
}

fn meter_provider(endpoint: &str, service_name: &str) -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .with_context(|| format!("cannot build the OTLP metric exporter for '{endpoint}'"))?;

    let reader = PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(METRIC_EXPORT_INTERVAL)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource(service_name))
        .build())
}
