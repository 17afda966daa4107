//! Logging, tracing and metrics setup.
//!
//! Installs a `tracing-subscriber` registry. With an OTLP endpoint,
//! spans, metrics and log records are also exported there; without one
//! only the fmt layer is installed.

pub mod item;
pub mod metrics;

use crate::error::{Error, Result};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Configuration for telemetry initialization.
pub struct TelemetryConfig {
    /// Optional OTLP endpoint (e.g. "http://localhost:4317").
    pub endpoint: Option<String>,
    /// The service name reported in telemetry signals.
    pub service_name: String,
}

/// Flushes and shuts down the OTel providers when dropped.
///
/// Hold it for as long as the process should export telemetry.
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl TelemetryGuard {
    /// Whether OTLP export is active.
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// Push buffered spans, metrics and log records to the collector.
    ///
    /// Every provider is flushed even when an earlier one fails; the
    /// failures are reported together.
    pub fn force_flush(&self) -> Result<()> {
        let failures: Vec<String> = [
            ("traces", self.tracer_provider.as_ref().map(|p| p.force_flush())),
            ("metrics", self.meter_provider.as_ref().map(|p| p.force_flush())),
            ("logs", self.logger_provider.as_ref().map(|p| p.force_flush())),
        ]
        .into_iter()
        .filter_map(|(signal, outcome)| match outcome {
            Some(Err(e)) => Some(format!("{signal}: {e}")),
            _ => None,
        })
        .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "telemetry flush failed ({})",
                failures.join(", ")
            )))
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let logs = self.logger_provider.take().map(|p| p.shutdown());
        let metrics = self.meter_provider.take().map(|p| p.shutdown());
        let traces = self.tracer_provider.take().map(|p| p.shutdown());

        // The subscriber may already be gone, so report on stderr.
        for (signal, outcome) in [("logs", logs), ("metrics", metrics), ("traces", traces)] {
            if let Some(Err(e)) = outcome {
                eprintln!("telemetry {signal} shutdown failed: {e}");
            }
        }
    }
}

/// Initialize the global subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`.
///
/// # Errors
///
/// Fails if an OTLP exporter cannot be built or a global subscriber is
/// already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(endpoint) = config.endpoint else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;
        return Ok(TelemetryGuard::default());
    };

    use opentelemetry::trace::TracerProvider as _;

    let resource = Resource::builder()
        .with_service_name(config.service_name)
        .build();
    let (tracer_provider, meter_provider, logger_provider) = otlp_providers(&endpoint, resource)?;

    let trace_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("orderq"));
    let log_layer =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(trace_layer)
        .with(log_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
        meter_provider: Some(meter_provider),
        logger_provider: Some(logger_provider),
    })
}

/// Build the three OTLP pipelines and register the meter provider globally.
fn otlp_providers(
    endpoint: &str,
    resource: Resource,
) -> Result<(SdkTracerProvider, SdkMeterProvider, SdkLoggerProvider)> {
    use opentelemetry_otlp::WithExportConfig as _;

    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::Other(format!("failed to create OTLP span exporter: {e}")))?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .with_resource(resource.clone())
        .build();

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::Other(format!("failed to create OTLP metric exporter: {e}")))?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .with_resource(resource.clone())
        .build();
    opentelemetry::global::set_meter_provider(meter_provider.clone());

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::Other(format!("failed to create OTLP log exporter: {e}")))?;
    let logger_provider = SdkLoggerProvider::builder()
        .with_batch_exporter(log_exporter)
        .with_resource(resource)
        .build();

    Ok((tracer_provider, meter_provider, logger_provider))
}
