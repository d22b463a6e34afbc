//! # Telemetry Features
//!
//! Logs always go to the console through `tracing_subscriber::fmt`. Spans and
//! metrics can additionally be exported through OpenTelemetry.
//!
//! ## Feature matrix
//!
//! - `tracing`: Enables log output and OpenTelemetry spans.
//! - `metrics`: Enables OpenTelemetry metrics (request, id and error counters
//!   plus a request-duration histogram, all tagged with the id mode).
//! - `otlp`: Enables the OTLP/gRPC exporter. The endpoint is read from
//!   `OTLP_ENDPOINT` when set, otherwise from the standard
//!   `OTEL_EXPORTER_OTLP_*` variables.
//! - `stdout`: Enables the stdout exporter.
//!
//! ## Feature constraints
//!
//! - Exporters require using at least one of: `tracing` or `metrics`.
//! - Both `otlp` and `stdout` exporters can be enabled at the same time.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --features metrics,stdout
//! cargo run --features tracing,metrics,otlp
//! ```

// Disallow using `otlp` without `tracing` or `metrics`
#[cfg(all(feature = "otlp", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'tracing' or 'metrics' to be enabled.");

// Disallow using `stdout` without `tracing` or `metrics`
#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
use opentelemetry_otlp::{Protocol, WithExportConfig};
#[cfg(all(feature = "otlp", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;

// Metrics-specific imports
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

// Either
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

// Tracing-specific imports
#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every provider. Errors are printed because the
    /// subscriber may already be gone.
    pub fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder("leafid")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("leafid")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "otlp")]
fn otlp_endpoint() -> Option<String> {
    std::env::var("OTLP_ENDPOINT").ok().filter(|e| !e.is_empty())
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_timeout(std::time::Duration::from_secs(10))
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta);
        let exporter = match otlp_endpoint() {
            Some(endpoint) => exporter.with_endpoint(endpoint),
            None => exporter,
        }
        .build()
        .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_timeout(std::time::Duration::from_secs(10))
            .with_protocol(Protocol::Grpc);
        let exporter = match otlp_endpoint() {
            Some(endpoint) => exporter.with_endpoint(endpoint),
            None => exporter,
        }
        .build()
        .context("failed to build tracer exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();

        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
static REQUESTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static IDS_GENERATED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REQUEST_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = REQUESTS.set(
        meter
            .u64_counter("requests")
            .with_description("Total id requests")
            .build(),
    );

    let _ = IDS_GENERATED.set(
        meter
            .u64_counter("ids_generated")
            .with_description("Ids issued successfully")
            .build(),
    );

    let _ = ERRORS.set(
        meter
            .u64_counter("errors")
            .with_description("Requests answered with a failure result")
            .build(),
    );

    let _ = REQUEST_DURATION_MS.set(
        meter
            .f64_histogram("request_duration")
            .with_unit("ms")
            .with_description("Time spent issuing one id")
            .build(),
    );
}

#[cfg(feature = "metrics")]
fn mode_attr(mode: &'static str) -> [KeyValue; 1] {
    [KeyValue::new("mode", mode)]
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_requests(mode: &'static str) {
    if let Some(counter) = REQUESTS.get() {
        counter.add(1, &mode_attr(mode));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests(_mode: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_ids_generated(mode: &'static str) {
    if let Some(counter) = IDS_GENERATED.get() {
        counter.add(1, &mode_attr(mode));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_ids_generated(_mode: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_errors(mode: &'static str) {
    if let Some(counter) = ERRORS.get() {
        counter.add(1, &mode_attr(mode));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_errors(_mode: &'static str) {}

#[cfg(feature = "metrics")]
pub fn record_request_duration(mode: &'static str, duration_ms: f64) {
    if let Some(histogram) = REQUEST_DURATION_MS.get() {
        histogram.record(duration_ms, &mode_attr(mode));
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_request_duration(_mode: &'static str, _duration_ms: f64) {}
