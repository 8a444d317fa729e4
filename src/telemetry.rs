//! Logging, tracing and metrics bootstrap.
//!
//! [`init`] installs a `tracing` subscriber printing to stdout, and, for each
//! configured OTLP endpoint, an OpenTelemetry provider exporting logs, spans
//! or metrics. When traces are exported the global tracer provider is set, so
//! [`crate::otel::OtelTracer::global`] reports request spans through it.

use doku::Document;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{
    ExporterBuildError, LogExporter, MetricExporter, SpanExporter, WithExportConfig,
};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::EnvFilter;

use crate::ServiceInfo;

/// Telemetry initialization errors
#[derive(Debug, Snafu)]
pub enum Error {
    /// The OTLP log exporter could not be built
    #[snafu(display("Could not initialize logging: {source}"))]
    InitLog {
        /// The exporter error
        source: ExporterBuildError,
    },

    /// The OTLP metric exporter could not be built
    #[snafu(display("Could not initialize metrics: {source}"))]
    InitMetric {
        /// The exporter error
        source: ExporterBuildError,
    },

    /// The OTLP span exporter could not be built
    #[snafu(display("Could not initialize tracing: {source}"))]
    InitTrace {
        /// The exporter error
        source: ExporterBuildError,
    },

    /// A global `tracing` subscriber was already installed
    #[snafu(display("Could not install the tracing subscriber: {source}"))]
    InitSubscriber {
        /// The subscriber error
        source: TryInitError,
    },
}

/// Metric export settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Document)]
pub struct MetricSettings {
    /// OTLP endpoint metrics are exported to. Disabled when absent.
    #[doku(example = "http://localhost:4318/v1/metrics")]
    pub endpoint: Option<String>,
}

/// Log output settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Document)]
pub struct LogSettings {
    /// `EnvFilter` directives for stdout.
    #[doku(example = "debug,xtrace=trace")]
    pub console_level: String,
    /// `EnvFilter` directives for logs exported over OTLP.
    #[doku(example = "warn,xtrace=debug")]
    pub otel_level: String,
    /// OTLP endpoint logs are exported to. Disabled when absent.
    #[doku(example = "http://localhost:4317")]
    pub endpoint: Option<String>,
}

/// Span export settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Document)]
pub struct TraceSettings {
    /// OTLP endpoint spans are exported to. Disabled when absent.
    #[doku(example = "http://localhost:4317")]
    pub endpoint: Option<String>,
}

/// Telemetry settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Document)]
pub struct TelemetrySettings {
    /// Traces
    pub trace: TraceSettings,
    /// Logs
    pub log: LogSettings,
    /// Metrics
    pub metric: MetricSettings,
}

/// Installed telemetry providers. Flushes and shuts them down when dropped.
pub struct Telemetry {
    meter_provider: Option<SdkMeterProvider>,
    tracer_provider: Option<SdkTracerProvider>,
    logger_provider: SdkLoggerProvider,
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(tracer_provider) = self.tracer_provider.take() {
            if let Err(err) = tracer_provider.shutdown() {
                eprintln!("Error shutting down Telemetry tracer provider: {err}");
            }
        }
        if let Some(meter_provider) = self.meter_provider.take() {
            if let Err(err) = meter_provider.shutdown() {
                eprintln!("Error shutting down Telemetry meter provider: {err}");
            }
        }
        if let Err(err) = self.logger_provider.shutdown() {
            eprintln!("Error shutting down Telemetry logger provider: {err}");
        }
    }
}

fn resource(service_info: &ServiceInfo) -> Resource {
    Resource::builder()
        .with_attributes([KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            service_info.name_in_metrics.clone(),
        )])
        .build()
}

fn init_traces(
    service_info: &ServiceInfo,
    settings: &TraceSettings,
) -> Result<Option<SdkTracerProvider>, ExporterBuildError> {
    let Some(endpoint) = &settings.endpoint else {
        return Ok(None);
    };

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(Some(
        SdkTracerProvider::builder()
            .with_resource(resource(service_info))
            .with_batch_exporter(exporter)
            .build(),
    ))
}

fn init_metrics(
    service_info: &ServiceInfo,
    settings: &MetricSettings,
) -> Result<Option<SdkMeterProvider>, ExporterBuildError> {
    let Some(endpoint) = &settings.endpoint else {
        return Ok(None);
    };

    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let reader = PeriodicReader::builder(exporter).build();

    Ok(Some(
        SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource(service_info))
            .build(),
    ))
}

fn init_logs(
    service_info: &ServiceInfo,
    settings: &LogSettings,
) -> Result<SdkLoggerProvider, ExporterBuildError> {
    let builder = SdkLoggerProvider::builder();

    let builder = match &settings.endpoint {
        Some(endpoint) => {
            let exporter = LogExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;

            builder
                .with_resource(resource(service_info))
                .with_batch_exporter(exporter)
        }
        None => builder,
    };

    Ok(builder.build())
}

// Events from the exporter stack itself must not be fed back into OTLP.
fn otel_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "{level},hyper=off,opentelemetry=off,tonic=off,h2=off,reqwest=off"
    ))
}

/// Installs the telemetry providers and the global `tracing` subscriber.
///
/// # Errors
/// - `InitLog`, `InitTrace`, `InitMetric` if an OTLP exporter cannot be built.
/// - `InitSubscriber` if a global subscriber is already installed.
pub fn init(service_info: &ServiceInfo, settings: &TelemetrySettings) -> Result<Telemetry, Error> {
    let logger_provider = init_logs(service_info, &settings.log).context(InitLogSnafu)?;
    let tracer_provider = init_traces(service_info, &settings.trace).context(InitTraceSnafu)?;
    let meter_provider = init_metrics(service_info, &settings.metric).context(InitMetricSnafu)?;

    let otel_log_layer = settings.log.endpoint.as_ref().map(|_| {
        OpenTelemetryTracingBridge::new(&logger_provider)
            .with_filter(otel_filter(&settings.log.otel_level))
    });

    let otel_trace_layer = tracer_provider.as_ref().map(|tracer_provider| {
        tracing_opentelemetry::layer()
            .with_tracer(tracer_provider.tracer(service_info.name_in_metrics.clone()))
    });

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(EnvFilter::new(&settings.log.console_level));

    tracing_subscriber::registry()
        .with(otel_log_layer)
        .with(otel_trace_layer)
        .with(fmt_layer)
        .try_init()
        .context(InitSubscriberSnafu)?;

    global::set_text_map_propagator(TraceContextPropagator::new());
    if let Some(tracer_provider) = &tracer_provider {
        global::set_tracer_provider(tracer_provider.clone());
    }
    if let Some(meter_provider) = &meter_provider {
        global::set_meter_provider(meter_provider.clone());
    }

    Ok(Telemetry {
        meter_provider,
        tracer_provider,
        logger_provider,
    })
}
