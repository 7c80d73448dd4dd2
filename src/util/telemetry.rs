use std::time::Duration;

use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::util::env::Settings;

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

/// Console logging, plus OTLP export of traces, logs and metrics when a collector is configured.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub service_name: String,
    log_filter: String,
    exporters: Option<Exporters>,
}

#[derive(Debug, Clone)]
struct Exporters {
    logger_provider: SdkLoggerProvider,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    pub fn new(settings: &Settings) -> Result<Telemetry> {
        let exporters = match settings.collector_endpoint() {
            Some(collector_url) => {
                let resource = base_attrs(&settings.service_name, env!("CARGO_PKG_VERSION"));

                Some(Exporters {
                    logger_provider: build_logger_provider(collector_url, resource.clone())?,
                    tracer_provider: build_tracer_provider(collector_url, resource.clone())?,
                    meter_provider: build_meter_provider(collector_url, resource)?,
                })
            }
            None => None,
        };

        Ok(Self {
            service_name: settings.service_name.clone(),
            log_filter: settings.log_filter.clone(),
            exporters,
        })
    }

    pub fn register(self) -> Self {
        let trace_layer = self.exporters.as_ref().map(|ex| {
            global::set_tracer_provider(ex.tracer_provider.clone());
            tracing_opentelemetry::layer().with_tracer(global::tracer(self.service_name.clone()))
        });
        let log_layer = self
            .exporters
            .as_ref()
            .map(|ex| OpenTelemetryTracingBridge::new(&ex.logger_provider));
        let meter_layer = self
            .exporters
            .as_ref()
            .map(|ex| tracing_opentelemetry::MetricsLayer::new(ex.meter_provider.clone()));

        tracing_subscriber::registry()
            .with(EnvFilter::new(&self.log_filter))
            .with(trace_layer)
            .with(log_layer)
            .with(meter_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();

        if self.exporters.is_none() {
            tracing::debug!("no collector configured, logging to console only");
        }

        self
    }

    /// Flushes and stops the exporters. Errors go to stderr since the subscriber may already be
    /// unable to deliver them.
    pub fn shutdown(self) {
        let Some(ex) = self.exporters else {
            return;
        };

        if let Err(e) = ex.meter_provider.shutdown() {
            eprintln!("error during metering shutdown: {e:?}");
        }
        if let Err(e) = ex.logger_provider.shutdown() {
            eprintln!("error during logging shutdown: {e:?}");
        }
        if let Err(e) = ex.tracer_provider.shutdown() {
            eprintln!("error during tracing shutdown: {e:?}");
        }
    }
}

fn build_logger_provider(collector_url: &str, resource: Resource) -> Result<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Logs.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

fn build_tracer_provider(collector_url: &str, resource: Resource) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Traces.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

fn build_meter_provider(collector_url: &str, resource: Resource) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Metrics.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource)
        .build())
}

fn base_attrs(name: &str, version: &'static str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", name.to_owned()),
            KeyValue::new("service.version", version),
        ])
        .build()
}

enum Endpoint {
    Logs,
    Traces,
    Metrics,
}

impl Endpoint {
    fn to_url(&self, collector_endpoint: &str) -> String {
        let location = match self {
            Endpoint::Logs => "/v1/logs",
            Endpoint::Traces => "/v1/traces",
            Endpoint::Metrics => "/v1/metrics",
        };
        format!("{}{location}", collector_endpoint.trim_end_matches('/'))
    }
}
