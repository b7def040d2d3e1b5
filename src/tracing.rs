//! Logging and optional OpenTelemetry export
//!
//! Console or JSON logs always; spans are additionally exported over OTLP
//! when an endpoint is configured.
//!
//! ```text
//! podsentinel → stdout (console | json)
//!             → OTLP (gRPC) → OTel Collector → Tempo     (only with --otlp-endpoint)
//! ```

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogEncoding {
    #[default]
    Console,
    Json,
}

impl std::str::FromStr for LogEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "console" => Ok(LogEncoding::Console),
            "json" => Ok(LogEncoding::Json),
            other => Err(format!("unknown log encoding {:?} (expected console or json)", other)),
        }
    }
}

/// Initialize the tracing subsystem
///
/// # Arguments
/// * `service_name` - Name for the service in exported traces
/// * `log_level` - Default filter directive; `RUST_LOG` takes precedence
/// * `encoding` - Console or JSON log lines
/// * `otlp_endpoint` - Export spans to this OTLP collector when set
///
/// # Example
/// ```ignore
/// init_tracing("podsentinel", "info", LogEncoding::Json, None)?;
/// ```
pub fn init_tracing(
    service_name: &str,
    log_level: &str,
    encoding: LogEncoding,
    otlp_endpoint: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match encoding {
        LogEncoding::Console => tracing_subscriber::fmt::layer().with_target(true).boxed(),
        LogEncoding::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .boxed(),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let otel_layer = match otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])))
                .install_batch(runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .with(otel_layer)
        .try_init()?;

    if let Some(endpoint) = otlp_endpoint {
        tracing::info!(service = service_name, endpoint, "OpenTelemetry tracing initialized");
    }

    Ok(())
}

/// Flush pending spans to the collector
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_encoding_parse() {
        assert_eq!("console".parse::<LogEncoding>().unwrap(), LogEncoding::Console);
        assert_eq!("json".parse::<LogEncoding>().unwrap(), LogEncoding::Json);
        assert!("yaml".parse::<LogEncoding>().is_err());
    }
}
