//! OpenTelemetry bridge for Foreman processes.
//!
//! A deployment runs several processes at once: one controller and a
//! pool of workers. Each installs its own subscriber under its own
//! service name (`foreman-controller`, `foreman-worker-3`, ...) so that
//! interleaved spans stay attributable to the process that emitted them.
//! Plain structured logging is wired up by the binary itself; this
//! module only covers the span export behind the `--otel` flag.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Errors from telemetry installation.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Owns the span pipeline for the lifetime of the process.
///
/// Dropping the guard flushes buffered spans and shuts the exporter
/// down; keep it alive until the process is about to exit.
pub struct Telemetry {
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Flush and tear the pipeline down explicitly.
    pub fn shutdown(self) {}
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            // The subscriber may already be torn down, so plain stderr.
            eprintln!("opentelemetry shutdown: {e}");
        }
    }
}

/// Install a subscriber that mirrors spans to OpenTelemetry under the
/// given service name.
///
/// The log filter comes from `RUST_LOG`. The stdout exporter suits local
/// development; deployments swap it for an OTLP one.
pub fn init(service: &str) -> Result<Telemetry, TelemetryError> {
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .build();
    let tracer = provider.tracer(service.to_string());

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInstalled)?;

    Ok(Telemetry { provider })
}
