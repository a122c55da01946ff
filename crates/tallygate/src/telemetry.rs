//! Structured logging and Prometheus metrics.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tallygate_requests_total` | Counter | `mode`, `status` | Dispatched requests |
//! | `tallygate_request_duration_seconds` | Histogram | `mode` | Dispatch latency |
//! | `tallygate_upstream_failures_total` | Counter | - | Failed upstream exchanges |
//! | `tallygate_capture_failures_total` | Counter | - | Capture log write failures |

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{GatewayMode, TelemetrySettings};
use crate::error::{GatewayError, GatewayResult};

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Request duration buckets: 1ms up to 30s.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Initializes the global tracing subscriber.
///
/// # Errors
///
/// Returns `GatewayError::Config` if the filter is invalid or a subscriber
/// is already installed.
pub fn init_logging(settings: &TelemetrySettings) -> GatewayResult<()> {
    let filter = EnvFilter::try_new(&settings.log_level)
        .map_err(|e| GatewayError::config(format!("invalid log level: {e}")))?;

    if settings.json_logs {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| GatewayError::config(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::NONE)
            .with_target(true)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| GatewayError::config(e.to_string()))?;
    }

    Ok(())
}

/// Installs the Prometheus recorder. Safe to call more than once; only the
/// first call installs.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| {
        let builder = PrometheusBuilder::new()
            .set_buckets(DURATION_BUCKETS)
            .unwrap_or_else(|_| PrometheusBuilder::new());
        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        if let Err(e) = metrics::set_global_recorder(recorder) {
            warn!(error = %e, "metrics recorder already installed");
        }

        register_metric_descriptions();
        handle
    });
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        "tallygate_requests_total",
        "Total number of requests dispatched by mode and status"
    );
    describe_histogram!(
        "tallygate_request_duration_seconds",
        "Dispatch duration in seconds"
    );
    describe_counter!(
        "tallygate_upstream_failures_total",
        "Upstream requests that failed to connect, timed out or broke mid-body"
    );
    describe_counter!(
        "tallygate_capture_failures_total",
        "Exchanges that could not be appended to the capture log"
    );
}

/// Records a dispatched request.
pub fn record_request(mode: GatewayMode, status_code: u16, duration: Duration) {
    counter!(
        "tallygate_requests_total",
        "mode" => mode.as_str(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        "tallygate_request_duration_seconds",
        "mode" => mode.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Records an upstream failure.
pub fn record_upstream_failure() {
    counter!("tallygate_upstream_failures_total").increment(1);
}

/// Records a capture log write failure.
pub fn record_capture_failure() {
    counter!("tallygate_capture_failures_total").increment(1);
}
