//! Process-wide tracing subscriber and metric descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static DESCRIBE_METRICS: Once = Once::new();

/// `RUST_LOG` directives win over the configured level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    DESCRIBE_METRICS.call_once(describe_metrics);

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::Telemetry(err.to_string()))
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        // One object per line for log shippers; span fields ride along.
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_thread_ids(false)
            .boxed(),
    }
}

fn describe_metrics() {
    describe_counter!(
        "willow_image_jobs_total",
        Unit::Count,
        "Blob intake and image processing runs by job and outcome."
    );
    describe_counter!(
        "willow_api_requests_rejected_total",
        Unit::Count,
        "API requests refused for a bad token or the rate limit."
    );
    describe_histogram!(
        "willow_markdown_render_ms",
        Unit::Milliseconds,
        "Markdown render latency."
    );
}
