use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the crate records.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "mangasync_realtime_events_total",
            Unit::Count,
            "Total number of realtime events dispatched, by topic."
        );
        describe_counter!(
            "mangasync_cache_invalidated_total",
            Unit::Count,
            "Total number of cache entries flipped from fresh to stale."
        );
        describe_counter!(
            "mangasync_cache_evicted_total",
            Unit::Count,
            "Total number of cache entries removed by realtime events."
        );
        describe_counter!(
            "mangasync_mutation_rollback_total",
            Unit::Count,
            "Total number of failed optimistic mutations, by operation."
        );
        describe_counter!(
            "mangasync_transport_reconnect_total",
            Unit::Count,
            "Total number of realtime reconnect attempts."
        );
        describe_histogram!(
            "mangasync_cache_apply_ms",
            Unit::Milliseconds,
            "Invalidation plan application latency in milliseconds."
        );
    });
}
