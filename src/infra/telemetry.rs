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

/// Register descriptions for every metric the crate records. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "opsdesk_cache_hit_total",
            Unit::Count,
            "Total number of cache lookups served from a live entry."
        );
        describe_counter!(
            "opsdesk_cache_miss_total",
            Unit::Count,
            "Total number of cache lookups that found no live entry."
        );
        describe_counter!(
            "opsdesk_cache_evict_total",
            Unit::Count,
            "Total number of cache entries evicted due to capacity."
        );
        describe_counter!(
            "opsdesk_cache_invalidated_total",
            Unit::Count,
            "Total number of cache entries removed by key, tag, pattern or prefix invalidation."
        );
        describe_histogram!(
            "opsdesk_cache_warm_ms",
            Unit::Milliseconds,
            "Cache warmup pass latency in milliseconds."
        );
        describe_counter!(
            "opsdesk_events_emitted_total",
            Unit::Count,
            "Total number of events emitted on the in-process bus."
        );
        describe_counter!(
            "opsdesk_event_handler_failures_total",
            Unit::Count,
            "Total number of event handlers that returned an error or panicked."
        );
    });
}
