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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tombola_result_cache_hit_total",
            Unit::Count,
            "Random node lookups served from the result cache."
        );
        describe_counter!(
            "tombola_result_cache_miss_total",
            Unit::Count,
            "Random node lookups that had to draw."
        );
        describe_counter!(
            "tombola_result_cache_store_total",
            Unit::Count,
            "Identifier sets written to the result cache."
        );
        describe_counter!(
            "tombola_result_cache_init_failed_total",
            Unit::Count,
            "Draws that failed while initialising a cache entry."
        );
        describe_counter!(
            "tombola_result_cache_evict_total",
            Unit::Count,
            "Result cache evictions due to capacity."
        );
        describe_histogram!(
            "tombola_sampler_draw_ms",
            Unit::Milliseconds,
            "Random draw latency in milliseconds, store round trips included."
        );
    });
}
