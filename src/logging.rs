//! Logging setup and log-safe rendering of state.
//!
//! All logs go to **stderr**; stdout belongs to the host protocol. Filtering
//! follows `RUST_LOG`, e.g. `RUST_LOG=hemmer_provider_aws=debug` shows every
//! retry attempt and waiter observation.

use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::schema::Schema;

/// Replacement for sensitive values in logged state.
pub const REDACTED: &str = "(sensitive value)";

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the stderr subscriber at `info` unless `RUST_LOG` says otherwise.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`], with a custom default level.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Initialize logging unless a subscriber is already set. Returns whether
/// this call installed it.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

/// A copy of `state` with every sensitive top-level attribute replaced by
/// [`REDACTED`], for debug logging.
pub fn redacted(schema: &Schema, state: &Value) -> Value {
    let Value::Object(map) = state else {
        return state.clone();
    };
    Value::Object(
        map.iter()
            .map(|(k, v)| {
                let sensitive = schema
                    .attribute(k)
                    .is_some_and(|attr| attr.flags.sensitive);
                if sensitive && !v.is_null() {
                    (k.clone(), Value::String(REDACTED.to_string()))
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect(),
    )
}
