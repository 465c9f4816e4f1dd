//! Logging setup.
//!
//! Veneer logs through `tracing`. Applications that already install a
//! subscriber need nothing else; otherwise [`init`] installs one (with the
//! `tracing-subscriber` feature) controlled by:
//!
//! - `VENEER_DEBUG=true|1|yes` - enable debug logging
//! - `VENEER_LOG_LEVEL=trace|debug|info|warn|error` - set a specific level
//! - `VENEER_LOG_FORMAT=json|pretty|compact` - output format (default: json)

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Check if debug logging is enabled via `VENEER_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("VENEER_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// The log level from `VENEER_LOG_LEVEL`.
///
/// Defaults to "debug" when `VENEER_DEBUG` is enabled, "warn" otherwise.
pub fn get_log_level() -> &'static str {
    let fallback = if is_debug_enabled() { "debug" } else { "warn" };
    match env::var("VENEER_LOG_LEVEL") {
        Ok(level) => match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// The log format from `VENEER_LOG_FORMAT`, defaulting to "json".
pub fn get_log_format() -> &'static str {
    env::var("VENEER_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Install the veneer subscriber. Subsequent calls are no-ops.
///
/// Nothing is installed unless `VENEER_DEBUG` or `VENEER_LOG_LEVEL` is set.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var("VENEER_LOG_LEVEL").is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!(
                "veneer={},veneer_core={},veneer_mongodb={}",
                level, level, level
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            let registry = tracing_subscriber::registry().with(filter);
            let installed = match get_log_format() {
                "pretty" => registry.with(fmt::layer().pretty()).try_init(),
                "compact" => registry.with(fmt::layer().compact()).try_init(),
                _ => registry.with(fmt::layer().json()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(
                    level = level,
                    format = get_log_format(),
                    "Veneer logging initialized"
                );
            }
        }
    });
}
