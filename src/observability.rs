//! Logging setup.
//!
//! Every module logs through `tracing` with structured fields; worker tasks run inside a
//! `worker{name=..}` span and the whole device inside a `device{proj_id=..}` span.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line, for log shipping.
    Json,
}

/// Installs the global subscriber once per process.
///
/// `RUST_LOG` selects levels (e.g. `info`, `fishvisor::runner=debug`); default `info`.
/// Later calls, or an already installed subscriber, are ignored.
///
/// # Example
///
/// ```rust
/// use fishvisor::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Json);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let res = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
        if let Err(err) = res {
            eprintln!("logging not initialised: {err}");
        }
    });
}

/// Span covering one device run.
#[must_use]
pub fn device_span(proj_id: &str) -> Span {
    tracing::info_span!("device", proj_id = proj_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn test_device_span_enters() {
        let span = device_span("abc_t1_mz_050124");
        let _guard = span.enter();
        tracing::info!("inside device span");
    }
}
