//! Structured logging setup
//!
//! Logs always go to stderr so `--json` command output on stdout stays
//! machine-readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human output
    Pretty,
    /// One JSON object per event, with the current span attached
    Json,
}

impl LogFormat {
    /// JSON when the caller asked for machine output or this is a release build
    pub fn select(json_output: bool) -> Self {
        if json_output || !cfg!(debug_assertions) {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `log_level` when set. Calling this twice is harmless;
/// the second subscriber is discarded.
pub fn init_telemetry(log_level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Filter used without `RUST_LOG`; dependencies stay at `warn` so HTTP and
/// SQL chatter does not drown the loop's own events
fn default_filter(log_level: &str) -> String {
    format!("warn,weave_engine={},weave={}", log_level, log_level)
}
