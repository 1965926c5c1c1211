//! Tracing setup and timing helpers.

use crate::errors::ClientError;
use std::time::Instant;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "gqlflow=info";

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` overrides [`DEFAULT_FILTER`]. With `json` set, events are
/// written as JSON lines.
///
/// # Errors
///
/// Returns `ClientError::Config` if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<(), ClientError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ClientError::Config(format!("failed to init tracing subscriber: {e}")))
}

/// Measures how long a stage handler runs.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the timed span's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("fetch");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
        assert_eq!(timer.name(), "fetch");
    }

    #[test]
    fn test_second_init_fails() {
        let first = init_tracing(false);
        let second = init_tracing(true);
        assert!(first.is_ok() || second.is_err());
        assert!(second.is_err());
    }
}
