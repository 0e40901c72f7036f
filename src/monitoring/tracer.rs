/*!
 * Tracing
 * Structured logging for queue tools and services using the tracing crate
 */

use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Operations slower than this are logged at warn
const SLOW_OPERATION: Duration = Duration::from_millis(100);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - WSP_TRACE_JSON: Enable JSON output (default: false)
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("WSP_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Tracing initialized");
    }
    installed
}

/// Timed span around one queue operation
pub struct OperationSpan {
    span: tracing::Span,
    start: Instant,
    operation: &'static str,
}

impl OperationSpan {
    pub fn new(operation: &'static str, queue: &str) -> Self {
        let span = span!(
            Level::DEBUG,
            "queue_op",
            operation,
            queue,
            records = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            operation,
        }
    }

    /// Record how many records the operation touched
    pub fn record_records(&self, count: usize) {
        self.span.record("records", count);
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let _entered = self.span.enter();
        if elapsed > SLOW_OPERATION {
            warn!(
                operation = self.operation,
                duration_ms = elapsed.as_millis() as u64,
                "Slow queue operation"
            );
        } else {
            debug!(
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "Queue operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        assert!(!init_tracing());
    }

    #[test]
    fn test_operation_span_measures() {
        let span = OperationSpan::new("drain", "q");
        span.record_records(3);
        std::thread::sleep(Duration::from_millis(2));
        assert!(span.elapsed() >= Duration::from_millis(2));
    }
}
