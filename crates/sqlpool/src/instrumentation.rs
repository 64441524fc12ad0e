//! Observability hooks for pool and executor events.
//!
//! Retries, lost connections and unclassified failures are reported through
//! an injected [`Observer`]. The default [`TracingObserver`] turns each
//! [`PoolEvent`] into a structured `tracing` event; the host application
//! owns the subscriber.
//!
//! Parameter values are never part of an event, only their count, and SQL
//! text is truncated so multi-row batch statements stay readable.

use std::fmt;
use std::time::Duration;

/// Maximum SQL length recorded in events.
pub const MAX_SQL_LENGTH: usize = 2048;

/// Something worth reporting while acquiring connections or running operations.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum PoolEvent {
    /// A connect attempt failed.
    ConnectFailed {
        /// Server host.
        host: String,
        /// Server port.
        port: u16,
        /// One-based attempt number.
        attempt: u32,
        /// Attempts still allowed.
        remaining: u32,
        /// Delay before the next attempt, if any.
        delay: Option<Duration>,
        /// Driver error text.
        error: String,
    },

    /// A pooled connection failed its liveness probe and was discarded.
    ConnectionLost {
        /// Pool-assigned connection id.
        connection_id: u64,
        /// Driver error text.
        error: String,
    },

    /// An operation hit a connectivity failure.
    OperationRetry {
        /// Statement text (truncated).
        sql: String,
        /// One-based attempt number.
        attempt: u32,
        /// Attempts still allowed.
        remaining: u32,
        /// Delay before the next attempt, if any.
        delay: Option<Duration>,
        /// Driver error text.
        error: String,
    },

    /// An operation failed with a query-level error.
    QueryFailed {
        /// Statement text (truncated).
        sql: String,
        /// Number of positional parameters.
        param_count: usize,
        /// Driver error text.
        error: String,
    },

    /// An operation failed with an unclassified error.
    Unexpected {
        /// Statement text (truncated).
        sql: String,
        /// Number of positional parameters.
        param_count: usize,
        /// Driver error text.
        error: String,
    },
}

impl PoolEvent {
    /// Stable event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectFailed { .. } => "connect_failed",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::OperationRetry { .. } => "operation_retry",
            Self::QueryFailed { .. } => "query_failed",
            Self::Unexpected { .. } => "unexpected_error",
        }
    }
}

/// Receives pool events.
///
/// Implementations must be cheap; they are called on the thread that hit the failure.
pub trait Observer: Send + Sync + fmt::Debug {
    /// A recoverable condition (retry, discarded connection).
    fn warn(&self, event: &PoolEvent);

    /// A failure that is being surfaced to the caller.
    fn error(&self, event: &PoolEvent);
}

/// [`Observer`] that emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn warn(&self, event: &PoolEvent) {
        match event {
            PoolEvent::ConnectFailed {
                host,
                port,
                attempt,
                remaining,
                delay,
                error,
            } => tracing::warn!(
                event = event.name(),
                host = %host,
                port = port,
                attempt = attempt,
                remaining = remaining,
                delay = ?delay,
                error = %error,
                "failed to connect to database"
            ),
            PoolEvent::ConnectionLost {
                connection_id,
                error,
            } => tracing::warn!(
                event = event.name(),
                connection_id = connection_id,
                error = %error,
                "connection lost, discarding"
            ),
            PoolEvent::OperationRetry {
                sql,
                attempt,
                remaining,
                delay,
                error,
            } => tracing::warn!(
                event = event.name(),
                sql = %sql,
                attempt = attempt,
                remaining = remaining,
                delay = ?delay,
                error = %error,
                "connection error, retrying"
            ),
            PoolEvent::QueryFailed {
                sql,
                param_count,
                error,
            }
            | PoolEvent::Unexpected {
                sql,
                param_count,
                error,
            } => tracing::warn!(
                event = event.name(),
                sql = %sql,
                param_count = param_count,
                error = %error,
                "operation failed"
            ),
        }
    }

    fn error(&self, event: &PoolEvent) {
        match event {
            PoolEvent::ConnectFailed {
                host,
                port,
                attempt,
                error,
                ..
            } => tracing::error!(
                event = event.name(),
                host = %host,
                port = port,
                attempt = attempt,
                error = %error,
                "giving up connecting to database"
            ),
            PoolEvent::ConnectionLost {
                connection_id,
                error,
            } => tracing::error!(
                event = event.name(),
                connection_id = connection_id,
                error = %error,
                "connection lost"
            ),
            PoolEvent::OperationRetry {
                sql,
                attempt,
                error,
                ..
            } => tracing::error!(
                event = event.name(),
                sql = %sql,
                attempt = attempt,
                error = %error,
                "operation retries exhausted"
            ),
            PoolEvent::QueryFailed {
                sql,
                param_count,
                error,
            } => tracing::error!(
                event = event.name(),
                sql = %sql,
                param_count = param_count,
                error = %error,
                "query failed"
            ),
            PoolEvent::Unexpected {
                sql,
                param_count,
                error,
            } => tracing::error!(
                event = event.name(),
                sql = %sql,
                param_count = param_count,
                error = %error,
                "unexpected error"
            ),
        }
    }
}

/// Truncate SQL text for event fields.
#[must_use]
pub fn truncate_sql(sql: &str) -> String {
    truncate_string(sql, MAX_SQL_LENGTH)
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_sql_untouched() {
        assert_eq!(truncate_sql("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_truncate_long_sql() {
        let sql = "x".repeat(MAX_SQL_LENGTH + 10);
        let out = truncate_sql(&sql);
        assert_eq!(out.len(), MAX_SQL_LENGTH + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "é".repeat(4);
        assert_eq!(truncate_string(&s, 3), "é...");
    }

    #[test]
    fn test_event_names() {
        let event = PoolEvent::ConnectionLost {
            connection_id: 1,
            error: "gone".into(),
        };
        assert_eq!(event.name(), "connection_lost");
    }

    #[test]
    fn test_tracing_observer_does_not_panic_without_subscriber() {
        let observer = TracingObserver;
        observer.warn(&PoolEvent::QueryFailed {
            sql: "SELECT".into(),
            param_count: 0,
            error: "bad".into(),
        });
        observer.error(&PoolEvent::Unexpected {
            sql: "SELECT".into(),
            param_count: 2,
            error: "bad".into(),
        });
    }
}
