//! Per-connection bookkeeping.
//!
//! Every connection the pool owns carries a [`ConnectionMetadata`] record
//! from the moment it is opened until it is closed or detached.

use std::time::{Duration, Instant};

/// Why a connection was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOrigin {
    /// Opened while pre-filling the pool at construction.
    Prefill,
    /// Opened by `acquire` because the queue was empty and the pool had spare
    /// capacity (a broken connection was discarded, or connections were drained).
    Replacement,
    /// Handed to the pool from outside via `Pool::release`.
    Adopted,
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique identifier for this connection within its pool.
    pub id: u64,
    /// Why the connection was opened.
    pub origin: ConnectionOrigin,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last checked out or returned.
    pub last_used_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection.
    #[must_use]
    pub fn new(id: u64, origin: ConnectionOrigin) -> Self {
        let now = Instant::now();
        Self {
            id,
            origin,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
        }
    }

    /// Time since the connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last checked out or returned.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
    }

    /// Mark the connection as returned to the queue.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
    }
}
