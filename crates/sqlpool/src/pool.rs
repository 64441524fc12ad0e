//! Connection pool implementation.
//!
//! The pool is a bounded channel of idle connections. `acquire` is a
//! blocking receive followed by a liveness probe; releasing is a
//! non-blocking send that closes the connection if the channel is full.
//!
//! The pool counts every connection it owns, queued or checked out, against
//! its size. When the queue is empty and that count is below the size (a
//! broken connection was discarded, or connections were drained) `acquire`
//! opens a replacement through the [`ConnectionFactory`] instead of waiting,
//! so the pool heals back to its configured size and never waits on
//! connections that no longer exist.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;

use crate::config::PoolConfig;
use crate::driver::{Driver, DriverConnection};
use crate::error::{Error, Result};
use crate::factory::ConnectionFactory;
use crate::instrumentation::{Observer, PoolEvent};
use crate::lifecycle::{ConnectionMetadata, ConnectionOrigin};

/// How long a blocked `acquire` waits before re-checking for spare capacity.
const RECHECK_INTERVAL: Duration = Duration::from_millis(100);

struct Idle<C> {
    conn: C,
    meta: ConnectionMetadata,
}

/// A fixed-size pool of database connections.
///
/// Cloning a `Pool` is cheap and yields a handle to the same pool.
pub struct Pool<D: Driver> {
    inner: Arc<PoolInner<D>>,
}

struct PoolInner<D: Driver> {
    config: PoolConfig,
    factory: ConnectionFactory<D>,
    observer: Arc<dyn Observer>,
    // Taken on close so blocked receivers wake up disconnected.
    idle_tx: RwLock<Option<Sender<Idle<D::Connection>>>>,
    idle_rx: Receiver<Idle<D::Connection>>,
    // Connections owned by the pool: queued plus checked out.
    live: AtomicUsize,
    next_id: AtomicU64,
    closed: AtomicBool,
}

enum Next<C> {
    Queued(Idle<C>),
    Fresh(Idle<C>),
}

impl<D: Driver> Pool<D> {
    /// Create a pool and pre-fill it with `config.size` connections.
    ///
    /// Fails with [`Error::Connection`] if any of the initial connections
    /// cannot be opened; connections opened so far are closed.
    pub fn new(factory: ConnectionFactory<D>, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = flume::bounded(config.size);
        let observer = Arc::clone(factory.observer());
        let inner = Arc::new(PoolInner {
            config,
            factory,
            observer,
            idle_tx: RwLock::new(Some(tx)),
            idle_rx: rx,
            live: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        for _ in 0..inner.config.size {
            inner.live.fetch_add(1, Ordering::AcqRel);
            let idle = inner.open(ConnectionOrigin::Prefill)?;
            inner.checkin(idle);
        }

        tracing::debug!(
            size = inner.config.size,
            host = %inner.factory.options().host,
            "connection pool ready"
        );

        Ok(Self { inner })
    }

    /// Get a live connection from the pool.
    ///
    /// Blocks until a connection is queued, or opens a replacement when the
    /// queue is empty and the pool is below its size. A queued connection
    /// is probed before it is returned; if the probe fails the connection is
    /// closed and the next queued one is tried, falling back to the factory
    /// once none are left.
    pub fn acquire(&self) -> Result<PooledConnection<D>> {
        let inner = &self.inner;
        let deadline = inner.config.acquire_timeout.map(|t| Instant::now() + t);

        tracing::trace!("acquiring connection from pool");

        loop {
            let mut idle = match inner.next(deadline)? {
                Next::Queued(idle) => idle,
                Next::Fresh(idle) => return Ok(self.checkout(idle)),
            };

            match idle.conn.ping(inner.config.reconnect_on_ping) {
                Ok(()) => return Ok(self.checkout(idle)),
                Err(err) => {
                    inner.observer.warn(&PoolEvent::ConnectionLost {
                        connection_id: idle.meta.id,
                        error: err.to_string(),
                    });
                    inner.close_conn(idle);
                }
            }
        }
    }

    /// Hand a connection to the pool.
    ///
    /// The connection is queued if there is room and closed otherwise.
    /// Never blocks. Connections checked out through [`Pool::acquire`] are
    /// returned automatically when their [`PooledConnection`] is dropped.
    pub fn release(&self, conn: D::Connection) {
        let inner = &self.inner;
        inner.live.fetch_add(1, Ordering::AcqRel);
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        inner.checkin(Idle {
            conn,
            meta: ConnectionMetadata::new(id, ConnectionOrigin::Adopted),
        });
    }

    /// Close every queued connection, returning how many were closed.
    ///
    /// Checked-out connections are not affected.
    pub fn drain(&self) -> usize {
        let closed = self.inner.drain();
        tracing::debug!(closed = closed, "drained connection pool");
        closed
    }

    /// Close the pool.
    ///
    /// Queued connections are closed, blocked `acquire` calls fail with
    /// [`Error::PoolClosed`], and connections returned later are closed.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        drop(self.inner.idle_tx.write().take());
        let closed = self.inner.drain();
        tracing::info!(closed = closed, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let idle = self.inner.idle_rx.len();
        let total = self.inner.live.load(Ordering::Acquire);
        PoolStatus {
            idle,
            in_use: total.saturating_sub(idle),
            total,
            max: self.inner.config.size,
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The factory that opens this pool's connections.
    #[must_use]
    pub fn factory(&self) -> &ConnectionFactory<D> {
        &self.inner.factory
    }

    pub(crate) fn observer(&self) -> &Arc<dyn Observer> {
        &self.inner.observer
    }

    fn checkout(&self, mut idle: Idle<D::Connection>) -> PooledConnection<D> {
        idle.meta.mark_checkout();
        tracing::trace!(connection_id = idle.meta.id, "connection checked out");
        PooledConnection {
            pool: Arc::clone(&self.inner),
            idle: Some(idle),
        }
    }
}

impl<D: Driver> PoolInner<D> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn next(&self, deadline: Option<Instant>) -> Result<Next<D::Connection>> {
        loop {
            if self.is_closed() {
                return Err(Error::PoolClosed);
            }

            match self.idle_rx.try_recv() {
                Ok(idle) => return Ok(Next::Queued(idle)),
                Err(TryRecvError::Disconnected) => return Err(Error::PoolClosed),
                Err(TryRecvError::Empty) => {}
            }

            if self.try_reserve() {
                return self.open(ConnectionOrigin::Replacement).map(Next::Fresh);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::AcquisitionTimeout(
                            self.config.acquire_timeout.unwrap_or_default(),
                        ));
                    }
                    (deadline - now).min(RECHECK_INTERVAL)
                }
                None => RECHECK_INTERVAL,
            };

            match self.idle_rx.recv_timeout(wait) {
                Ok(idle) => return Ok(Next::Queued(idle)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(Error::PoolClosed),
            }
        }
    }

    /// Claim a slot for a new connection if the pool is below its size.
    fn try_reserve(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.config.size).then_some(live + 1)
            })
            .is_ok()
    }

    /// Open a connection into an already reserved slot.
    fn open(&self, origin: ConnectionOrigin) -> Result<Idle<D::Connection>> {
        match self.factory.create() {
            Ok(conn) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                Ok(Idle {
                    conn,
                    meta: ConnectionMetadata::new(id, origin),
                })
            }
            Err(err) => {
                self.live.fetch_sub(1, Ordering::AcqRel);
                Err(err)
            }
        }
    }

    fn checkin(&self, mut idle: Idle<D::Connection>) {
        if self.is_closed() {
            self.close_conn(idle);
            return;
        }

        idle.meta.mark_checkin();
        let id = idle.meta.id;
        let rejected = match self.idle_tx.read().as_ref() {
            Some(tx) => match tx.try_send(idle) {
                Ok(()) => None,
                Err(TrySendError::Full(idle) | TrySendError::Disconnected(idle)) => Some(idle),
            },
            None => Some(idle),
        };

        match rejected {
            None => tracing::trace!(connection_id = id, "connection returned to pool"),
            Some(idle) => {
                tracing::debug!(connection_id = id, "pool full, closing returned connection");
                self.close_conn(idle);
            }
        }
    }

    fn close_conn(&self, mut idle: Idle<D::Connection>) {
        if let Err(err) = idle.conn.close() {
            tracing::debug!(
                connection_id = idle.meta.id,
                error = %err,
                "error closing connection"
            );
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    fn drain(&self) -> usize {
        let mut closed = 0;
        while let Ok(idle) = self.idle_rx.try_recv() {
            self.close_conn(idle);
            closed += 1;
        }
        closed
    }
}

impl<D: Driver> Drop for PoolInner<D> {
    fn drop(&mut self) {
        self.drain();
    }
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .field("factory", &self.inner.factory)
            .finish()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections queued.
    pub idle: usize,
    /// Number of connections currently checked out.
    pub in_use: usize,
    /// Total number of connections owned by the pool.
    pub total: usize,
    /// Configured pool size.
    pub max: usize,
}

/// A connection checked out of the pool.
///
/// Dereferences to the driver connection. When dropped, the connection is
/// returned to the pool.
pub struct PooledConnection<D: Driver> {
    pool: Arc<PoolInner<D>>,
    idle: Option<Idle<D::Connection>>,
}

impl<D: Driver> PooledConnection<D> {
    fn idle(&self) -> &Idle<D::Connection> {
        match &self.idle {
            Some(idle) => idle,
            None => unreachable!("pooled connection used after release"),
        }
    }

    fn idle_mut(&mut self) -> &mut Idle<D::Connection> {
        match &mut self.idle {
            Some(idle) => idle,
            None => unreachable!("pooled connection used after release"),
        }
    }

    /// Metadata the pool tracks for this connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.idle().meta
    }

    /// Close the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if let Some(idle) = self.idle.take() {
            self.pool.close_conn(idle);
        }
    }

    /// Detach the connection from the pool.
    ///
    /// The pool no longer counts it and will open a replacement on demand.
    pub fn detach(mut self) -> D::Connection {
        match self.idle.take() {
            Some(idle) => {
                self.pool.live.fetch_sub(1, Ordering::AcqRel);
                idle.conn
            }
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<D: Driver> Deref for PooledConnection<D> {
    type Target = D::Connection;

    fn deref(&self) -> &Self::Target {
        &self.idle().conn
    }
}

impl<D: Driver> DerefMut for PooledConnection<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.idle_mut().conn
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        if let Some(idle) = self.idle.take() {
            self.pool.checkin(idle);
        }
    }
}

impl<D: Driver> fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("metadata", &self.idle.as_ref().map(|i| &i.meta))
            .finish()
    }
}
