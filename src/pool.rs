//! Bounded connection pool with RAII leases.
//!
//! Checkout pops an idle connection, creates a new one while fewer than
//! `max_connections` are live, or waits on a condition variable until one
//! is returned or the checkout timeout expires.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::{ConnectionString, PoolConfig};
use crate::connection::Connection;
use crate::error::{DbError, DbResult};
use crate::registry::DriverRegistry;

struct PoolState {
    idle: VecDeque<Connection>,
    live: usize,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    connection_string: ConnectionString,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    fn create_connection(&self) -> DbResult<Connection> {
        let driver = DriverRegistry::global()
            .create_connection(&self.connection_string, &self.config.driver_prefix)?;
        let conn = Connection::from_handle(self.connection_string.clone(), driver);
        conn.open()?;
        info!(target: "polysql::pool", driver = %self.connection_string.driver, id = conn.id(), "created pooled connection");
        Ok(conn)
    }

    /// Take one connection out of the live count and wake a waiter.
    fn forget_one(&self) {
        let mut state = self.state.lock();
        state.live = state.live.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    fn release(&self, conn: Connection) {
        let detached = conn.inner().detach_all();
        if detached > 0 {
            debug!(target: "polysql::pool", id = conn.id(), detached, "detached queries left on returned connection");
        }
        if conn.in_transaction() {
            warn!(target: "polysql::pool", id = conn.id(), "connection returned with an open transaction; rolling back");
            if let Err(e) = conn.rollback_transaction() {
                warn!(target: "polysql::pool", id = conn.id(), error = %e, "rollback failed; discarding connection");
                drop(conn);
                self.forget_one();
                return;
            }
        }

        let mut state = self.state.lock();
        if state.closed || !conn.is_open() {
            debug!(target: "polysql::pool", id = conn.id(), "discarding connection");
            state.live = state.live.saturating_sub(1);
            drop(state);
            drop(conn);
        } else {
            debug!(target: "polysql::pool", id = conn.id(), "connection returned");
            state.idle.push_back(conn);
            drop(state);
        }
        self.available.notify_one();
    }
}

/// A bounded set of same-driver connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Validate `config` and resolve its driver. No connection is opened
    /// until the first checkout.
    pub fn new(config: PoolConfig) -> DbResult<Self> {
        let connection_string = config.validate()?;
        DriverRegistry::global().load(&connection_string.driver, &config.driver_prefix)?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                connection_string,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    live: 0,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        })
    }

    /// Lease a connection, waiting up to the checkout timeout.
    pub fn get_connection(&self) -> DbResult<PooledConnection> {
        let timeout = self.inner.config.checkout_timeout;
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();

        loop {
            if state.closed {
                return Err(DbError::Connection("connection pool is closed".to_string()));
            }

            if let Some(conn) = state.idle.pop_front() {
                debug!(target: "polysql::pool", id = conn.id(), "reusing idle connection");
                return Ok(self.lease(conn));
            }

            if state.live < self.inner.config.max_connections {
                state.live += 1;
                drop(state);
                return match self.inner.create_connection() {
                    Ok(conn) => Ok(self.lease(conn)),
                    Err(e) => {
                        self.inner.forget_one();
                        Err(e)
                    }
                };
            }

            let timed_out = self.inner.available.wait_until(&mut state, deadline).timed_out();
            if timed_out
                && !state.closed
                && state.idle.is_empty()
                && state.live >= self.inner.config.max_connections
            {
                debug!(target: "polysql::pool", ?timeout, live = state.live, "checkout timed out");
                return Err(DbError::PoolTimeout(timeout));
            }
        }
    }

    fn lease(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Connections currently in existence (idle or leased).
    pub fn live_count(&self) -> usize {
        self.inner.state.lock().live
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn connection_string(&self) -> &ConnectionString {
        &self.inner.connection_string
    }

    /// Drop idle connections and refuse further checkouts. Leased
    /// connections are discarded when they come back.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let idle: Vec<Connection> = state.idle.drain(..).collect();
        state.live = state.live.saturating_sub(idle.len());
        drop(state);
        drop(idle);
        self.inner.available.notify_all();
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConnectionPool")
            .field("connection_string", &self.inner.connection_string.to_string())
            .field("max_connections", &self.inner.config.max_connections)
            .field("live", &state.live)
            .field("idle", &state.idle.len())
            .finish()
    }
}

/// Exclusive use of one pooled connection; returns it to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // only `None` inside `drop`
        self.conn.as_ref().unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::error::ErrorKind;
    use crate::testing::register_mock_driver;

    fn mock_pool(max: usize, timeout_ms: u64) -> ConnectionPool {
        register_mock_driver();
        ConnectionPool::new(
            PoolConfig::new("mock://localhost/db")
                .max_connections(max)
                .checkout_timeout(Duration::from_millis(timeout_ms)),
        )
        .unwrap()
    }

    #[test]
    fn test_lease_returns_to_idle_queue() {
        let pool = mock_pool(2, 100);
        let first_id = {
            let lease = pool.get_connection().unwrap();
            assert!(lease.is_open());
            assert_eq!(pool.live_count(), 1);
            assert_eq!(pool.idle_count(), 0);
            lease.id()
        };
        assert_eq!(pool.idle_count(), 1);
        let lease = pool.get_connection().unwrap();
        assert_eq!(lease.id(), first_id);
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    fn test_checkout_times_out() {
        let pool = mock_pool(1, 50);
        let _held = pool.get_connection().unwrap();
        let started = Instant::now();
        let err = pool.get_connection().err().unwrap();
        assert!(matches!(err, DbError::PoolTimeout(_)));
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    fn test_waiter_gets_returned_connection() {
        let pool = mock_pool(1, 2000);
        let held = pool.get_connection().unwrap();
        let id = held.id();
        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.get_connection().map(|c| c.id()))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), id);
    }

    #[test]
    fn test_live_count_never_exceeds_max() {
        let pool = mock_pool(3, 5000);
        let in_use = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..12)
            .map(|_| {
                let pool = pool.clone();
                let in_use = Arc::clone(&in_use);
                let peak = Arc::clone(&peak);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        let lease = pool.get_connection().unwrap();
                        let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        assert!(pool.live_count() <= 3);
                        lease.execute("UPDATE t SET n = n + 1").unwrap();
                        std::thread::sleep(Duration::from_millis(2));
                        in_use.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.live_count() <= 3);
        assert_eq!(pool.idle_count(), pool.live_count());
    }

    #[test]
    fn test_open_transaction_rolled_back_on_return() {
        let pool = mock_pool(1, 100);
        {
            let lease = pool.get_connection().unwrap();
            lease.begin_transaction().unwrap();
        }
        let lease = pool.get_connection().unwrap();
        assert!(!lease.in_transaction());
    }

    #[test]
    fn test_returned_lease_detaches_queries() {
        let pool = mock_pool(1, 100);
        let mut leftover = {
            let lease = pool.get_connection().unwrap();
            let mut q = crate::query::Query::with_sql(&lease, "DELETE FROM t");
            q.exec().unwrap();
            q
        };
        let other = pool.get_connection().unwrap();
        assert!(!leftover.is_attached());
        assert_eq!(other.attached_queries(), 0);
        let err = leftover.exec().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_closed_connection_is_discarded() {
        let pool = mock_pool(2, 100);
        {
            let lease = pool.get_connection().unwrap();
            lease.close().unwrap();
        }
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_close_pool() {
        let pool = mock_pool(2, 100);
        let held = pool.get_connection().unwrap();
        drop(pool.get_connection().unwrap());
        assert_eq!(pool.live_count(), 2);
        pool.close();
        assert_eq!(pool.live_count(), 1);
        assert!(pool.get_connection().is_err());
        drop(held);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_invalid_configs() {
        register_mock_driver();
        let err = ConnectionPool::new(PoolConfig::new("mock://h/db").max_connections(0)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = ConnectionPool::new(PoolConfig::new("nosuchdriver://h/db").driver_prefix("polysql_test"))
            .err()
            .unwrap();
        assert!(matches!(err, DbError::DriverNotFound(_)));
    }
}
