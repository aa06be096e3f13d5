//! Driver-independent connection bookkeeping.
//!
//! A [`Connection`] wraps one driver connection behind a mutex and keeps:
//! - the transaction-in-progress flag (one open transaction at most)
//! - weak handles to every attached [`Query`]
//!
//! Dropping the connection disables every attached query, rolls back an
//! open transaction and closes the native handle. Teardown errors are
//! logged and swallowed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::ConnectionString;
use crate::driver::{DriverConnection, ObjectType, StatementId};
use crate::error::{DbError, DbResult};
use crate::query::Query;
use crate::registry::{DriverHandle, DriverRegistry, DEFAULT_DRIVER_PREFIX};
use crate::value::TypedValue;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Shared flag between a connection and one attached query.
#[derive(Debug, Default)]
pub(crate) struct QueryLink {
    detached: AtomicBool,
}

impl QueryLink {
    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }
}

pub(crate) struct ConnectionState {
    pub(crate) driver: DriverHandle,
    in_transaction: bool,
    queries: Vec<Weak<QueryLink>>,
    /// Bumped on every close; statement ids from an older epoch are gone.
    epoch: u64,
}

impl ConnectionState {
    fn detach_queries(&mut self) -> usize {
        let mut detached = 0;
        for link in self.queries.drain(..).filter_map(|q| q.upgrade()) {
            link.detach();
            detached += 1;
        }
        detached
    }
}

pub(crate) struct ConnectionInner {
    id: u64,
    connection_string: ConnectionString,
    state: Mutex<ConnectionState>,
}

impl ConnectionInner {
    /// Run a driver hook under the connection lock.
    pub(crate) fn with_driver<R>(
        &self,
        f: impl FnOnce(&mut dyn DriverConnection) -> DbResult<R>,
    ) -> DbResult<R> {
        let mut state = self.state.lock();
        f(&mut *state.driver)
    }

    pub(crate) fn ensure_open(&self) -> DbResult<()> {
        let mut state = self.state.lock();
        if state.driver.is_open() {
            return Ok(());
        }
        open_driver(&mut state, &self.connection_string)
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Allocate a native statement, returning it with the epoch it belongs to.
    pub(crate) fn alloc_statement(&self) -> DbResult<(StatementId, u64)> {
        let mut state = self.state.lock();
        let stmt = state.driver.alloc_statement()?;
        Ok((stmt, state.epoch))
    }

    /// Disable every attached query.
    pub(crate) fn detach_all(&self) -> usize {
        self.state.lock().detach_queries()
    }

    pub(crate) fn attach(&self) -> Arc<QueryLink> {
        let link = Arc::new(QueryLink::default());
        let mut state = self.state.lock();
        state.queries.retain(|q| q.strong_count() > 0);
        state.queries.push(Arc::downgrade(&link));
        link
    }

    pub(crate) fn detach(&self, link: &Arc<QueryLink>) {
        let target = Arc::downgrade(link);
        let mut state = self.state.lock();
        state
            .queries
            .retain(|q| q.strong_count() > 0 && !Weak::ptr_eq(q, &target));
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

fn open_driver(state: &mut ConnectionState, connection_string: &ConnectionString) -> DbResult<()> {
    debug!(target: "polysql::connection", driver = %connection_string.driver, host = %connection_string.host, "opening connection");
    state.driver.open().map_err(|e| match e {
        DbError::Native { message, .. } => {
            DbError::Connection(format!("cannot open {connection_string}: {message}"))
        }
        other => other,
    })
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.detach_queries();
        if !state.driver.is_open() {
            return;
        }
        if state.in_transaction {
            if let Err(e) = state.driver.end_transaction(false) {
                warn!(target: "polysql::connection", error = %e, "rollback during teardown failed");
            }
            state.in_transaction = false;
        }
        if let Err(e) = state.driver.close() {
            warn!(target: "polysql::connection", error = %e, "closing connection failed");
        }
    }
}

/// A database connection backed by one driver.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Create an unopened connection through the process-wide driver registry.
    pub fn new(connection_string: &str) -> DbResult<Self> {
        Self::with_prefix(connection_string, DEFAULT_DRIVER_PREFIX)
    }

    /// Like [`Connection::new`], loading driver modules named `<prefix>_<driver>`.
    pub fn with_prefix(connection_string: &str, driver_prefix: &str) -> DbResult<Self> {
        let parsed = ConnectionString::parse(connection_string)?;
        let driver = DriverRegistry::global().create_connection(&parsed, driver_prefix)?;
        Ok(Self::from_handle(parsed, driver))
    }

    /// Wrap an in-process driver connection directly.
    pub fn with_driver(connection_string: ConnectionString, driver: Box<dyn DriverConnection>) -> Self {
        Self::from_handle(connection_string, DriverHandle::owned(driver))
    }

    pub(crate) fn from_handle(connection_string: ConnectionString, driver: DriverHandle) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                connection_string,
                state: Mutex::new(ConnectionState {
                    driver,
                    in_transaction: false,
                    queries: Vec::new(),
                    epoch: 0,
                }),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn inner(&self) -> &Arc<ConnectionInner> {
        &self.inner
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn connection_string(&self) -> &ConnectionString {
        &self.inner.connection_string
    }

    pub fn driver_name(&self) -> String {
        self.inner.state.lock().driver.driver_name().to_string()
    }

    pub fn server_version(&self) -> Option<String> {
        self.inner.state.lock().driver.server_version()
    }

    pub fn open(&self) -> DbResult<()> {
        self.inner.ensure_open()
    }

    /// Close the native handle. Attached queries stay attached; their
    /// statements are lost, and the next execution reopens the connection
    /// and prepares again.
    pub fn close(&self) -> DbResult<()> {
        let mut state = self.inner.state.lock();
        if !state.driver.is_open() {
            return Ok(());
        }
        if state.in_transaction {
            state.driver.end_transaction(false)?;
            state.in_transaction = false;
        }
        state.epoch += 1;
        state.driver.close()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().driver.is_open()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn begin_transaction(&self) -> DbResult<()> {
        let mut state = self.inner.state.lock();
        if state.in_transaction {
            return Err(DbError::Transaction(
                "a transaction is already in progress".to_string(),
            ));
        }
        if !state.driver.is_open() {
            open_driver(&mut state, &self.inner.connection_string)?;
        }
        state.driver.begin_transaction()?;
        state.in_transaction = true;
        Ok(())
    }

    pub fn commit_transaction(&self) -> DbResult<()> {
        self.end_transaction(true)
    }

    pub fn rollback_transaction(&self) -> DbResult<()> {
        self.end_transaction(false)
    }

    fn end_transaction(&self, commit: bool) -> DbResult<()> {
        let mut state = self.inner.state.lock();
        if !state.in_transaction {
            let action = if commit { "commit" } else { "rollback" };
            return Err(DbError::Transaction(format!("cannot {action}: no transaction in progress")));
        }
        let result = state.driver.end_transaction(commit);
        // The native transaction is finished either way once the driver
        // has been asked to end it.
        state.in_transaction = false;
        result
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.state.lock().in_transaction
    }

    // ------------------------------------------------------------------
    // Convenience
    // ------------------------------------------------------------------

    /// Execute a statement that returns no rows; returns rows affected.
    #[track_caller]
    pub fn execute(&self, sql: &str) -> DbResult<u64> {
        let mut query = Query::with_sql(self, sql);
        query.exec()?;
        Ok(query.rows_affected())
    }

    pub fn object_list(&self, kind: ObjectType) -> DbResult<Vec<String>> {
        self.inner.ensure_open()?;
        self.inner.with_driver(|d| d.object_list(kind))
    }

    /// Insert `rows` into `table`. Returns the number of rows written.
    pub fn bulk_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<TypedValue>],
    ) -> DbResult<u64> {
        self.inner.ensure_open()?;
        self.inner
            .with_driver(|d| d.bulk_insert(table, columns, rows))
    }

    /// Number of live queries attached to this connection.
    pub fn attached_queries(&self) -> usize {
        self.inner
            .state
            .lock()
            .queries
            .iter()
            .filter(|q| q.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("connection_string", &self.inner.connection_string.to_string())
            .finish()
    }
}
