//! The query state machine.
//!
//! ```text
//! UNPREPARED -> PREPARED -> DONE                      (no result columns)
//!                        -> ACTIVE <-> ACTIVE(row)    (result columns)
//!                        -> CLOSED
//! ```
//!
//! A [`Query`] refers to its connection weakly. Dropping the connection, or
//! returning the pool lease it came from, detaches the query; every later
//! operation fails with a connection error until the query is attached again
//! with [`Query::connect`]. Closing the connection only invalidates the
//! compiled statement, which is prepared again on the next execution.

use std::panic::Location;
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::connection::{Connection, ConnectionInner, QueryLink};
use crate::driver::StatementId;
use crate::error::{DbError, DbResult};
use crate::field::{FieldList, ResultField};
use crate::param::{rewrite_sql, scan_placeholders, Parameter, ParameterList, Placeholder};
use crate::value::TypedValue;

/// Observable lifecycle state of a [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Unprepared,
    Prepared,
    /// Executed, produced no result columns.
    Done,
    /// Result set open; `eof` tells whether a row is current.
    Active,
    /// Result set released; the compiled statement is kept.
    Closed,
}

struct Attachment {
    connection: Weak<ConnectionInner>,
    link: Arc<QueryLink>,
}

pub struct Query {
    sql: String,
    placeholders: Vec<Placeholder>,
    params: ParameterList,
    fields: FieldList,
    attachment: Option<Attachment>,
    statement: Option<StatementId>,
    /// Connection epoch `statement` was allocated in.
    epoch: u64,
    prepared: bool,
    active: bool,
    eof: bool,
    executed: bool,
    auto_prepare: bool,
    rows_affected: u64,
}

impl Query {
    /// Create a query with empty SQL text attached to `connection`.
    pub fn new(connection: &Connection) -> Self {
        let mut query = Self::detached();
        query.attach(connection);
        query
    }

    pub fn with_sql(connection: &Connection, sql: &str) -> Self {
        let mut query = Self::new(connection);
        query.parse_sql(sql);
        query
    }

    /// A query not attached to any connection.
    pub fn detached() -> Self {
        Self {
            sql: String::new(),
            placeholders: Vec::new(),
            params: ParameterList::new(),
            fields: FieldList::new(),
            attachment: None,
            statement: None,
            epoch: 0,
            prepared: false,
            active: false,
            eof: true,
            executed: false,
            auto_prepare: true,
            rows_affected: 0,
        }
    }

    // ========================================================================
    // Attachment
    // ========================================================================

    fn attach(&mut self, connection: &Connection) {
        let link = connection.inner().attach();
        self.attachment = Some(Attachment {
            connection: connection.downgrade(),
            link,
        });
    }

    /// Resolve the owning connection, resetting local state if it is gone.
    fn connection(&mut self) -> DbResult<Arc<ConnectionInner>> {
        if let Some(conn) = self.attached_connection() {
            return Ok(conn);
        }
        self.disconnect();
        Err(DbError::Connection(
            "query is not attached to a connection".to_string(),
        ))
    }

    /// Forget a statement the connection dropped when it was closed.
    fn discard_stale_statement(&mut self, conn: &ConnectionInner) {
        if self.statement.is_some() && conn.epoch() != self.epoch {
            debug!(target: "polysql::query", sql = %self.sql, "connection was closed; statement will be prepared again");
            self.reset_statement_state();
        }
    }

    /// Free the native statement on `conn`, logging failures.
    fn release_statement_on(&mut self, conn: &ConnectionInner) {
        let Some(stmt) = self.statement.take() else {
            return;
        };
        if conn.epoch() != self.epoch {
            return;
        }
        let active = self.active;
        let freed = conn.with_driver(|d| {
            if active {
                d.close_statement(stmt)?;
            }
            d.free_statement(stmt)
        });
        if let Err(e) = freed {
            debug!(target: "polysql::query", error = %e, "freeing statement on detach failed");
        }
    }

    fn reset_statement_state(&mut self) {
        self.statement = None;
        self.prepared = false;
        self.active = false;
        self.eof = true;
        self.executed = false;
    }

    /// Move this query to `connection`, releasing its native statement on
    /// the previous one.
    pub fn connect(&mut self, connection: &Connection) {
        if let Some(current) = self.attached_connection() {
            if current.id() == connection.id() {
                return;
            }
        }
        self.disconnect();
        self.attach(connection);
    }

    /// Release the native statement and detach from the connection.
    ///
    /// A connection that detached the query itself (a returned pool lease)
    /// still gets the statement back.
    pub fn disconnect(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            if let Some(conn) = attachment.connection.upgrade() {
                self.release_statement_on(&conn);
                conn.detach(&attachment.link);
            }
        }
        self.reset_statement_state();
    }

    fn attached_connection(&self) -> Option<Arc<ConnectionInner>> {
        let a = self.attachment.as_ref()?;
        if a.link.is_detached() {
            return None;
        }
        a.connection.upgrade()
    }

    pub fn is_attached(&self) -> bool {
        self.attached_connection().is_some()
    }

    // ========================================================================
    // SQL text and parameters
    // ========================================================================

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Replace the SQL text. A different text drops the native statement;
    /// parameter values survive for names that still appear.
    #[track_caller]
    pub fn set_sql(&mut self, sql: &str) -> DbResult<()> {
        if sql == self.sql {
            return Ok(());
        }
        if self.statement.is_some() {
            self.unprepare()?;
        }
        self.parse_sql(sql);
        Ok(())
    }

    fn parse_sql(&mut self, sql: &str) {
        self.sql = sql.to_string();
        self.placeholders = scan_placeholders(sql);
        self.params
            .rebuild(self.placeholders.iter().map(|p| p.name.as_str()));
        self.fields.clear();
        self.executed = false;
    }

    pub fn params(&self) -> &ParameterList {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParameterList {
        &mut self.params
    }

    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn param_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.get_mut(name)
    }

    /// Assign a parameter value by name.
    #[track_caller]
    pub fn set_param(&mut self, name: &str, value: impl Into<TypedValue>) -> DbResult<()> {
        let location = Location::caller();
        match self.params.get_mut(name) {
            Some(param) => {
                param.set_value(value);
                Ok(())
            }
            None => Err(DbError::native(format!("unknown parameter '{name}'"))
                .in_statement("set_param", &self.sql, location)),
        }
    }

    pub fn auto_prepare(&self) -> bool {
        self.auto_prepare
    }

    pub fn set_auto_prepare(&mut self, auto_prepare: bool) {
        self.auto_prepare = auto_prepare;
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn is_active(&self) -> bool {
        self.active
            && self
                .attached_connection()
                .is_some_and(|conn| conn.epoch() == self.epoch)
    }

    /// `true` once the result set is exhausted, or whenever the query is not
    /// active.
    pub fn eof(&self) -> bool {
        self.eof || !self.is_active()
    }

    pub fn state(&self) -> QueryState {
        if self.is_active() {
            QueryState::Active
        } else if self.executed {
            if self.fields.is_empty() {
                QueryState::Done
            } else {
                QueryState::Closed
            }
        } else if self.prepared {
            QueryState::Prepared
        } else {
            QueryState::Unprepared
        }
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    // ========================================================================
    // Results
    // ========================================================================

    pub fn fields(&self) -> &FieldList {
        &self.fields
    }

    /// Case-insensitive field lookup.
    pub fn field(&self, name: &str) -> Option<&ResultField> {
        self.fields.get(name)
    }

    pub fn field_at(&self, index: usize) -> Option<&ResultField> {
        self.fields.get_at(index)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    fn wrap(
        &self,
        operation: &'static str,
        location: &'static Location<'static>,
        err: DbError,
    ) -> DbError {
        debug!(target: "polysql::query", operation, sql = %self.sql, error = %err, "statement failed");
        err.in_statement(operation, &self.sql, location)
    }

    /// Compile the SQL. A second call without changing the text is a no-op.
    #[track_caller]
    pub fn prepare(&mut self) -> DbResult<()> {
        let location = Location::caller();
        self.prepare_at()
            .map_err(|e| self.wrap("prepare", location, e))
    }

    fn prepare_at(&mut self) -> DbResult<()> {
        if self.prepared {
            return Ok(());
        }
        let conn = self.connection()?;
        self.discard_stale_statement(&conn);
        conn.ensure_open()?;
        let stmt = match self.statement {
            Some(stmt) => stmt,
            None => {
                let (stmt, epoch) = conn.alloc_statement()?;
                self.statement = Some(stmt);
                self.epoch = epoch;
                stmt
            }
        };
        let sql = &self.sql;
        let placeholders = &self.placeholders;
        let (style, native_names) = conn.with_driver(|d| {
            let style = d.placeholder_style();
            let native_sql = rewrite_sql(sql, placeholders, style);
            debug!(target: "polysql::query", sql = %native_sql, "prepare");
            Ok((style, d.prepare(stmt, &native_sql)?))
        })?;
        match native_names {
            Some(names) => self.params.assign_driver_positions(&names),
            None => self.params.assign_positions(&self.placeholders, style),
        }
        self.prepared = true;
        Ok(())
    }

    /// Drop the native statement. The SQL text and parameters are kept.
    #[track_caller]
    pub fn unprepare(&mut self) -> DbResult<()> {
        let location = Location::caller();
        if self.statement.is_none() {
            self.prepared = false;
            return Ok(());
        }
        let conn = match self.connection() {
            Ok(conn) => conn,
            Err(_) => return Ok(()),
        };
        self.discard_stale_statement(&conn);
        let Some(stmt) = self.statement else {
            return Ok(());
        };
        let active = self.active;
        let prepared = self.prepared;
        self.statement = None;
        self.prepared = false;
        self.active = false;
        self.eof = true;
        conn.with_driver(|d| {
            if active {
                d.close_statement(stmt)?;
            }
            if prepared {
                d.unprepare(stmt)?;
            }
            d.free_statement(stmt)
        })
        .map_err(|e| self.wrap("unprepare", location, e))
    }

    /// Execute the statement and position on the first row, if any.
    #[track_caller]
    pub fn open(&mut self) -> DbResult<()> {
        let location = Location::caller();
        self.run("open", location)
    }

    /// Execute the statement. Identical to [`Query::open`]; reads better for
    /// statements without a result set.
    #[track_caller]
    pub fn exec(&mut self) -> DbResult<()> {
        let location = Location::caller();
        self.run("exec", location)
    }

    fn run(&mut self, operation: &'static str, location: &'static Location<'static>) -> DbResult<()> {
        let result = self.run_inner();
        if let Err(e) = result {
            self.abort();
            return Err(self.wrap(operation, location, e));
        }
        Ok(())
    }

    fn run_inner(&mut self) -> DbResult<()> {
        let conn = self.connection()?;
        self.discard_stale_statement(&conn);
        if self.active {
            self.close_cursor()?;
        }
        conn.ensure_open()?;

        if !self.prepared {
            if !self.auto_prepare {
                return Err(DbError::native("query is not prepared"));
            }
            self.prepare_at()?;
        }
        let stmt = self
            .statement
            .ok_or_else(|| DbError::native("query has no statement"))?;

        for param in self.params.iter_mut().filter(|p| p.is_output()) {
            param.set_null();
        }

        debug!(target: "polysql::query", sql = %self.sql, params = self.params.len(), "execute");
        let params = &mut self.params;
        let (described, affected) = conn.with_driver(|d| {
            let described = d.open_statement(stmt, params)?;
            Ok((described, d.rows_affected(stmt)))
        })?;
        self.rows_affected = affected;
        self.executed = true;

        match described {
            None => {
                self.fields.clear();
                self.active = false;
                self.eof = true;
                conn.with_driver(|d| d.close_statement(stmt))
            }
            Some(fields) => {
                self.fields.replace(fields);
                self.active = true;
                self.eof = false;
                self.fetch_row(&conn, stmt)?;
                Ok(())
            }
        }
    }

    fn fetch_row(&mut self, conn: &ConnectionInner, stmt: StatementId) -> DbResult<bool> {
        let fields = self.fields.as_mut_slice();
        let has_row = conn.with_driver(|d| d.fetch(stmt, fields))?;
        if !has_row {
            self.eof = true;
        }
        Ok(has_row)
    }

    /// Advance to the next row. Returns `false` once the result set is
    /// exhausted.
    #[track_caller]
    pub fn fetch(&mut self) -> DbResult<bool> {
        let location = Location::caller();
        self.advance("fetch", location)
    }

    /// Alias of [`Query::fetch`].
    #[track_caller]
    pub fn next(&mut self) -> DbResult<bool> {
        let location = Location::caller();
        self.advance("next", location)
    }

    fn advance(&mut self, operation: &'static str, location: &'static Location<'static>) -> DbResult<bool> {
        self.fetch_inner().map_err(|e| {
            self.abort();
            self.wrap(operation, location, e)
        })
    }

    fn fetch_inner(&mut self) -> DbResult<bool> {
        let conn = self.connection()?;
        self.discard_stale_statement(&conn);
        if !self.active {
            return Err(DbError::native("query is not open"));
        }
        if self.eof {
            return Ok(false);
        }
        let stmt = self
            .statement
            .ok_or_else(|| DbError::native("query has no statement"))?;
        self.fetch_row(&conn, stmt)
    }

    /// Release the result cursor, keeping the compiled statement. Closing a
    /// closed query does nothing.
    #[track_caller]
    pub fn close(&mut self) -> DbResult<()> {
        let location = Location::caller();
        if !self.active {
            self.eof = true;
            return Ok(());
        }
        self.close_cursor()
            .map_err(|e| self.wrap("close", location, e))
    }

    /// Close and also drop the native statement.
    #[track_caller]
    pub fn close_and_release(&mut self) -> DbResult<()> {
        let location = Location::caller();
        self.close()?;
        if self.statement.is_none() {
            self.prepared = false;
            return Ok(());
        }
        let conn = self.connection()?;
        self.discard_stale_statement(&conn);
        let Some(stmt) = self.statement else {
            return Ok(());
        };
        let prepared = self.prepared;
        self.statement = None;
        self.prepared = false;
        conn.with_driver(|d| {
            if prepared {
                d.unprepare(stmt)?;
            }
            d.free_statement(stmt)
        })
        .map_err(|e| self.wrap("release", location, e))
    }

    fn close_cursor(&mut self) -> DbResult<()> {
        self.active = false;
        self.eof = true;
        let conn = self.connection()?;
        if conn.epoch() != self.epoch {
            return Ok(());
        }
        match self.statement {
            Some(stmt) => conn.with_driver(|d| d.close_statement(stmt)),
            None => Ok(()),
        }
    }

    /// Leave the query inactive after a failed operation.
    fn abort(&mut self) {
        let was_active = self.active;
        self.active = false;
        self.eof = true;
        if !was_active {
            return;
        }
        if let (Some(stmt), Some(conn)) = (self.statement, self.attached_connection()) {
            if conn.epoch() != self.epoch {
                return;
            }
            if let Err(e) = conn.with_driver(|d| d.close_statement(stmt)) {
                debug!(target: "polysql::query", error = %e, "closing cursor after failure failed");
            }
        }
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("sql", &self.sql)
            .field("state", &self.state())
            .field("params", &self.params.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::mock_connection;
    use crate::value::DataType;

    #[test]
    fn test_repeated_placeholder_binds_every_position() {
        let (conn, state) = mock_connection();
        let mut q = Query::with_sql(&conn, "SELECT * FROM t WHERE a = :v OR b = :v OR c = :v");
        assert_eq!(q.params().len(), 1);
        q.set_param("v", 42).unwrap();
        q.exec().unwrap();

        let s = state.lock();
        let last = s.executed.last().unwrap();
        assert_eq!(last, "SELECT * FROM t WHERE a = ? OR b = ? OR c = ?");
        assert_eq!(s.binds.len(), 3);
        let positions: Vec<usize> = s.binds.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(s.binds.iter().all(|(_, v)| v.as_integer().unwrap() == 42));
    }

    #[test]
    fn test_prepare_twice_allocates_once() {
        let (conn, state) = mock_connection();
        let mut q = Query::with_sql(&conn, "UPDATE t SET a = :a");
        q.prepare().unwrap();
        q.prepare().unwrap();
        assert_eq!(q.state(), QueryState::Prepared);
        let s = state.lock();
        assert_eq!(s.allocs, 1);
        assert_eq!(s.prepares, 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (conn, state) = mock_connection();
        state.lock().set_result(&[("id", DataType::Int)], vec![vec![TypedValue::from(1)]]);
        let mut q = Query::with_sql(&conn, "SELECT id FROM t");
        q.open().unwrap();
        assert!(q.is_active());
        q.close().unwrap();
        q.close().unwrap();
        assert!(!q.is_active());
        assert!(q.eof());
        assert_eq!(q.state(), QueryState::Closed);
        assert_eq!(state.lock().cursor_closes, 1);
        // the compiled statement survives close
        q.open().unwrap();
        assert_eq!(state.lock().prepares, 1);
    }

    #[test]
    fn test_fetch_reads_every_row() {
        let (conn, state) = mock_connection();
        state.lock().set_result(
            &[("id", DataType::Int), ("name", DataType::String)],
            vec![
                vec![TypedValue::from(1), TypedValue::from("a")],
                vec![TypedValue::from(2), TypedValue::from("b")],
            ],
        );
        let mut q = Query::with_sql(&conn, "SELECT id, name FROM t");
        q.open().unwrap();
        let mut seen = Vec::new();
        while !q.eof() {
            seen.push(q.field("NAME").unwrap().as_string());
            q.fetch().unwrap();
        }
        assert_eq!(seen, vec!["a", "b"]);
        assert!(!q.fetch().unwrap());
        assert_eq!(q.field_at(0).unwrap().name(), "id");
    }

    #[test]
    fn test_dml_finishes_immediately() {
        let (conn, _state) = mock_connection();
        let mut q = Query::with_sql(&conn, "DELETE FROM t");
        q.exec().unwrap();
        assert_eq!(q.state(), QueryState::Done);
        assert!(q.eof());
        assert!(q.fields().is_empty());
        assert_eq!(q.rows_affected(), 1);
    }

    #[test]
    fn test_changing_sql_unprepares_and_keeps_values() {
        let (conn, state) = mock_connection();
        let mut q = Query::with_sql(&conn, "UPDATE t SET a = :a WHERE id = :id");
        q.set_param("id", 7).unwrap();
        q.set_param("a", "x").unwrap();
        q.prepare().unwrap();

        q.set_sql("DELETE FROM t WHERE id = :id").unwrap();
        assert!(!q.is_prepared());
        assert_eq!(q.params().len(), 1);
        assert_eq!(q.param("id").unwrap().as_integer().unwrap(), 7);
        assert_eq!(state.lock().frees, 1);

        q.set_sql("DELETE FROM t WHERE id = :id").unwrap();
        assert_eq!(state.lock().frees, 1);
    }

    #[test]
    fn test_auto_prepare_off_requires_prepare() {
        let (conn, _state) = mock_connection();
        let mut q = Query::with_sql(&conn, "DELETE FROM t");
        q.set_auto_prepare(false);
        let err = q.exec().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Statement);
        q.prepare().unwrap();
        q.exec().unwrap();
    }

    #[test]
    fn test_errors_carry_sql_and_location() {
        let (conn, state) = mock_connection();
        state.lock().fail_execute = Some("broken".to_string());
        let mut q = Query::with_sql(&conn, "SELECT broken FROM t");
        let err = q.open().unwrap_err();
        match &err {
            DbError::Statement { operation, sql, location, message } => {
                assert_eq!(*operation, "open");
                assert_eq!(sql, "SELECT broken FROM t");
                assert!(location.contains("query.rs"));
                assert!(message.contains("mock failure"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!q.is_active());
    }

    #[test]
    fn test_output_parameters_are_read_back() {
        let (conn, state) = mock_connection();
        state
            .lock()
            .output_values
            .insert("total".to_string(), TypedValue::from(99i64));
        let mut q = Query::with_sql(&conn, "CALL sum_up(:input, :total)");
        q.set_param("input", 1).unwrap();
        q.set_param("total", 5).unwrap();
        q.param_mut("total").unwrap().set_output(true);
        q.exec().unwrap();

        // the pre-bind value never reaches the driver
        let s = state.lock();
        assert!(s.binds.iter().any(|(p, v)| *p == 2 && v.is_null()));
        drop(s);
        assert_eq!(q.param("total").unwrap().as_int64().unwrap(), 99);
    }

    #[test]
    fn test_unknown_parameter_is_rejected() {
        let (conn, _state) = mock_connection();
        let mut q = Query::with_sql(&conn, "SELECT :a");
        assert!(q.set_param("b", 1).is_err());
    }

    #[test]
    fn test_connection_close_forces_new_statement() {
        let (conn, state) = mock_connection();
        let mut q = Query::with_sql(&conn, "DELETE FROM t WHERE id = :id");
        q.set_param("id", 3).unwrap();
        q.exec().unwrap();
        conn.close().unwrap();

        q.exec().unwrap();
        let s = state.lock();
        assert_eq!(s.opens, 2);
        assert_eq!(s.allocs, 2);
        assert_eq!(s.prepares, 2);
        // the old handle belonged to the closed session
        assert_eq!(s.frees, 0);
    }

    #[test]
    fn test_next_reports_its_own_operation() {
        let (conn, _state) = mock_connection();
        let mut q = Query::with_sql(&conn, "DELETE FROM t");
        match q.next().unwrap_err() {
            DbError::Statement { operation, .. } => assert_eq!(operation, "next"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_connect_moves_query() {
        let (first, first_state) = mock_connection();
        let (second, _) = mock_connection();
        let mut q = Query::with_sql(&first, "DELETE FROM t");
        q.exec().unwrap();
        q.connect(&second);
        assert_eq!(first.attached_queries(), 0);
        assert_eq!(second.attached_queries(), 1);
        assert_eq!(first_state.lock().frees, 1);
        q.exec().unwrap();

        q.disconnect();
        assert!(!q.is_attached());
        let err = q.exec().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }
}
