//! In-process fake driver for unit tests.
//!
//! `MockDriver` serves a canned result set for every `SELECT`, reports one
//! affected row for everything else, and records the calls it receives in
//! a shared [`MockState`].

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr};
use std::sync::{Arc, Once};

use parking_lot::Mutex;

use crate::config::ConnectionString;
use crate::connection::Connection;
use crate::driver::{DriverConnection, ObjectType, StatementId, StatementSlab};
use crate::error::{DbError, DbResult};
use crate::field::ResultField;
use crate::param::{ParameterList, PlaceholderStyle};
use crate::registry::DriverRegistry;
use crate::value::{DataType, TypedValue};

#[derive(Debug, Default)]
pub struct MockState {
    pub opens: usize,
    pub closed: bool,
    pub fail_open: bool,
    pub allocs: usize,
    pub frees: usize,
    pub prepares: usize,
    pub cursor_closes: usize,
    /// `(position, value)` pairs of the most recent bind.
    pub binds: Vec<(usize, TypedValue)>,
    pub executed: Vec<String>,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub columns: Vec<(String, DataType)>,
    pub rows: Vec<Vec<TypedValue>>,
    pub output_values: HashMap<String, TypedValue>,
    /// Executing SQL containing this text fails.
    pub fail_execute: Option<String>,
}

impl MockState {
    pub fn set_result(&mut self, columns: &[(&str, DataType)], rows: Vec<Vec<TypedValue>>) {
        self.columns = columns
            .iter()
            .map(|(name, dt)| (name.to_string(), *dt))
            .collect();
        self.rows = rows;
    }
}

pub type SharedMockState = Arc<Mutex<MockState>>;

#[derive(Debug, Default)]
struct MockStatement {
    sql: Option<String>,
    is_query: bool,
    cursor: usize,
}

pub struct MockDriver {
    state: SharedMockState,
    open: bool,
    statements: StatementSlab<MockStatement>,
}

impl MockDriver {
    pub fn new(state: SharedMockState) -> Self {
        Self {
            state,
            open: false,
            statements: StatementSlab::new(),
        }
    }
}

impl DriverConnection for MockDriver {
    fn driver_name(&self) -> &str {
        "mock"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Question
    }

    fn open(&mut self) -> DbResult<()> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(DbError::native("mock server unreachable"));
        }
        state.opens += 1;
        state.closed = false;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> DbResult<()> {
        self.statements.clear();
        self.open = false;
        self.state.lock().closed = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn alloc_statement(&mut self) -> DbResult<StatementId> {
        self.state.lock().allocs += 1;
        Ok(self.statements.insert(MockStatement::default()))
    }

    fn free_statement(&mut self, stmt: StatementId) -> DbResult<()> {
        self.state.lock().frees += 1;
        self.statements.remove(stmt);
        Ok(())
    }

    fn close_statement(&mut self, stmt: StatementId) -> DbResult<()> {
        let statement = self.statements.get_mut(stmt)?;
        if statement.is_query {
            self.state.lock().cursor_closes += 1;
        }
        statement.cursor = 0;
        Ok(())
    }

    fn prepare(&mut self, stmt: StatementId, sql: &str) -> DbResult<Option<Vec<String>>> {
        self.state.lock().prepares += 1;
        let statement = self.statements.get_mut(stmt)?;
        statement.sql = Some(sql.to_string());
        statement.is_query = sql.trim_start().to_ascii_uppercase().starts_with("SELECT");
        Ok(None)
    }

    fn unprepare(&mut self, stmt: StatementId) -> DbResult<()> {
        self.statements.get_mut(stmt)?.sql = None;
        Ok(())
    }

    fn bind_parameters(&mut self, stmt: StatementId, params: &mut ParameterList) -> DbResult<()> {
        self.statements.get(stmt)?;
        let mut binds = Vec::new();
        for param in params.iter() {
            for &position in param.bind_positions() {
                binds.push((position, param.value().clone()));
            }
        }
        binds.sort_by_key(|(position, _)| *position);
        self.state.lock().binds = binds;
        Ok(())
    }

    fn execute(&mut self, stmt: StatementId, params: &mut ParameterList) -> DbResult<()> {
        let statement = self.statements.get_mut(stmt)?;
        let sql = statement
            .sql
            .clone()
            .ok_or_else(|| DbError::native("statement is not prepared"))?;
        statement.cursor = 0;
        let mut state = self.state.lock();
        if let Some(pattern) = &state.fail_execute {
            if sql.contains(pattern.as_str()) {
                return Err(DbError::native_code(1, "mock failure"));
            }
        }
        for param in params.iter_mut().filter(|p| p.is_output()) {
            if let Some(value) = state.output_values.get(param.name()) {
                param.set_value(value.clone());
            }
        }
        state.executed.push(sql);
        Ok(())
    }

    fn rows_affected(&self, stmt: StatementId) -> u64 {
        match self.statements.get(stmt) {
            Ok(statement) if !statement.is_query => 1,
            _ => 0,
        }
    }

    fn column_count(&mut self, stmt: StatementId) -> DbResult<usize> {
        if !self.statements.get(stmt)?.is_query {
            return Ok(0);
        }
        Ok(self.state.lock().columns.len())
    }

    fn describe_columns(&mut self, _stmt: StatementId) -> DbResult<Vec<ResultField>> {
        Ok(self
            .state
            .lock()
            .columns
            .iter()
            .enumerate()
            .map(|(i, (name, dt))| ResultField::new(name.as_str(), i, *dt, 0, dt.fixed_size()))
            .collect())
    }

    fn fetch(&mut self, stmt: StatementId, fields: &mut [ResultField]) -> DbResult<bool> {
        let statement = self.statements.get_mut(stmt)?;
        let state = self.state.lock();
        let Some(row) = state.rows.get(statement.cursor) else {
            return Ok(false);
        };
        for (field, value) in fields.iter_mut().zip(row) {
            **field = value.clone();
        }
        statement.cursor += 1;
        Ok(true)
    }

    fn begin_transaction(&mut self) -> DbResult<()> {
        self.state.lock().begins += 1;
        Ok(())
    }

    fn end_transaction(&mut self, commit: bool) -> DbResult<()> {
        let mut state = self.state.lock();
        if commit {
            state.commits += 1;
        } else {
            state.rollbacks += 1;
        }
        Ok(())
    }

    fn object_list(&mut self, kind: ObjectType) -> DbResult<Vec<String>> {
        match kind {
            ObjectType::Tables => Ok(vec!["t".to_string()]),
            other => Err(DbError::native(format!("mock cannot list {}", other.name()))),
        }
    }
}

/// A fresh unopened connection over a mock driver plus its recorded state.
pub fn mock_connection() -> (Connection, SharedMockState) {
    let state = SharedMockState::default();
    let driver = MockDriver::new(state.clone());
    let cs = ConnectionString::parse("mock://tester@localhost/test").unwrap();
    (Connection::with_driver(cs, Box::new(driver)), state)
}

// ============================================================================
// Registry entry points
// ============================================================================

unsafe extern "C" fn mock_create_connection(connection_string: *const c_char) -> *mut c_void {
    if connection_string.is_null() {
        return std::ptr::null_mut();
    }
    let text = unsafe { CStr::from_ptr(connection_string) }.to_string_lossy();
    if text.contains("refuse") {
        return std::ptr::null_mut();
    }
    let driver: Box<dyn DriverConnection> = Box::new(MockDriver::new(SharedMockState::default()));
    Box::into_raw(Box::new(driver)) as *mut c_void
}

unsafe extern "C" fn mock_destroy_connection(connection: *mut c_void) {
    if !connection.is_null() {
        drop(unsafe { Box::from_raw(connection as *mut Box<dyn DriverConnection>) });
    }
}

/// Make the `mock` driver available through the process-wide registry.
pub fn register_mock_driver() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        DriverRegistry::global().register("mock", mock_create_connection, mock_destroy_connection);
    });
}
