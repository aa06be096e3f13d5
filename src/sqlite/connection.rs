//! SQLite driver connection.

use std::collections::VecDeque;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use super::types::{declared_type, read_value, to_sql_value, type_code};
use crate::config::ConnectionString;
use crate::driver::{insert_statement, DriverConnection, ObjectType, StatementId, StatementSlab};
use crate::error::{DbError, DbResult};
use crate::field::ResultField;
use crate::param::{ParameterList, PlaceholderStyle};
use crate::value::{DataType, TypedValue};

pub const SQLITE_TABLES_QUERY: &str = r#"
SELECT name
FROM sqlite_master
WHERE type = 'table'
  AND name NOT LIKE 'sqlite_%'
ORDER BY name
"#;

pub const SQLITE_VIEWS_QUERY: &str = r#"
SELECT name
FROM sqlite_master
WHERE type = 'view'
ORDER BY name
"#;

pub const SQLITE_TRIGGERS_QUERY: &str = r#"
SELECT name
FROM sqlite_master
WHERE type = 'trigger'
ORDER BY name
"#;

/// `PRAGMA database_list` returns (seq, name, file)
pub const SQLITE_DATABASES_QUERY: &str = "PRAGMA database_list";

#[derive(Debug, Clone)]
struct Column {
    name: String,
    data_type: DataType,
    size: usize,
}

/// Per-statement state. Rows are buffered at execute time because a
/// `rusqlite::Statement` borrows its connection.
#[derive(Debug, Default)]
struct SqliteStatement {
    sql: Option<String>,
    columns: Vec<Column>,
    parameter_count: usize,
    bound: Vec<Value>,
    rows: VecDeque<Vec<Value>>,
    changes: u64,
}

/// A SQLite connection.
pub struct SqliteConnection {
    path: String,
    conn: Option<Connection>,
    statements: StatementSlab<SqliteStatement>,
}

impl SqliteConnection {
    /// Create an unopened connection for a database path.
    ///
    /// Supports:
    /// - `:memory:` (or an empty path) for an in-memory database
    /// - a file path for a disk-based database
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            conn: None,
            statements: StatementSlab::new(),
        }
    }

    /// `sqlite3://:memory:`, `sqlite3://relative/file.db`, `sqlite3:///abs/file.db`
    pub fn from_connection_string(cs: &ConnectionString) -> Self {
        let path = match (cs.host.as_str(), cs.database.as_deref()) {
            ("", Some(db)) => format!("/{db}"),
            (host, Some(db)) => format!("{host}/{db}"),
            (host, None) => host.to_string(),
        };
        Self::new(&path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn is_memory(&self) -> bool {
        self.path.is_empty() || self.path == ":memory:"
    }

    fn conn(&self) -> DbResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| DbError::Connection("sqlite3 connection is closed".to_string()))
    }

    fn query_names(&self, sql: &str, column: usize) -> DbResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(column))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

impl DriverConnection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite3"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Named(':')
    }

    fn open(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = if self.is_memory() {
            Connection::open_in_memory()?
        } else {
            Connection::open(&self.path)?
        };

        // Performance pragmas for file-based databases
        if !self.is_memory() {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA busy_timeout=5000;
                 PRAGMA cache_size=-64000;", // 64MB cache
            )?;
        }

        debug!(target: "polysql::sqlite", path = %self.path, "opened database");
        self.conn = Some(conn);
        Ok(())
    }

    fn close(&mut self) -> DbResult<()> {
        self.statements.clear();
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| DbError::from(e))?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn server_version(&self) -> Option<String> {
        Some(rusqlite::version().to_string())
    }

    fn alloc_statement(&mut self) -> DbResult<StatementId> {
        self.conn()?;
        Ok(self.statements.insert(SqliteStatement::default()))
    }

    fn free_statement(&mut self, stmt: StatementId) -> DbResult<()> {
        self.statements.remove(stmt);
        Ok(())
    }

    fn close_statement(&mut self, stmt: StatementId) -> DbResult<()> {
        let statement = self.statements.get_mut(stmt)?;
        statement.rows.clear();
        Ok(())
    }

    fn prepare(&mut self, stmt: StatementId, sql: &str) -> DbResult<Option<Vec<String>>> {
        let conn = self.conn.as_ref().ok_or_else(|| {
            DbError::Connection("sqlite3 connection is closed".to_string())
        })?;
        // compiles once and keeps the statement in rusqlite's cache
        let compiled = conn.prepare_cached(sql)?;

        let parameter_count = compiled.parameter_count();
        let names: Vec<String> = (1..=parameter_count)
            .map(|i| compiled.parameter_name(i).unwrap_or("").to_string())
            .collect();
        let columns: Vec<Column> = compiled
            .columns()
            .iter()
            .map(|c| {
                let (data_type, size) = declared_type(c.decl_type());
                Column {
                    name: c.name().to_string(),
                    data_type,
                    size,
                }
            })
            .collect();
        drop(compiled);

        let statement = self.statements.get_mut(stmt)?;
        statement.sql = Some(sql.to_string());
        statement.columns = columns;
        statement.parameter_count = parameter_count;
        statement.bound = vec![Value::Null; parameter_count];
        statement.rows.clear();
        Ok(Some(names))
    }

    fn unprepare(&mut self, stmt: StatementId) -> DbResult<()> {
        let statement = self.statements.get_mut(stmt)?;
        *statement = SqliteStatement::default();
        Ok(())
    }

    fn bind_parameters(&mut self, stmt: StatementId, params: &mut ParameterList) -> DbResult<()> {
        let statement = self.statements.get_mut(stmt)?;
        let mut bound = vec![Value::Null; statement.parameter_count];
        for param in params.iter() {
            let value = to_sql_value(param.value())?;
            for &position in param.bind_positions() {
                if let Some(slot) = position.checked_sub(1).and_then(|i| bound.get_mut(i)) {
                    *slot = value.clone();
                }
            }
        }
        statement.bound = bound;
        Ok(())
    }

    fn execute(&mut self, stmt: StatementId, _params: &mut ParameterList) -> DbResult<()> {
        let conn = self.conn.as_ref().ok_or_else(|| {
            DbError::Connection("sqlite3 connection is closed".to_string())
        })?;
        let statement = self.statements.get_mut(stmt)?;
        let sql = statement
            .sql
            .as_deref()
            .ok_or_else(|| DbError::native("statement is not prepared"))?;

        let mut compiled = conn.prepare_cached(sql)?;
        for (index, value) in statement.bound.iter().enumerate() {
            compiled.raw_bind_parameter(index + 1, value)?;
        }

        statement.rows.clear();
        if statement.columns.is_empty() {
            statement.changes = compiled.raw_execute()? as u64;
            return Ok(());
        }

        let width = statement.columns.len();
        let mut rows = compiled.raw_query();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(Value::from(row.get_ref(i)?));
            }
            statement.rows.push_back(values);
        }
        statement.changes = 0;
        Ok(())
    }

    fn rows_affected(&self, stmt: StatementId) -> u64 {
        self.statements.get(stmt).map(|s| s.changes).unwrap_or(0)
    }

    fn column_count(&mut self, stmt: StatementId) -> DbResult<usize> {
        Ok(self.statements.get(stmt)?.columns.len())
    }

    fn describe_columns(&mut self, stmt: StatementId) -> DbResult<Vec<ResultField>> {
        let statement = self.statements.get(stmt)?;
        Ok(statement
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| ResultField::new(c.name.as_str(), i, c.data_type, type_code(c.data_type), c.size))
            .collect())
    }

    fn fetch(&mut self, stmt: StatementId, fields: &mut [ResultField]) -> DbResult<bool> {
        let statement = self.statements.get_mut(stmt)?;
        let Some(row) = statement.rows.pop_front() else {
            return Ok(false);
        };
        for ((field, column), value) in fields.iter_mut().zip(&statement.columns).zip(&row) {
            read_value(field, column.data_type, value.into())?;
        }
        Ok(true)
    }

    fn begin_transaction(&mut self) -> DbResult<()> {
        self.conn()?.execute_batch("BEGIN")?;
        Ok(())
    }

    fn end_transaction(&mut self, commit: bool) -> DbResult<()> {
        self.conn()?
            .execute_batch(if commit { "COMMIT" } else { "ROLLBACK" })?;
        Ok(())
    }

    fn object_list(&mut self, kind: ObjectType) -> DbResult<Vec<String>> {
        match kind {
            ObjectType::Tables => self.query_names(SQLITE_TABLES_QUERY, 0),
            ObjectType::Views => self.query_names(SQLITE_VIEWS_QUERY, 0),
            ObjectType::Triggers => self.query_names(SQLITE_TRIGGERS_QUERY, 0),
            ObjectType::Databases => self.query_names(SQLITE_DATABASES_QUERY, 1),
            ObjectType::Procedures | ObjectType::Functions => Err(DbError::native(format!(
                "sqlite3 driver cannot list {}",
                kind.name()
            ))),
        }
    }

    /// One transaction and one cached statement for all rows.
    fn bulk_insert(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<TypedValue>],
    ) -> DbResult<u64> {
        let conn = self.conn()?;
        let (sql, _) = insert_statement(table, columns, PlaceholderStyle::Question);
        let own_transaction = conn.is_autocommit();
        if own_transaction {
            conn.execute_batch("BEGIN")?;
        }

        let result = (|| -> DbResult<u64> {
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut inserted = 0;
            for (index, row) in rows.iter().enumerate() {
                if row.len() != columns.len() {
                    return Err(DbError::native(format!(
                        "bulk insert row {index} has {} values, expected {}",
                        row.len(),
                        columns.len()
                    )));
                }
                let values = row.iter().map(to_sql_value).collect::<DbResult<Vec<_>>>()?;
                inserted += stmt.execute(params_from_iter(values))? as u64;
            }
            Ok(inserted)
        })();

        if own_transaction {
            let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
            if let Err(e) = conn.execute_batch(end) {
                if result.is_ok() {
                    return Err(e.into());
                }
                debug!(target: "polysql::sqlite", error = %e, "rollback after failed bulk insert failed");
            }
        }
        result
    }
}
