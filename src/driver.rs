//! The capability contract every driver implements.
//!
//! A driver owns its native connection handle and every native statement
//! allocated on it. Queries refer to those statements only through a
//! [`StatementId`], so no native handle ever outlives its connection.

use std::collections::HashMap;

use crate::error::{DbError, DbResult};
use crate::field::ResultField;
use crate::param::{ParameterList, PlaceholderStyle};
use crate::value::{DataType, TypedValue};

/// Handle to a native statement owned by a driver connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub u64);

/// Database object kinds that can be enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Tables,
    Views,
    Procedures,
    Functions,
    Triggers,
    Databases,
}

impl ObjectType {
    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Tables => "tables",
            ObjectType::Views => "views",
            ObjectType::Procedures => "procedures",
            ObjectType::Functions => "functions",
            ObjectType::Triggers => "triggers",
            ObjectType::Databases => "databases",
        }
    }
}

/// How a driver moves BLOB/CLOB payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobProtocol {
    /// Bytes go straight to the native bind call with a length.
    Direct,
    /// An empty LOB is created first and the payload streamed into its
    /// locator in bounded segments.
    TwoPhase,
}

/// Translation between [`DataType`] tags and a driver's native type codes.
pub trait TypeMapping {
    fn driver(&self) -> &'static str;

    fn placeholder_style(&self) -> PlaceholderStyle;

    fn lob_protocol(&self) -> LobProtocol;

    /// Native type used to bind a value of `data_type`.
    fn bind_type(&self, data_type: DataType) -> DbResult<i32>;

    /// Tag used to decode a column of native type `code`.
    ///
    /// Unknown codes fail with [`DbError::UnsupportedType`].
    fn field_type(&self, code: i32, size: usize) -> DbResult<DataType>;
}

/// Per-driver connection hooks.
///
/// [`crate::Connection`] supplies the shared bookkeeping (transaction flag,
/// attached queries, locking) and calls into these hooks; [`crate::Query`]
/// drives the statement hooks through its state machine.
pub trait DriverConnection: Send {
    fn driver_name(&self) -> &str;

    fn placeholder_style(&self) -> PlaceholderStyle;

    fn open(&mut self) -> DbResult<()>;

    fn close(&mut self) -> DbResult<()>;

    fn is_open(&self) -> bool;

    fn server_version(&self) -> Option<String> {
        None
    }

    // --- statements ---

    fn alloc_statement(&mut self) -> DbResult<StatementId>;

    fn free_statement(&mut self, stmt: StatementId) -> DbResult<()>;

    /// Release the result cursor, keeping the compiled statement.
    fn close_statement(&mut self, stmt: StatementId) -> DbResult<()>;

    /// Compile `sql`. Drivers that can describe their placeholders return
    /// the name of every native position in order.
    fn prepare(&mut self, stmt: StatementId, sql: &str) -> DbResult<Option<Vec<String>>>;

    fn unprepare(&mut self, stmt: StatementId) -> DbResult<()>;

    /// Write every parameter value to all of its bind positions.
    fn bind_parameters(&mut self, stmt: StatementId, params: &mut ParameterList) -> DbResult<()>;

    /// Run the statement. Output parameters are read back into `params`.
    fn execute(&mut self, stmt: StatementId, params: &mut ParameterList) -> DbResult<()>;

    fn rows_affected(&self, _stmt: StatementId) -> u64 {
        0
    }

    fn column_count(&mut self, stmt: StatementId) -> DbResult<usize>;

    fn describe_columns(&mut self, stmt: StatementId) -> DbResult<Vec<ResultField>>;

    /// Attach native output buffers to freshly described fields.
    fn bind_result(&mut self, _stmt: StatementId, _fields: &mut [ResultField]) -> DbResult<()> {
        Ok(())
    }

    /// Read the next row into `fields`. Returns `false` when no rows remain.
    fn fetch(&mut self, stmt: StatementId, fields: &mut [ResultField]) -> DbResult<bool>;

    /// Full open sequence: bind, execute, and describe the result shape.
    ///
    /// Returns `None` for statements without output columns.
    fn open_statement(
        &mut self,
        stmt: StatementId,
        params: &mut ParameterList,
    ) -> DbResult<Option<Vec<ResultField>>> {
        self.bind_parameters(stmt, params)?;
        self.execute(stmt, params)?;
        if self.column_count(stmt)? == 0 {
            return Ok(None);
        }
        let mut fields = self.describe_columns(stmt)?;
        self.bind_result(stmt, &mut fields)?;
        Ok(Some(fields))
    }

    // --- transactions ---

    fn begin_transaction(&mut self) -> DbResult<()>;

    fn end_transaction(&mut self, commit: bool) -> DbResult<()>;

    // --- extras ---

    fn object_list(&mut self, kind: ObjectType) -> DbResult<Vec<String>> {
        Err(DbError::native(format!(
            "{} driver cannot list {}",
            self.driver_name(),
            kind.name()
        )))
    }

    /// Insert many rows. The default is a row-at-a-time parameterized
    /// INSERT; drivers with a native bulk path override it.
    fn bulk_insert(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<TypedValue>],
    ) -> DbResult<u64> {
        generic_bulk_insert(self, table, columns, rows)
    }
}

/// Build `INSERT INTO table (cols) VALUES (markers)` for a placeholder style.
///
/// Parameters are named `p1..pn` so arbitrary column names stay usable.
pub fn insert_statement(
    table: &str,
    columns: &[String],
    style: PlaceholderStyle,
) -> (String, Vec<String>) {
    let names: Vec<String> = (1..=columns.len()).map(|i| format!("p{i}")).collect();
    let markers: Vec<String> = names
        .iter()
        .enumerate()
        .map(|(i, name)| match style {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Numbered(prefix) => format!("{prefix}{}", i + 1),
            PlaceholderStyle::Named(prefix) => format!("{prefix}{name}"),
        })
        .collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        markers.join(", ")
    );
    (sql, names)
}

/// Row-at-a-time bulk insert over the statement hooks.
pub fn generic_bulk_insert<D: DriverConnection + ?Sized>(
    driver: &mut D,
    table: &str,
    columns: &[String],
    rows: &[Vec<TypedValue>],
) -> DbResult<u64> {
    let (sql, names) = insert_statement(table, columns, driver.placeholder_style());
    let stmt = driver.alloc_statement()?;
    let inserted = insert_rows(driver, stmt, &sql, &names, rows);
    let freed = driver.free_statement(stmt);
    let inserted = inserted?;
    freed?;
    Ok(inserted)
}

fn insert_rows<D: DriverConnection + ?Sized>(
    driver: &mut D,
    stmt: StatementId,
    sql: &str,
    names: &[String],
    rows: &[Vec<TypedValue>],
) -> DbResult<u64> {
    driver.prepare(stmt, sql)?;
    let mut inserted = 0;
    for (index, row) in rows.iter().enumerate() {
        if row.len() != names.len() {
            return Err(DbError::native(format!(
                "bulk insert row {index} has {} values, expected {}",
                row.len(),
                names.len()
            )));
        }
        let mut params = ParameterList::from_values(names, row);
        driver.bind_parameters(stmt, &mut params)?;
        driver.execute(stmt, &mut params)?;
        driver.close_statement(stmt)?;
        inserted += 1;
    }
    Ok(inserted)
}

/// Id-keyed storage for a driver's native statements.
#[derive(Debug)]
pub struct StatementSlab<T> {
    next_id: u64,
    statements: HashMap<StatementId, T>,
}

impl<T> Default for StatementSlab<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            statements: HashMap::new(),
        }
    }
}

impl<T> StatementSlab<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, statement: T) -> StatementId {
        let id = StatementId(self.next_id);
        self.next_id += 1;
        self.statements.insert(id, statement);
        id
    }

    pub fn get(&self, id: StatementId) -> DbResult<&T> {
        self.statements
            .get(&id)
            .ok_or_else(|| DbError::native(format!("statement {} is not allocated", id.0)))
    }

    pub fn get_mut(&mut self, id: StatementId) -> DbResult<&mut T> {
        self.statements
            .get_mut(&id)
            .ok_or_else(|| DbError::native(format!("statement {} is not allocated", id.0)))
    }

    pub fn remove(&mut self, id: StatementId) -> Option<T> {
        self.statements.remove(&id)
    }

    pub fn clear(&mut self) {
        self.statements.clear();
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
