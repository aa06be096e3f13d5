//! Error types for polysql.
//!
//! Every native driver failure is captured at the point it happens and
//! wrapped into one [`DbError`]. Statement failures carry the operation name,
//! the SQL text and the caller's source location.

use std::panic::Location;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("{operation}: {message}\nSQL: {sql}\nat {location}")]
    Statement {
        operation: &'static str,
        message: String,
        sql: String,
        location: String,
    },

    #[error("Native driver error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Native { code: Option<i32>, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Type conversion error: {0}")]
    Conversion(String),

    #[error("Unsupported {driver} native type code {code}")]
    UnsupportedType { driver: &'static str, code: i32 },

    #[error("Timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),

    #[error("Driver module not found: {0}")]
    DriverNotFound(String),

    #[error("Symbol '{symbol}' not found in driver module '{module}'")]
    SymbolNotFound { module: String, symbol: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Coarse classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Statement,
    Transaction,
    Type,
    Resource,
    Config,
}

impl DbError {
    /// Build a native driver error without a vendor code.
    pub fn native(message: impl Into<String>) -> Self {
        DbError::Native {
            code: None,
            message: message.into(),
        }
    }

    /// Build a native driver error carrying the vendor error code.
    pub fn native_code(code: i32, message: impl Into<String>) -> Self {
        DbError::Native {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Connection(_) => ErrorKind::Connection,
            DbError::Statement { .. } | DbError::Native { .. } => ErrorKind::Statement,
            DbError::Transaction(_) => ErrorKind::Transaction,
            DbError::Conversion(_) | DbError::UnsupportedType { .. } => ErrorKind::Type,
            DbError::PoolTimeout(_)
            | DbError::DriverNotFound(_)
            | DbError::SymbolNotFound { .. }
            | DbError::IoError(_) => ErrorKind::Resource,
            DbError::Config(_) => ErrorKind::Config,
        }
    }

    /// Attach operation, SQL text and source location to a driver failure.
    ///
    /// Errors that already describe something other than the statement
    /// (connection, transaction, type, resource) pass through unchanged.
    pub fn in_statement(self, operation: &'static str, sql: &str, location: &Location<'_>) -> Self {
        match self {
            DbError::Native { code, message } => DbError::Statement {
                operation,
                message: match code {
                    Some(code) => format!("[{code}] {message}"),
                    None => message,
                },
                sql: sql.to_string(),
                location: format!("{}:{}", location.file(), location.line()),
            },
            other => other,
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
