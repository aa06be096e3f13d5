//! SQLite type mapping.
//!
//! SQLite stores five storage classes; declared column types only carry an
//! affinity. Columns are described from the declared type, and values are
//! decoded from whatever storage class the row actually holds.

use chrono::NaiveDateTime;
use rusqlite::types::{Value, ValueRef};

use crate::datetime::{parse_date, parse_datetime};
use crate::driver::{LobProtocol, TypeMapping};
use crate::error::{DbError, DbResult};
use crate::field::ResultField;
use crate::money::Money;
use crate::param::PlaceholderStyle;
use crate::value::{DataType, TypedValue};

pub const SQLITE_INTEGER: i32 = 1;
pub const SQLITE_FLOAT: i32 = 2;
pub const SQLITE_TEXT: i32 = 3;
pub const SQLITE_BLOB: i32 = 4;
pub const SQLITE_NULL: i32 = 5;

/// Initial buffer size for variable-length columns without a declared size.
pub const DEFAULT_VARIABLE_SIZE: usize = 256;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATETIME_MS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteTypes;

impl TypeMapping for SqliteTypes {
    fn driver(&self) -> &'static str {
        "sqlite3"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Named(':')
    }

    fn lob_protocol(&self) -> LobProtocol {
        LobProtocol::Direct
    }

    fn bind_type(&self, data_type: DataType) -> DbResult<i32> {
        Ok(match data_type {
            DataType::None => SQLITE_NULL,
            DataType::Bool | DataType::Int | DataType::Int64 => SQLITE_INTEGER,
            DataType::Float => SQLITE_FLOAT,
            DataType::Money
            | DataType::String
            | DataType::Text
            | DataType::Date
            | DataType::DateTime => SQLITE_TEXT,
            DataType::Buffer => SQLITE_BLOB,
        })
    }

    fn field_type(&self, code: i32, _size: usize) -> DbResult<DataType> {
        match code {
            SQLITE_INTEGER => Ok(DataType::Int64),
            SQLITE_FLOAT => Ok(DataType::Float),
            SQLITE_TEXT => Ok(DataType::String),
            SQLITE_BLOB => Ok(DataType::Buffer),
            SQLITE_NULL => Ok(DataType::None),
            other => Err(DbError::UnsupportedType {
                driver: "sqlite3",
                code: other,
            }),
        }
    }
}

/// Column tag and initial buffer size from a declared column type.
///
/// Follows SQLite's affinity rules, with DATE/TIME and money-like names
/// recognised before them.
pub fn declared_type(decl: Option<&str>) -> (DataType, usize) {
    let Some(decl) = decl else {
        return (DataType::None, DEFAULT_VARIABLE_SIZE);
    };
    let upper = decl.to_ascii_uppercase();
    let data_type = if upper.contains("DATETIME") || upper.contains("TIMESTAMP") {
        DataType::DateTime
    } else if upper.contains("DATE") {
        DataType::Date
    } else if upper.contains("BOOL") {
        DataType::Bool
    } else if upper.contains("INT") {
        DataType::Int64
    } else if upper.contains("CLOB") || upper.contains("TEXT") {
        DataType::Text
    } else if upper.contains("CHAR") {
        DataType::String
    } else if upper.contains("BLOB") {
        DataType::Buffer
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        DataType::Float
    } else if upper.contains("MONEY") || upper.contains("DECIMAL") || upper.contains("NUMERIC") {
        DataType::Money
    } else {
        DataType::None
    };
    let size = if data_type.is_variable_length() || data_type == DataType::None {
        declared_size(&upper).unwrap_or(DEFAULT_VARIABLE_SIZE)
    } else {
        data_type.fixed_size()
    };
    (data_type, size)
}

/// `VARCHAR(40)` -> 40
fn declared_size(decl: &str) -> Option<usize> {
    let open = decl.find('(')?;
    let close = decl[open..].find(')')? + open;
    decl[open + 1..close].split(',').next()?.trim().parse().ok()
}

pub fn type_code(data_type: DataType) -> i32 {
    SqliteTypes.bind_type(data_type).unwrap_or(SQLITE_NULL)
}

fn format_datetime(dt: NaiveDateTime) -> String {
    if dt.and_utc().timestamp_subsec_millis() == 0 {
        dt.format(DATETIME_FORMAT).to_string()
    } else {
        dt.format(DATETIME_MS_FORMAT).to_string()
    }
}

/// Encode a value in the storage class it binds as.
pub fn to_sql_value(value: &TypedValue) -> DbResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    Ok(match value.data_type() {
        DataType::None => Value::Null,
        DataType::Bool => Value::Integer(value.as_bool()? as i64),
        DataType::Int | DataType::Int64 => Value::Integer(value.as_int64()?),
        DataType::Float => Value::Real(value.as_float()?),
        DataType::Money => Value::Text(value.as_money()?.to_string()),
        DataType::String | DataType::Text => Value::Text(value.as_string()),
        DataType::Buffer => Value::Blob(value.as_bytes()),
        DataType::Date => Value::Text(value.as_date()?.format(DATE_FORMAT).to_string()),
        DataType::DateTime => Value::Text(format_datetime(value.as_datetime()?)),
    })
}

/// Decode one stored value into a result field, keeping the column's
/// declared type where the stored class allows it.
pub fn read_value(field: &mut ResultField, declared: DataType, value: ValueRef<'_>) -> DbResult<()> {
    match value {
        ValueRef::Null => field.set_null_as(declared),
        ValueRef::Integer(i) => match declared {
            DataType::Bool => field.set_bool(i != 0),
            DataType::Int => match i32::try_from(i) {
                Ok(v) => field.set_integer(v),
                Err(_) => field.set_int64(i),
            },
            DataType::Float => field.set_float(i as f64),
            DataType::Money => field.set_money(Money::new(i, 0)?),
            DataType::DateTime | DataType::Date => match chrono::DateTime::from_timestamp(i, 0) {
                Some(dt) if declared == DataType::Date => field.set_date(dt.date_naive()),
                Some(dt) => field.set_datetime(dt.naive_utc()),
                None => field.set_int64(i),
            },
            _ => field.set_int64(i),
        },
        ValueRef::Real(f) => match declared {
            DataType::Money => field.set_money(Money::from_f64(f, 4)?),
            _ => field.set_float(f),
        },
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| DbError::Conversion(format!("column '{}': {e}", field.name())))?;
            match declared {
                DataType::Date => match parse_date(text) {
                    Some(date) => field.set_date(date),
                    None => field.set_from_bytes(DataType::String, bytes),
                },
                DataType::DateTime => match parse_datetime(text) {
                    Some(dt) => field.set_datetime(dt),
                    None => field.set_from_bytes(DataType::String, bytes),
                },
                DataType::Money => match text.trim().parse::<Money>() {
                    Ok(money) => field.set_money(money),
                    Err(_) => field.set_from_bytes(DataType::String, bytes),
                },
                DataType::Text => field.set_from_bytes(DataType::Text, bytes),
                _ => field.set_from_bytes(DataType::String, bytes),
            }
        }
        ValueRef::Blob(bytes) => field.set_from_bytes(DataType::Buffer, bytes),
    }
    Ok(())
}
