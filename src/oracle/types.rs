//! Oracle external type codes (`SQLT_*`), DATE encoding and LOB insert SQL.

use crate::datetime::DateTimeParts;
use crate::driver::{LobProtocol, TypeMapping};
use crate::error::{DbError, DbResult};
use crate::param::{Parameter, PlaceholderStyle};
use crate::value::DataType;

pub const SQLT_CHR: i32 = 1;
pub const SQLT_NUM: i32 = 2;
pub const SQLT_INT: i32 = 3;
pub const SQLT_FLT: i32 = 4;
pub const SQLT_STR: i32 = 5;
pub const SQLT_VNU: i32 = 6;
pub const SQLT_LNG: i32 = 8;
pub const SQLT_VCS: i32 = 9;
pub const SQLT_DAT: i32 = 12;
pub const SQLT_BFLOAT: i32 = 21;
pub const SQLT_BDOUBLE: i32 = 22;
pub const SQLT_BIN: i32 = 23;
pub const SQLT_LBI: i32 = 24;
pub const SQLT_UIN: i32 = 68;
pub const SQLT_LVC: i32 = 94;
pub const SQLT_LVB: i32 = 95;
pub const SQLT_AFC: i32 = 96;
pub const SQLT_AVC: i32 = 97;
pub const SQLT_IBFLOAT: i32 = 100;
pub const SQLT_IBDOUBLE: i32 = 101;
pub const SQLT_RDD: i32 = 104;
pub const SQLT_CLOB: i32 = 112;
pub const SQLT_BLOB: i32 = 113;
pub const SQLT_DATE: i32 = 184;
pub const SQLT_TIMESTAMP: i32 = 187;
pub const SQLT_TIMESTAMP_TZ: i32 = 188;
pub const SQLT_TIMESTAMP_LTZ: i32 = 232;

pub const ORACLE_DATE_SIZE: usize = 7;

/// Largest piece written to a LOB locator in one call.
pub const LOB_SEGMENT_SIZE: usize = 32767;

#[derive(Debug, Clone, Copy, Default)]
pub struct OracleTypes;

impl TypeMapping for OracleTypes {
    fn driver(&self) -> &'static str {
        "oracle"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered(':')
    }

    fn lob_protocol(&self) -> LobProtocol {
        LobProtocol::TwoPhase
    }

    fn bind_type(&self, data_type: DataType) -> DbResult<i32> {
        Ok(match data_type {
            DataType::None | DataType::String => SQLT_STR,
            DataType::Bool | DataType::Int | DataType::Int64 => SQLT_INT,
            DataType::Float => SQLT_BDOUBLE,
            // exact decimals travel as text
            DataType::Money => SQLT_STR,
            DataType::Text => SQLT_CLOB,
            DataType::Buffer => SQLT_BLOB,
            DataType::Date | DataType::DateTime => SQLT_DAT,
        })
    }

    fn field_type(&self, code: i32, _size: usize) -> DbResult<DataType> {
        Ok(match code {
            SQLT_INT | SQLT_UIN => DataType::Int64,
            SQLT_NUM | SQLT_VNU => DataType::Float,
            SQLT_FLT | SQLT_BFLOAT | SQLT_BDOUBLE | SQLT_IBFLOAT | SQLT_IBDOUBLE => DataType::Float,
            SQLT_CHR | SQLT_STR | SQLT_VCS | SQLT_AFC | SQLT_AVC | SQLT_RDD => DataType::String,
            SQLT_LNG | SQLT_LVC | SQLT_CLOB => DataType::Text,
            SQLT_BIN | SQLT_LBI | SQLT_LVB | SQLT_BLOB => DataType::Buffer,
            // Oracle DATE always carries a time of day
            SQLT_DAT | SQLT_DATE => DataType::DateTime,
            SQLT_TIMESTAMP | SQLT_TIMESTAMP_TZ | SQLT_TIMESTAMP_LTZ => DataType::DateTime,
            other => {
                return Err(DbError::UnsupportedType {
                    driver: "oracle",
                    code: other,
                })
            }
        })
    }
}

/// Narrow a `NUMBER(precision, scale)` column to the tag that holds it
/// without loss.
pub fn number_type(precision: u8, scale: i8) -> DataType {
    match (precision, scale) {
        (1..=9, 0) => DataType::Int,
        (10..=18, 0) => DataType::Int64,
        (_, 1..=18) => DataType::Money,
        _ => DataType::Float,
    }
}

/// `[century+100, year+100, month, day, hour+1, minute+1, second+1]`
pub fn encode_oracle_date(parts: &DateTimeParts) -> DbResult<[u8; ORACLE_DATE_SIZE]> {
    if !(1..=9999).contains(&parts.year) {
        return Err(DbError::Conversion(format!("year {} out of range for Oracle DATE", parts.year)));
    }
    // rejects out-of-range month, day and time fields
    parts.to_datetime()?;
    Ok([
        (parts.year / 100 + 100) as u8,
        (parts.year % 100 + 100) as u8,
        parts.month as u8,
        parts.day as u8,
        parts.hour as u8 + 1,
        parts.minute as u8 + 1,
        parts.second as u8 + 1,
    ])
}

pub fn decode_oracle_date(bytes: &[u8]) -> DbResult<DateTimeParts> {
    if bytes.len() < ORACLE_DATE_SIZE {
        return Err(DbError::Conversion(format!(
            "Oracle DATE needs {ORACLE_DATE_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    let century = i32::from(bytes[0]) - 100;
    let year = i32::from(bytes[1]) - 100;
    Ok(DateTimeParts {
        year: century * 100 + year,
        month: u32::from(bytes[2]),
        day: u32::from(bytes[3]),
        hour: u32::from(bytes[4].saturating_sub(1)),
        minute: u32::from(bytes[5].saturating_sub(1)),
        second: u32::from(bytes[6].saturating_sub(1)),
        millisecond: 0,
    })
}

/// Encode a date/timestamp parameter as Oracle DATE in its conversion
/// buffer. Milliseconds do not survive.
pub fn encode_temporal(param: &mut Parameter) -> DbResult<bool> {
    if param.is_null() {
        return Ok(false);
    }
    let parts = match param.data_type() {
        DataType::Date => DateTimeParts::from_date(param.as_date()?),
        DataType::DateTime => DateTimeParts::from_datetime(param.as_datetime()?),
        _ => return Ok(false),
    };
    let packed = encode_oracle_date(&parts)?;
    param.conversion_buffer().set(&packed);
    Ok(true)
}

/// Build the first phase of a LOB insert.
///
/// LOB columns are inserted as `EMPTY_BLOB()`/`EMPTY_CLOB()` and returned
/// as locators bound to a parameter of the column's name; every other
/// column binds `:name`. Returns the SQL and the locator parameter names.
pub fn lob_insert_sql(table: &str, columns: &[(&str, DataType)]) -> DbResult<(String, Vec<String>)> {
    if columns.is_empty() {
        return Err(DbError::native(format!("insert into {table} names no columns")));
    }
    let mut values = Vec::with_capacity(columns.len());
    let mut locators = Vec::new();
    for (name, data_type) in columns {
        match data_type {
            DataType::Buffer => {
                values.push("EMPTY_BLOB()".to_string());
                locators.push(name.to_string());
            }
            DataType::Text => {
                values.push("EMPTY_CLOB()".to_string());
                locators.push(name.to_string());
            }
            _ => values.push(format!(":{name}")),
        }
    }
    let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    let mut sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        names.join(", "),
        values.join(", ")
    );
    if !locators.is_empty() {
        let targets: Vec<String> = locators.iter().map(|name| format!(":{name}")).collect();
        sql.push_str(&format!(" RETURNING {} INTO {}", locators.join(", "), targets.join(", ")));
    }
    Ok((sql, locators))
}
