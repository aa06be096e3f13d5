//! ODBC SQL type codes and date/timestamp structs.

use crate::datetime::DateTimeParts;
use crate::driver::{LobProtocol, TypeMapping};
use crate::error::{DbError, DbResult};
use crate::param::{Parameter, PlaceholderStyle};
use crate::value::DataType;

pub const SQL_CHAR: i32 = 1;
pub const SQL_NUMERIC: i32 = 2;
pub const SQL_DECIMAL: i32 = 3;
pub const SQL_INTEGER: i32 = 4;
pub const SQL_SMALLINT: i32 = 5;
pub const SQL_FLOAT: i32 = 6;
pub const SQL_REAL: i32 = 7;
pub const SQL_DOUBLE: i32 = 8;
/// ODBC 2.x `SQL_DATE`; shares its value with `SQL_DATETIME`.
pub const SQL_DATE: i32 = 9;
pub const SQL_TIME: i32 = 10;
pub const SQL_TIMESTAMP: i32 = 11;
pub const SQL_VARCHAR: i32 = 12;
pub const SQL_TYPE_DATE: i32 = 91;
pub const SQL_TYPE_TIME: i32 = 92;
pub const SQL_TYPE_TIMESTAMP: i32 = 93;
pub const SQL_LONGVARCHAR: i32 = -1;
pub const SQL_BINARY: i32 = -2;
pub const SQL_VARBINARY: i32 = -3;
pub const SQL_LONGVARBINARY: i32 = -4;
pub const SQL_BIGINT: i32 = -5;
pub const SQL_TINYINT: i32 = -6;
pub const SQL_BIT: i32 = -7;
pub const SQL_WCHAR: i32 = -8;
pub const SQL_WVARCHAR: i32 = -9;
pub const SQL_WLONGVARCHAR: i32 = -10;
pub const SQL_GUID: i32 = -11;

// SQL Server extensions
pub const SQL_SS_XML: i32 = -152;
pub const SQL_SS_TIME2: i32 = -154;
pub const SQL_SS_TIMESTAMPOFFSET: i32 = -155;

pub const SQL_DATE_STRUCT_SIZE: usize = 6;
pub const SQL_TIMESTAMP_STRUCT_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct OdbcTypes;

impl TypeMapping for OdbcTypes {
    fn driver(&self) -> &'static str {
        "odbc"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Question
    }

    fn lob_protocol(&self) -> LobProtocol {
        LobProtocol::Direct
    }

    fn bind_type(&self, data_type: DataType) -> DbResult<i32> {
        Ok(match data_type {
            // NULL binds need a concrete type; every driver accepts VARCHAR
            DataType::None => SQL_VARCHAR,
            DataType::Bool => SQL_BIT,
            DataType::Int => SQL_INTEGER,
            DataType::Int64 => SQL_BIGINT,
            DataType::Float => SQL_DOUBLE,
            DataType::Money => SQL_DECIMAL,
            DataType::String => SQL_VARCHAR,
            DataType::Text => SQL_LONGVARCHAR,
            DataType::Buffer => SQL_LONGVARBINARY,
            DataType::Date => SQL_TYPE_DATE,
            DataType::DateTime => SQL_TYPE_TIMESTAMP,
        })
    }

    fn field_type(&self, code: i32, _size: usize) -> DbResult<DataType> {
        Ok(match code {
            SQL_BIT => DataType::Bool,
            SQL_TINYINT | SQL_SMALLINT | SQL_INTEGER => DataType::Int,
            SQL_BIGINT => DataType::Int64,
            SQL_REAL | SQL_FLOAT | SQL_DOUBLE => DataType::Float,
            SQL_NUMERIC | SQL_DECIMAL => DataType::Money,
            SQL_CHAR | SQL_VARCHAR | SQL_WCHAR | SQL_WVARCHAR | SQL_GUID => DataType::String,
            SQL_LONGVARCHAR | SQL_WLONGVARCHAR | SQL_SS_XML => DataType::Text,
            SQL_BINARY | SQL_VARBINARY | SQL_LONGVARBINARY => DataType::Buffer,
            SQL_DATE | SQL_TYPE_DATE => DataType::Date,
            SQL_TIME
            | SQL_TIMESTAMP
            | SQL_TYPE_TIME
            | SQL_TYPE_TIMESTAMP
            | SQL_SS_TIME2
            | SQL_SS_TIMESTAMPOFFSET => DataType::DateTime,
            other => {
                return Err(DbError::UnsupportedType {
                    driver: "odbc",
                    code: other,
                })
            }
        })
    }
}

fn year_i16(year: i32) -> DbResult<i16> {
    i16::try_from(year).map_err(|_| DbError::Conversion(format!("year {year} out of range for ODBC")))
}

fn get_u16(bytes: &[u8], offset: usize) -> u32 {
    u32::from(u16::from_le_bytes([bytes[offset], bytes[offset + 1]]))
}

fn check_len(bytes: &[u8], needed: usize, what: &str) -> DbResult<()> {
    if bytes.len() < needed {
        return Err(DbError::Conversion(format!(
            "{what} needs {needed} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

/// `SQL_DATE_STRUCT { SQLSMALLINT year; SQLUSMALLINT month; SQLUSMALLINT day; }`
pub fn encode_date_struct(parts: &DateTimeParts) -> DbResult<[u8; SQL_DATE_STRUCT_SIZE]> {
    let mut out = [0u8; SQL_DATE_STRUCT_SIZE];
    out[0..2].copy_from_slice(&year_i16(parts.year)?.to_le_bytes());
    out[2..4].copy_from_slice(&(parts.month as u16).to_le_bytes());
    out[4..6].copy_from_slice(&(parts.day as u16).to_le_bytes());
    Ok(out)
}

pub fn decode_date_struct(bytes: &[u8]) -> DbResult<DateTimeParts> {
    check_len(bytes, SQL_DATE_STRUCT_SIZE, "SQL_DATE_STRUCT")?;
    let year = i16::from_le_bytes([bytes[0], bytes[1]]);
    Ok(DateTimeParts::date(i32::from(year), get_u16(bytes, 2), get_u16(bytes, 4)))
}

/// `SQL_TIMESTAMP_STRUCT`: year, month, day, hour, minute, second as
/// 16-bit values followed by a 32-bit fraction in nanoseconds.
pub fn encode_timestamp_struct(parts: &DateTimeParts) -> DbResult<[u8; SQL_TIMESTAMP_STRUCT_SIZE]> {
    let mut out = [0u8; SQL_TIMESTAMP_STRUCT_SIZE];
    out[0..6].copy_from_slice(&encode_date_struct(parts)?);
    out[6..8].copy_from_slice(&(parts.hour as u16).to_le_bytes());
    out[8..10].copy_from_slice(&(parts.minute as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(parts.second as u16).to_le_bytes());
    out[12..16].copy_from_slice(&(parts.millisecond * 1_000_000).to_le_bytes());
    Ok(out)
}

pub fn decode_timestamp_struct(bytes: &[u8]) -> DbResult<DateTimeParts> {
    check_len(bytes, SQL_TIMESTAMP_STRUCT_SIZE, "SQL_TIMESTAMP_STRUCT")?;
    let mut parts = decode_date_struct(bytes)?;
    parts.hour = get_u16(bytes, 6);
    parts.minute = get_u16(bytes, 8);
    parts.second = get_u16(bytes, 10);
    let fraction = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    parts.millisecond = fraction / 1_000_000;
    Ok(parts)
}

/// Write the packed struct for a date or timestamp parameter into its
/// conversion buffer.
pub fn encode_temporal(param: &mut Parameter) -> DbResult<bool> {
    if param.is_null() {
        return Ok(false);
    }
    match param.data_type() {
        DataType::Date => {
            let packed = encode_date_struct(&DateTimeParts::from_date(param.as_date()?))?;
            param.conversion_buffer().set(&packed);
        }
        DataType::DateTime => {
            let packed = encode_timestamp_struct(&DateTimeParts::from_datetime(param.as_datetime()?))?;
            param.conversion_buffer().set(&packed);
        }
        _ => return Ok(false),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_field_types() {
        let t = OdbcTypes;
        assert_eq!(t.field_type(SQL_BIT, 1).unwrap(), DataType::Bool);
        assert_eq!(t.field_type(SQL_BIGINT, 8).unwrap(), DataType::Int64);
        assert_eq!(t.field_type(SQL_DECIMAL, 10).unwrap(), DataType::Money);
        assert_eq!(t.field_type(SQL_WVARCHAR, 50).unwrap(), DataType::String);
        assert_eq!(t.field_type(SQL_WLONGVARCHAR, 0).unwrap(), DataType::Text);
        assert_eq!(t.field_type(SQL_TYPE_DATE, 10).unwrap(), DataType::Date);
        assert_eq!(t.field_type(SQL_SS_TIMESTAMPOFFSET, 34).unwrap(), DataType::DateTime);
        assert!(matches!(
            t.field_type(-360, 0),
            Err(DbError::UnsupportedType { driver: "odbc", code: -360 })
        ));
    }

    #[test]
    fn test_bind_types() {
        let t = OdbcTypes;
        assert_eq!(t.bind_type(DataType::Text).unwrap(), SQL_LONGVARCHAR);
        assert_eq!(t.bind_type(DataType::Buffer).unwrap(), SQL_LONGVARBINARY);
        assert_eq!(t.bind_type(DataType::DateTime).unwrap(), SQL_TYPE_TIMESTAMP);
        assert_eq!(t.placeholder_style(), PlaceholderStyle::Question);
    }

    #[test]
    fn test_timestamp_struct_fraction_is_nanoseconds() {
        let parts = DateTimeParts {
            year: 2020,
            month: 7,
            day: 4,
            hour: 12,
            minute: 30,
            second: 15,
            millisecond: 500,
        };
        let packed = encode_timestamp_struct(&parts).unwrap();
        assert_eq!(&packed[0..2], &2020i16.to_le_bytes());
        assert_eq!(&packed[12..16], &500_000_000u32.to_le_bytes());
        assert_eq!(decode_timestamp_struct(&packed).unwrap(), parts);
    }

    #[test]
    fn test_date_struct() {
        let parts = DateTimeParts::date(1970, 1, 1);
        let packed = encode_date_struct(&parts).unwrap();
        assert_eq!(packed, [0xB2, 0x07, 1, 0, 1, 0]);
        assert_eq!(decode_date_struct(&packed).unwrap(), parts);
        assert!(decode_date_struct(&packed[..4]).is_err());
        assert!(encode_date_struct(&DateTimeParts::date(40_000, 1, 1)).is_err());
    }

    #[test]
    fn test_encode_temporal_parameter() {
        let mut param = Parameter::new("ts");
        let dt = NaiveDate::from_ymd_opt(2001, 2, 3)
            .unwrap()
            .and_hms_milli_opt(4, 5, 6, 7)
            .unwrap();
        param.set_value(dt);
        assert!(encode_temporal(&mut param).unwrap());
        let parts = decode_timestamp_struct(param.conversion_buffer().bytes()).unwrap();
        assert_eq!(parts.to_datetime().unwrap(), dt);

        param.set_value("text");
        assert!(!encode_temporal(&mut param).unwrap());
    }
}
