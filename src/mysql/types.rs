//! MySQL type codes (`enum_field_types`) and `MYSQL_TIME` encoding.

use crate::datetime::DateTimeParts;
use crate::driver::{LobProtocol, TypeMapping};
use crate::error::{DbError, DbResult};
use crate::param::{Parameter, PlaceholderStyle};
use crate::value::DataType;

pub const MYSQL_TYPE_DECIMAL: i32 = 0;
pub const MYSQL_TYPE_TINY: i32 = 1;
pub const MYSQL_TYPE_SHORT: i32 = 2;
pub const MYSQL_TYPE_LONG: i32 = 3;
pub const MYSQL_TYPE_FLOAT: i32 = 4;
pub const MYSQL_TYPE_DOUBLE: i32 = 5;
pub const MYSQL_TYPE_NULL: i32 = 6;
pub const MYSQL_TYPE_TIMESTAMP: i32 = 7;
pub const MYSQL_TYPE_LONGLONG: i32 = 8;
pub const MYSQL_TYPE_INT24: i32 = 9;
pub const MYSQL_TYPE_DATE: i32 = 10;
pub const MYSQL_TYPE_TIME: i32 = 11;
pub const MYSQL_TYPE_DATETIME: i32 = 12;
pub const MYSQL_TYPE_YEAR: i32 = 13;
pub const MYSQL_TYPE_NEWDATE: i32 = 14;
pub const MYSQL_TYPE_VARCHAR: i32 = 15;
pub const MYSQL_TYPE_BIT: i32 = 16;
pub const MYSQL_TYPE_JSON: i32 = 245;
pub const MYSQL_TYPE_NEWDECIMAL: i32 = 246;
pub const MYSQL_TYPE_ENUM: i32 = 247;
pub const MYSQL_TYPE_SET: i32 = 248;
pub const MYSQL_TYPE_TINY_BLOB: i32 = 249;
pub const MYSQL_TYPE_MEDIUM_BLOB: i32 = 250;
pub const MYSQL_TYPE_LONG_BLOB: i32 = 251;
pub const MYSQL_TYPE_BLOB: i32 = 252;
pub const MYSQL_TYPE_VAR_STRING: i32 = 253;
pub const MYSQL_TYPE_STRING: i32 = 254;
pub const MYSQL_TYPE_GEOMETRY: i32 = 255;

/// Character set number the server reports for binary columns.
pub const BINARY_CHARSET: u32 = 63;

/// Size of a packed `MYSQL_TIME` on LP64 targets.
pub const MYSQL_TIME_SIZE: usize = 40;

/// `enum_mysql_timestamp_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TimestampKind {
    Date = 0,
    DateTime = 1,
    Time = 2,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlTypes;

impl MysqlTypes {
    /// BLOB-family columns carry both TEXT and BLOB; the character set
    /// tells them apart.
    pub fn field_type_with_charset(&self, code: i32, size: usize, charset: u32) -> DbResult<DataType> {
        let data_type = self.field_type(code, size)?;
        if data_type == DataType::Buffer && is_blob_family(code) && charset != BINARY_CHARSET {
            return Ok(DataType::Text);
        }
        Ok(data_type)
    }
}

fn is_blob_family(code: i32) -> bool {
    matches!(
        code,
        MYSQL_TYPE_TINY_BLOB | MYSQL_TYPE_MEDIUM_BLOB | MYSQL_TYPE_LONG_BLOB | MYSQL_TYPE_BLOB
    )
}

impl TypeMapping for MysqlTypes {
    fn driver(&self) -> &'static str {
        "mysql"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Question
    }

    fn lob_protocol(&self) -> LobProtocol {
        LobProtocol::Direct
    }

    fn bind_type(&self, data_type: DataType) -> DbResult<i32> {
        Ok(match data_type {
            DataType::None => MYSQL_TYPE_NULL,
            DataType::Bool => MYSQL_TYPE_TINY,
            DataType::Int => MYSQL_TYPE_LONG,
            DataType::Int64 => MYSQL_TYPE_LONGLONG,
            DataType::Float => MYSQL_TYPE_DOUBLE,
            DataType::Money => MYSQL_TYPE_NEWDECIMAL,
            DataType::String => MYSQL_TYPE_STRING,
            DataType::Text => MYSQL_TYPE_STRING,
            DataType::Buffer => MYSQL_TYPE_BLOB,
            DataType::Date => MYSQL_TYPE_DATE,
            DataType::DateTime => MYSQL_TYPE_DATETIME,
        })
    }

    fn field_type(&self, code: i32, size: usize) -> DbResult<DataType> {
        Ok(match code {
            // TINYINT(1) is how MySQL spells BOOL
            MYSQL_TYPE_TINY if size == 1 => DataType::Bool,
            MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_LONG | MYSQL_TYPE_INT24 | MYSQL_TYPE_YEAR => {
                DataType::Int
            }
            MYSQL_TYPE_LONGLONG | MYSQL_TYPE_BIT => DataType::Int64,
            MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => DataType::Float,
            MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => DataType::Money,
            MYSQL_TYPE_NULL => DataType::None,
            MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => DataType::Date,
            MYSQL_TYPE_TIMESTAMP | MYSQL_TYPE_DATETIME | MYSQL_TYPE_TIME => DataType::DateTime,
            MYSQL_TYPE_VARCHAR
            | MYSQL_TYPE_VAR_STRING
            | MYSQL_TYPE_STRING
            | MYSQL_TYPE_ENUM
            | MYSQL_TYPE_SET
            | MYSQL_TYPE_JSON => DataType::String,
            MYSQL_TYPE_TINY_BLOB
            | MYSQL_TYPE_MEDIUM_BLOB
            | MYSQL_TYPE_LONG_BLOB
            | MYSQL_TYPE_BLOB
            | MYSQL_TYPE_GEOMETRY => DataType::Buffer,
            other => {
                return Err(DbError::UnsupportedType {
                    driver: "mysql",
                    code: other,
                })
            }
        })
    }
}

fn put_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Pack date/time parts into a `MYSQL_TIME`.
///
/// Layout: six `unsigned int` fields (year..second), `unsigned long`
/// microseconds, the `neg` flag, padding, then the timestamp kind.
pub fn encode_mysql_time(parts: &DateTimeParts, kind: TimestampKind) -> DbResult<[u8; MYSQL_TIME_SIZE]> {
    let year = u32::try_from(parts.year)
        .map_err(|_| DbError::Conversion(format!("year {} out of range for MySQL", parts.year)))?;
    let mut out = [0u8; MYSQL_TIME_SIZE];
    put_u32(&mut out, 0, year);
    put_u32(&mut out, 4, parts.month);
    put_u32(&mut out, 8, parts.day);
    if kind != TimestampKind::Date {
        put_u32(&mut out, 12, parts.hour);
        put_u32(&mut out, 16, parts.minute);
        put_u32(&mut out, 20, parts.second);
        out[24..32].copy_from_slice(&(u64::from(parts.millisecond) * 1000).to_le_bytes());
    }
    out[36..40].copy_from_slice(&(kind as i32).to_le_bytes());
    Ok(out)
}

/// Unpack a `MYSQL_TIME`. Microseconds are truncated to milliseconds.
pub fn decode_mysql_time(bytes: &[u8]) -> DbResult<DateTimeParts> {
    if bytes.len() < MYSQL_TIME_SIZE {
        return Err(DbError::Conversion(format!(
            "MYSQL_TIME needs {MYSQL_TIME_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    let mut micros = [0u8; 8];
    micros.copy_from_slice(&bytes[24..32]);
    let micros = u64::from_le_bytes(micros);
    Ok(DateTimeParts {
        year: get_u32(bytes, 0) as i32,
        month: get_u32(bytes, 4),
        day: get_u32(bytes, 8),
        hour: get_u32(bytes, 12),
        minute: get_u32(bytes, 16),
        second: get_u32(bytes, 20),
        millisecond: (micros / 1000 % 1000) as u32,
    })
}

/// Fill the parameter's conversion buffer with a `MYSQL_TIME` when it
/// holds a date or timestamp. Returns whether anything was written.
pub fn encode_temporal(param: &mut Parameter) -> DbResult<bool> {
    if param.is_null() {
        return Ok(false);
    }
    let (parts, kind) = match param.data_type() {
        DataType::Date => (DateTimeParts::from_date(param.as_date()?), TimestampKind::Date),
        DataType::DateTime => (
            DateTimeParts::from_datetime(param.as_datetime()?),
            TimestampKind::DateTime,
        ),
        _ => return Ok(false),
    };
    let packed = encode_mysql_time(&parts, kind)?;
    param.conversion_buffer().set(&packed);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_field_types() {
        let t = MysqlTypes;
        assert_eq!(t.field_type(MYSQL_TYPE_TINY, 1).unwrap(), DataType::Bool);
        assert_eq!(t.field_type(MYSQL_TYPE_TINY, 4).unwrap(), DataType::Int);
        assert_eq!(t.field_type(MYSQL_TYPE_NEWDECIMAL, 12).unwrap(), DataType::Money);
        assert_eq!(t.field_type(MYSQL_TYPE_NEWDATE, 3).unwrap(), DataType::Date);
        assert_eq!(t.field_type(MYSQL_TYPE_TIMESTAMP, 19).unwrap(), DataType::DateTime);
        assert_eq!(t.field_type(MYSQL_TYPE_VAR_STRING, 40).unwrap(), DataType::String);

        let err = t.field_type(100, 0).unwrap_err();
        assert!(matches!(err, DbError::UnsupportedType { driver: "mysql", code: 100 }));
    }

    #[test]
    fn test_blob_family_uses_charset() {
        let t = MysqlTypes;
        assert_eq!(
            t.field_type_with_charset(MYSQL_TYPE_BLOB, 65535, BINARY_CHARSET).unwrap(),
            DataType::Buffer
        );
        assert_eq!(t.field_type_with_charset(MYSQL_TYPE_BLOB, 65535, 33).unwrap(), DataType::Text);
        assert_eq!(t.field_type_with_charset(MYSQL_TYPE_LONG, 11, 33).unwrap(), DataType::Int);
    }

    #[test]
    fn test_bind_types_cover_every_tag() {
        let t = MysqlTypes;
        assert_eq!(t.bind_type(DataType::Int64).unwrap(), MYSQL_TYPE_LONGLONG);
        assert_eq!(t.bind_type(DataType::Buffer).unwrap(), MYSQL_TYPE_BLOB);
        assert_eq!(t.bind_type(DataType::DateTime).unwrap(), MYSQL_TYPE_DATETIME);
        assert_eq!(t.lob_protocol(), LobProtocol::Direct);
    }

    #[test]
    fn test_mysql_time_layout() {
        let parts = DateTimeParts {
            year: 2024,
            month: 2,
            day: 29,
            hour: 23,
            minute: 59,
            second: 58,
            millisecond: 125,
        };
        let packed = encode_mysql_time(&parts, TimestampKind::DateTime).unwrap();
        assert_eq!(&packed[0..4], &2024u32.to_le_bytes());
        assert_eq!(&packed[24..32], &125_000u64.to_le_bytes());
        assert_eq!(&packed[36..40], &1i32.to_le_bytes());
        assert_eq!(decode_mysql_time(&packed).unwrap(), parts);

        assert!(decode_mysql_time(&packed[..20]).is_err());
        assert!(encode_mysql_time(&DateTimeParts::date(-1, 1, 1), TimestampKind::Date).is_err());
    }

    #[test]
    fn test_encode_temporal_parameter() {
        let mut param = Parameter::new("d");
        param.set_value(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap());
        assert!(encode_temporal(&mut param).unwrap());
        let packed = param.conversion_buffer().bytes().to_vec();
        assert_eq!(packed.len(), MYSQL_TIME_SIZE);
        let parts = decode_mysql_time(&packed).unwrap();
        assert_eq!((parts.year, parts.month, parts.day), (1999, 12, 31));
        assert!(!parts.has_time());

        param.set_value(5);
        assert!(!encode_temporal(&mut param).unwrap());
    }
}
