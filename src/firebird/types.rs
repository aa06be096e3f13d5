//! Firebird ISC type codes and date/time encodings.

use chrono::{Duration, NaiveDate};

use crate::datetime::DateTimeParts;
use crate::driver::{LobProtocol, TypeMapping};
use crate::error::{DbError, DbResult};
use crate::param::{Parameter, PlaceholderStyle};
use crate::value::DataType;

pub const SQL_TEXT: i32 = 452;
pub const SQL_VARYING: i32 = 448;
pub const SQL_SHORT: i32 = 500;
pub const SQL_LONG: i32 = 496;
pub const SQL_FLOAT: i32 = 482;
pub const SQL_DOUBLE: i32 = 480;
pub const SQL_D_FLOAT: i32 = 530;
pub const SQL_TIMESTAMP: i32 = 510;
pub const SQL_BLOB: i32 = 520;
pub const SQL_ARRAY: i32 = 540;
pub const SQL_QUAD: i32 = 550;
pub const SQL_TYPE_TIME: i32 = 560;
pub const SQL_TYPE_DATE: i32 = 570;
pub const SQL_INT64: i32 = 580;
pub const SQL_BOOLEAN: i32 = 32764;
pub const SQL_NULL: i32 = 32766;

/// Low bit of a column type code: the column accepts NULL.
pub const NULLABLE_FLAG: i32 = 1;

/// BLOB sub-type holding text.
pub const BLOB_SUBTYPE_TEXT: i16 = 1;

/// Largest BLOB segment a single put/get call moves.
pub const MAX_SEGMENT_SIZE: usize = 65535;

pub const ISC_DATE_SIZE: usize = 4;
pub const ISC_TIME_SIZE: usize = 4;
pub const ISC_TIMESTAMP_SIZE: usize = 8;

const ISC_TIME_SECONDS_PRECISION: u32 = 10_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct FirebirdTypes;

impl FirebirdTypes {
    /// Scaled integer columns (`NUMERIC(p, s)`, `DECIMAL(p, s)`) are exact
    /// decimals; BLOB sub-type 1 is text.
    pub fn column_type(&self, code: i32, size: usize, scale: i16, sub_type: i16) -> DbResult<DataType> {
        let data_type = self.field_type(code, size)?;
        Ok(match code & !NULLABLE_FLAG {
            SQL_SHORT | SQL_LONG | SQL_INT64 if scale < 0 => DataType::Money,
            SQL_BLOB if sub_type == BLOB_SUBTYPE_TEXT => DataType::Text,
            _ => data_type,
        })
    }

    pub fn is_nullable(code: i32) -> bool {
        code & NULLABLE_FLAG != 0
    }
}

impl TypeMapping for FirebirdTypes {
    fn driver(&self) -> &'static str {
        "firebird"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Question
    }

    fn lob_protocol(&self) -> LobProtocol {
        LobProtocol::TwoPhase
    }

    fn bind_type(&self, data_type: DataType) -> DbResult<i32> {
        Ok(match data_type {
            DataType::None => SQL_NULL,
            DataType::Bool => SQL_BOOLEAN,
            DataType::Int => SQL_LONG,
            DataType::Int64 => SQL_INT64,
            DataType::Float => SQL_DOUBLE,
            // sent as a scaled SQL_INT64
            DataType::Money => SQL_INT64,
            DataType::String => SQL_VARYING,
            DataType::Text | DataType::Buffer => SQL_BLOB,
            DataType::Date => SQL_TYPE_DATE,
            DataType::DateTime => SQL_TIMESTAMP,
        })
    }

    fn field_type(&self, code: i32, _size: usize) -> DbResult<DataType> {
        Ok(match code & !NULLABLE_FLAG {
            SQL_BOOLEAN => DataType::Bool,
            SQL_SHORT | SQL_LONG => DataType::Int,
            SQL_INT64 | SQL_QUAD => DataType::Int64,
            SQL_FLOAT | SQL_DOUBLE | SQL_D_FLOAT => DataType::Float,
            SQL_TEXT | SQL_VARYING => DataType::String,
            SQL_BLOB => DataType::Buffer,
            SQL_TYPE_DATE => DataType::Date,
            SQL_TYPE_TIME | SQL_TIMESTAMP => DataType::DateTime,
            SQL_NULL => DataType::None,
            _ => {
                return Err(DbError::UnsupportedType {
                    driver: "firebird",
                    code,
                })
            }
        })
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1858, 11, 17).unwrap_or_default()
}

fn read_word(bytes: &[u8], offset: usize, what: &str) -> DbResult<[u8; 4]> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| DbError::Conversion(format!("{what} needs 4 bytes at offset {offset}")))
}

/// Days since 1858-11-17.
pub fn encode_isc_date(parts: &DateTimeParts) -> DbResult<[u8; ISC_DATE_SIZE]> {
    let days = (parts.to_date()? - epoch()).num_days();
    let days = i32::try_from(days).map_err(|_| DbError::Conversion(format!("date out of range: {days} days")))?;
    Ok(days.to_le_bytes())
}

pub fn decode_isc_date(bytes: &[u8]) -> DbResult<DateTimeParts> {
    let days = i32::from_le_bytes(read_word(bytes, 0, "ISC_DATE")?);
    let date = epoch()
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| DbError::Conversion(format!("ISC_DATE {days} out of range")))?;
    Ok(DateTimeParts::from_date(date))
}

/// Time of day in 1/10000 s.
pub fn encode_isc_time(parts: &DateTimeParts) -> [u8; ISC_TIME_SIZE] {
    let seconds = parts.hour * 3600 + parts.minute * 60 + parts.second;
    let ticks = seconds * ISC_TIME_SECONDS_PRECISION + parts.millisecond * 10;
    ticks.to_le_bytes()
}

/// Fill the time fields of `parts` from an ISC_TIME.
pub fn decode_isc_time(bytes: &[u8], parts: &mut DateTimeParts) -> DbResult<()> {
    let ticks = u32::from_le_bytes(read_word(bytes, 0, "ISC_TIME")?);
    let seconds = ticks / ISC_TIME_SECONDS_PRECISION;
    parts.hour = seconds / 3600;
    parts.minute = seconds / 60 % 60;
    parts.second = seconds % 60;
    parts.millisecond = ticks % ISC_TIME_SECONDS_PRECISION / 10;
    Ok(())
}

/// ISC_TIMESTAMP: an ISC_DATE followed by an ISC_TIME.
pub fn encode_isc_timestamp(parts: &DateTimeParts) -> DbResult<[u8; ISC_TIMESTAMP_SIZE]> {
    let mut out = [0u8; ISC_TIMESTAMP_SIZE];
    out[..4].copy_from_slice(&encode_isc_date(parts)?);
    out[4..].copy_from_slice(&encode_isc_time(parts));
    Ok(out)
}

pub fn decode_isc_timestamp(bytes: &[u8]) -> DbResult<DateTimeParts> {
    let mut parts = decode_isc_date(bytes)?;
    decode_isc_time(bytes.get(4..).unwrap_or_default(), &mut parts)?;
    Ok(parts)
}

/// Write ISC_DATE or ISC_TIMESTAMP into the parameter's conversion buffer.
pub fn encode_temporal(param: &mut Parameter) -> DbResult<bool> {
    if param.is_null() {
        return Ok(false);
    }
    match param.data_type() {
        DataType::Date => {
            let packed = encode_isc_date(&DateTimeParts::from_date(param.as_date()?))?;
            param.conversion_buffer().set(&packed);
        }
        DataType::DateTime => {
            let packed = encode_isc_timestamp(&DateTimeParts::from_datetime(param.as_datetime()?))?;
            param.conversion_buffer().set(&packed);
        }
        _ => return Ok(false),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lob::{write_lob, MemoryLob};
    use crate::value::TypedValue;

    #[test]
    fn test_nullable_bit_is_ignored() {
        let t = FirebirdTypes;
        assert_eq!(t.field_type(SQL_LONG, 4).unwrap(), DataType::Int);
        assert_eq!(t.field_type(SQL_LONG | NULLABLE_FLAG, 4).unwrap(), DataType::Int);
        assert_eq!(t.field_type(SQL_VARYING + 1, 40).unwrap(), DataType::String);
        assert!(FirebirdTypes::is_nullable(SQL_TYPE_DATE + 1));
        assert!(!FirebirdTypes::is_nullable(SQL_TYPE_DATE));
        assert!(matches!(
            t.field_type(SQL_ARRAY, 0),
            Err(DbError::UnsupportedType { driver: "firebird", code: SQL_ARRAY })
        ));
    }

    #[test]
    fn test_scaled_and_text_columns() {
        let t = FirebirdTypes;
        assert_eq!(t.column_type(SQL_INT64, 8, -2, 0).unwrap(), DataType::Money);
        assert_eq!(t.column_type(SQL_INT64 | 1, 8, 0, 0).unwrap(), DataType::Int64);
        assert_eq!(t.column_type(SQL_BLOB | 1, 8, 0, BLOB_SUBTYPE_TEXT).unwrap(), DataType::Text);
        assert_eq!(t.column_type(SQL_BLOB, 8, 0, 0).unwrap(), DataType::Buffer);
    }

    #[test]
    fn test_isc_date_epoch() {
        assert_eq!(encode_isc_date(&DateTimeParts::date(1858, 11, 17)).unwrap(), 0i32.to_le_bytes());
        // MJD of the Unix epoch
        assert_eq!(encode_isc_date(&DateTimeParts::date(1970, 1, 1)).unwrap(), 40587i32.to_le_bytes());
        let before = encode_isc_date(&DateTimeParts::date(1858, 11, 16)).unwrap();
        assert_eq!(decode_isc_date(&before).unwrap(), DateTimeParts::date(1858, 11, 16));
    }

    #[test]
    fn test_isc_timestamp() {
        let parts = DateTimeParts {
            year: 2024,
            month: 5,
            day: 6,
            hour: 13,
            minute: 14,
            second: 15,
            millisecond: 160,
        };
        let packed = encode_isc_timestamp(&parts).unwrap();
        let ticks = u32::from_le_bytes([packed[4], packed[5], packed[6], packed[7]]);
        assert_eq!(ticks, (13 * 3600 + 14 * 60 + 15) * 10_000 + 1600);
        assert_eq!(decode_isc_timestamp(&packed).unwrap(), parts);
        assert!(decode_isc_timestamp(&packed[..6]).is_err());
    }

    #[test]
    fn test_encode_temporal_parameter() {
        let mut param = Parameter::new("d");
        param.set_value(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap());
        assert!(encode_temporal(&mut param).unwrap());
        assert_eq!(param.conversion_buffer().len(), ISC_DATE_SIZE);

        param.set_value(TypedValue::null(DataType::Date));
        assert!(!encode_temporal(&mut param).unwrap());
    }

    #[test]
    fn test_blob_segments_are_bounded() {
        let payload = vec![1u8; 200_000];
        let mut blob = MemoryLob::new(MAX_SEGMENT_SIZE);
        assert_eq!(write_lob(&mut blob, &payload).unwrap(), 4);
        assert_eq!(blob.data().len(), payload.len());
    }
}
