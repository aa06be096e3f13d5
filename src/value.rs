//! The tagged scalar exchanged between application code and drivers.
//!
//! A [`TypedValue`] carries a [`DataType`] tag, a payload matching that tag,
//! and two flags: null and external. Re-typing through a setter always drops
//! the previous payload first. A NULL value keeps its type tag so drivers can
//! still report the SQL type a NULL column would have had.

use std::fmt;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::datetime::{parse_date, parse_datetime};
use crate::error::{DbError, DbResult};
use crate::money::Money;

/// Scale used when a float or integer is coerced to money.
const DEFAULT_MONEY_SCALE: u8 = 4;

/// Type tag of a [`TypedValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    #[default]
    None,
    Bool,
    Int,
    Int64,
    Float,
    Money,
    String,
    Text,
    Buffer,
    Date,
    DateTime,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::None => "none",
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::Int64 => "int64",
            DataType::Float => "float",
            DataType::Money => "money",
            DataType::String => "string",
            DataType::Text => "text",
            DataType::Buffer => "buffer",
            DataType::Date => "date",
            DataType::DateTime => "datetime",
        }
    }

    /// String, text and buffer payloads live on the heap.
    pub fn is_variable_length(self) -> bool {
        matches!(self, DataType::String | DataType::Text | DataType::Buffer)
    }

    /// In-memory size of a fixed-length payload.
    pub fn fixed_size(self) -> usize {
        match self {
            DataType::None | DataType::String | DataType::Text | DataType::Buffer => 0,
            DataType::Bool => 1,
            DataType::Int | DataType::Date => 4,
            DataType::Int64 | DataType::Float | DataType::Money | DataType::DateTime => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
enum Payload {
    #[default]
    Empty,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Float(f64),
    Money(Money),
    Bytes(Bytes),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

/// A tagged scalar value with null and external-buffer flags.
#[derive(Debug, Clone)]
pub struct TypedValue {
    data_type: DataType,
    payload: Payload,
    null: bool,
    external: bool,
}

impl Default for TypedValue {
    fn default() -> Self {
        Self {
            data_type: DataType::None,
            payload: Payload::Empty,
            null: true,
            external: false,
        }
    }
}

impl TypedValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A NULL of the given type.
    pub fn null(data_type: DataType) -> Self {
        Self {
            data_type,
            ..Self::default()
        }
    }

    fn assign(&mut self, data_type: DataType, payload: Payload) {
        self.data_type = data_type;
        self.payload = payload;
        self.null = false;
        self.external = false;
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn is_null(&self) -> bool {
        self.null
    }

    /// True when the payload is a view into caller-provided memory.
    pub fn is_external(&self) -> bool {
        self.external
    }

    /// Payload size in bytes. Zero for NULL.
    pub fn size(&self) -> usize {
        match &self.payload {
            Payload::Empty => 0,
            Payload::Bytes(b) => b.len(),
            _ => self.data_type.fixed_size(),
        }
    }

    // ------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------

    /// Zero the payload, keeping the current type tag.
    pub fn set_null(&mut self) {
        self.payload = Payload::Empty;
        self.null = true;
        self.external = false;
    }

    /// Zero the payload and re-tag the value.
    pub fn set_null_as(&mut self, data_type: DataType) {
        self.set_null();
        self.data_type = data_type;
    }

    pub fn set_bool(&mut self, value: bool) {
        self.assign(DataType::Bool, Payload::Bool(value));
    }

    pub fn set_integer(&mut self, value: i32) {
        self.assign(DataType::Int, Payload::Int(value));
    }

    pub fn set_int64(&mut self, value: i64) {
        self.assign(DataType::Int64, Payload::Int64(value));
    }

    pub fn set_float(&mut self, value: f64) {
        self.assign(DataType::Float, Payload::Float(value));
    }

    pub fn set_money(&mut self, value: Money) {
        self.assign(DataType::Money, Payload::Money(value));
    }

    pub fn set_string(&mut self, value: &str) {
        self.assign(DataType::String, Payload::Bytes(Bytes::copy_from_slice(value.as_bytes())));
    }

    pub fn set_text(&mut self, value: &str) {
        self.assign(DataType::Text, Payload::Bytes(Bytes::copy_from_slice(value.as_bytes())));
    }

    pub fn set_buffer(&mut self, value: &[u8]) {
        self.assign(DataType::Buffer, Payload::Bytes(Bytes::copy_from_slice(value)));
    }

    pub fn set_date(&mut self, value: NaiveDate) {
        self.assign(DataType::Date, Payload::Date(value));
    }

    pub fn set_datetime(&mut self, value: NaiveDateTime) {
        self.assign(DataType::DateTime, Payload::DateTime(value));
    }

    /// Store variable-length data without copying it.
    ///
    /// The value shares `data` with the caller and is flagged external.
    pub fn set_external(&mut self, data_type: DataType, data: Bytes) -> DbResult<()> {
        if !data_type.is_variable_length() {
            return Err(DbError::Conversion(format!(
                "external buffers need a string, text or buffer type, got {data_type}"
            )));
        }
        self.assign(data_type, Payload::Bytes(data));
        self.external = true;
        Ok(())
    }

    /// Take ownership of already-allocated variable-length data.
    pub(crate) fn set_owned_bytes(&mut self, data_type: DataType, data: Bytes) {
        debug_assert!(data_type.is_variable_length());
        self.assign(data_type, Payload::Bytes(data));
    }

    // ------------------------------------------------------------------
    // Raw views
    // ------------------------------------------------------------------

    /// Variable-length payload, if any.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// String or text payload as `&str` when it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match (&self.payload, self.data_type) {
            (Payload::Bytes(b), DataType::String | DataType::Text) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Conversions (read-only)
    // ------------------------------------------------------------------

    /// Coerce to bool. Strings are true when they start with `Y`, `T` or `1`.
    pub fn as_bool(&self) -> DbResult<bool> {
        Ok(match &self.payload {
            Payload::Empty => false,
            Payload::Bool(b) => *b,
            Payload::Int(v) => *v != 0,
            Payload::Int64(v) => *v != 0,
            Payload::Float(v) => *v != 0.0,
            Payload::Money(m) => m.quantity() != 0,
            Payload::Bytes(b) => matches!(
                b.iter().find(|c| !c.is_ascii_whitespace()),
                Some(b'Y' | b'y' | b'T' | b't' | b'1')
            ),
            Payload::Date(_) | Payload::DateTime(_) => {
                return Err(self.conversion_error(DataType::Bool));
            }
        })
    }

    pub fn as_integer(&self) -> DbResult<i32> {
        let wide = self.as_int64()?;
        i32::try_from(wide)
            .map_err(|_| DbError::Conversion(format!("{wide} does not fit in int")))
    }

    pub fn as_int64(&self) -> DbResult<i64> {
        Ok(match &self.payload {
            Payload::Empty => 0,
            Payload::Bool(b) => i64::from(*b),
            Payload::Int(v) => i64::from(*v),
            Payload::Int64(v) => *v,
            Payload::Float(v) => float_to_i64(*v)?,
            Payload::Money(m) => m.to_i64(),
            Payload::Bytes(b) => {
                let text = self.text_of(b, DataType::Int64)?;
                match text.parse::<i64>() {
                    Ok(v) => v,
                    Err(_) => text
                        .parse::<f64>()
                        .map_err(|_| self.conversion_error(DataType::Int64))
                        .and_then(float_to_i64)?,
                }
            }
            Payload::Date(d) => date_timestamp(*d),
            Payload::DateTime(dt) => dt.and_utc().timestamp(),
        })
    }

    pub fn as_float(&self) -> DbResult<f64> {
        Ok(match &self.payload {
            Payload::Empty => 0.0,
            Payload::Bool(b) => f64::from(u8::from(*b)),
            Payload::Int(v) => f64::from(*v),
            Payload::Int64(v) => *v as f64,
            Payload::Float(v) => *v,
            Payload::Money(m) => m.to_f64(),
            Payload::Bytes(b) => self
                .text_of(b, DataType::Float)?
                .parse::<f64>()
                .map_err(|_| self.conversion_error(DataType::Float))?,
            Payload::Date(d) => date_timestamp(*d) as f64,
            Payload::DateTime(dt) => dt.and_utc().timestamp_millis() as f64 / 1000.0,
        })
    }

    pub fn as_money(&self) -> DbResult<Money> {
        match &self.payload {
            Payload::Empty => Ok(Money::default()),
            Payload::Bool(b) => Money::new(i64::from(*b), 0),
            Payload::Int(v) => Money::new(i64::from(*v), 0),
            Payload::Int64(v) => Money::new(*v, 0),
            Payload::Float(v) => Money::from_f64(*v, DEFAULT_MONEY_SCALE),
            Payload::Money(m) => Ok(*m),
            Payload::Bytes(b) => {
                let text = self.text_of(b, DataType::Money)?;
                text.parse::<Money>().or_else(|_| {
                    text.parse::<f64>()
                        .map_err(|_| self.conversion_error(DataType::Money))
                        .and_then(|v| Money::from_f64(v, DEFAULT_MONEY_SCALE))
                })
            }
            Payload::Date(_) | Payload::DateTime(_) => Err(self.conversion_error(DataType::Money)),
        }
    }

    /// Render as text. NULL renders as an empty string.
    pub fn as_string(&self) -> String {
        match &self.payload {
            Payload::Empty => String::new(),
            Payload::Bool(b) => b.to_string(),
            Payload::Int(v) => v.to_string(),
            Payload::Int64(v) => v.to_string(),
            Payload::Float(v) => v.to_string(),
            Payload::Money(m) => m.to_string(),
            Payload::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Payload::Date(d) => d.format("%Y-%m-%d").to_string(),
            Payload::DateTime(dt) => format_datetime(dt),
        }
    }

    pub fn as_date(&self) -> DbResult<NaiveDate> {
        match &self.payload {
            Payload::Empty => Ok(NaiveDate::default()),
            Payload::Date(d) => Ok(*d),
            Payload::DateTime(dt) => Ok(dt.date()),
            _ => self.as_datetime().map(|dt| dt.date()),
        }
    }

    pub fn as_datetime(&self) -> DbResult<NaiveDateTime> {
        match &self.payload {
            Payload::Empty => Ok(NaiveDateTime::default()),
            Payload::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
            Payload::DateTime(dt) => Ok(*dt),
            Payload::Int(v) => timestamp_to_datetime(i64::from(*v)),
            Payload::Int64(v) => timestamp_to_datetime(*v),
            Payload::Float(v) => timestamp_to_datetime(float_to_i64(*v)?),
            Payload::Bytes(b) => {
                let text = self.text_of(b, DataType::DateTime)?;
                parse_datetime(text)
                    .or_else(|| parse_date(text).map(|d| d.and_time(NaiveTime::MIN)))
                    .ok_or_else(|| self.conversion_error(DataType::DateTime))
            }
            Payload::Bool(_) | Payload::Money(_) => Err(self.conversion_error(DataType::DateTime)),
        }
    }

    /// Variable-length payloads as raw bytes, anything else as its text form.
    pub fn as_bytes(&self) -> Vec<u8> {
        match &self.payload {
            Payload::Bytes(b) => b.to_vec(),
            Payload::Empty => Vec::new(),
            _ => self.as_string().into_bytes(),
        }
    }

    fn text_of<'a>(&self, bytes: &'a [u8], target: DataType) -> DbResult<&'a str> {
        std::str::from_utf8(bytes)
            .map(str::trim)
            .map_err(|_| self.conversion_error(target))
    }

    fn conversion_error(&self, target: DataType) -> DbError {
        let shown = match &self.payload {
            Payload::Bytes(b) if b.len() > 32 => format!("{} bytes", b.len()),
            _ => format!("'{}'", self.as_string()),
        };
        DbError::Conversion(format!(
            "cannot convert {} value {shown} to {target}",
            self.data_type
        ))
    }
}

fn float_to_i64(v: f64) -> DbResult<i64> {
    if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Ok(v.trunc() as i64)
    } else {
        Err(DbError::Conversion(format!("{v} does not fit in int64")))
    }
}

fn date_timestamp(d: NaiveDate) -> i64 {
    d.and_time(NaiveTime::MIN).and_utc().timestamp()
}

fn timestamp_to_datetime(secs: i64) -> DbResult<NaiveDateTime> {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| DbError::Conversion(format!("timestamp {secs} out of range")))
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.and_utc().timestamp_subsec_millis() == 0 {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
    }
}

impl PartialEq for TypedValue {
    /// Type tag, null flag and payload must match; ownership does not matter.
    fn eq(&self, other: &Self) -> bool {
        self.data_type == other.data_type && self.null == other.null && self.payload == other.payload
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

macro_rules! impl_from {
    ($ty:ty, $setter:ident) => {
        impl From<$ty> for TypedValue {
            fn from(value: $ty) -> Self {
                let mut v = TypedValue::new();
                v.$setter(value);
                v
            }
        }
    };
}

impl_from!(bool, set_bool);
impl_from!(i32, set_integer);
impl_from!(i64, set_int64);
impl_from!(f64, set_float);
impl_from!(Money, set_money);
impl_from!(&str, set_string);
impl_from!(&[u8], set_buffer);
impl_from!(NaiveDate, set_date);
impl_from!(NaiveDateTime, set_datetime);

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        let mut v = TypedValue::new();
        v.set_owned_bytes(DataType::String, Bytes::from(value));
        v
    }
}

impl From<Vec<u8>> for TypedValue {
    fn from(value: Vec<u8>) -> Self {
        let mut v = TypedValue::new();
        v.set_owned_bytes(DataType::Buffer, Bytes::from(value));
        v
    }
}

impl<T: Into<TypedValue>> From<Option<T>> for TypedValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}
