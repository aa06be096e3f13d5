//! Broken-down date/time components.
//!
//! Every driver's wire format for temporal types differs, so values go
//! through [`DateTimeParts`] instead of being copied as raw bytes.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::{DbError, DbResult};

/// Calendar date and wall-clock time split into components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTimeParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millisecond: u32,
}

impl DateTimeParts {
    pub fn date(year: i32, month: u32, day: u32) -> Self {
        Self {
            year,
            month,
            day,
            ..Self::default()
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self::date(date.year(), date.month(), date.day())
    }

    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
            millisecond: dt.nanosecond() / 1_000_000 % 1000,
        }
    }

    pub fn to_date(&self) -> DbResult<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day).ok_or_else(|| {
            DbError::Conversion(format!(
                "invalid date {:04}-{:02}-{:02}",
                self.year, self.month, self.day
            ))
        })
    }

    pub fn to_datetime(&self) -> DbResult<NaiveDateTime> {
        let date = self.to_date()?;
        let time = NaiveTime::from_hms_milli_opt(self.hour, self.minute, self.second, self.millisecond)
            .ok_or_else(|| {
                DbError::Conversion(format!(
                    "invalid time {:02}:{:02}:{:02}.{:03}",
                    self.hour, self.minute, self.second, self.millisecond
                ))
            })?;
        Ok(date.and_time(time))
    }

    pub fn has_time(&self) -> bool {
        self.hour != 0 || self.minute != 0 || self.second != 0 || self.millisecond != 0
    }
}

/// Parse the date/time text formats drivers commonly hand back.
pub(crate) fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    let text = text.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| parse_date(text).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

pub(crate) fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    let date_part = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_roundtrip_datetime() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_milli_opt(23, 59, 58, 125)
            .unwrap();
        let parts = DateTimeParts::from_datetime(dt);
        assert_eq!(parts.millisecond, 125);
        assert_eq!(parts.to_datetime().unwrap(), dt);
        assert!(parts.has_time());
    }

    #[test]
    fn test_invalid_date_is_conversion_error() {
        let parts = DateTimeParts::date(2023, 2, 30);
        assert!(matches!(parts.to_date(), Err(DbError::Conversion(_))));
    }

    #[test]
    fn test_parse_text_forms() {
        let dt = parse_datetime("2020-01-02 03:04:05.678").unwrap();
        assert_eq!(DateTimeParts::from_datetime(dt).millisecond, 678);
        assert!(parse_datetime("2020-01-02T03:04").is_some());
        assert_eq!(
            parse_datetime("2020-01-02").unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
        assert!(parse_datetime("yesterday").is_none());
        assert!(parse_date("2020-01-02 10:00:00").is_some());
    }
}
