//! Two-phase LOB transfer.
//!
//! Drivers that cannot bind BLOB/CLOB bytes in-line create an empty LOB
//! first, obtain a locator for it, and then stream the payload through the
//! locator in bounded segments. Reading mirrors this: segments are read
//! until a zero-length read and accumulated in the field's buffer.

use crate::error::{DbError, DbResult};
use crate::field::ResultField;
use crate::param::Parameter;
use crate::value::DataType;

pub const DEFAULT_SEGMENT_SIZE: usize = 16 * 1024;

/// An open handle on one large object.
pub trait LobLocator {
    /// Largest segment the driver accepts in one call.
    fn max_segment(&self) -> usize {
        DEFAULT_SEGMENT_SIZE
    }

    /// Write one segment; returns the number of bytes accepted.
    fn write_segment(&mut self, data: &[u8]) -> DbResult<usize>;

    /// Read the next segment into `buf`; `0` means the end of the LOB.
    fn read_segment(&mut self, buf: &mut [u8]) -> DbResult<usize>;
}

/// Stream `data` into `locator`. Returns the number of segments written.
pub fn write_lob(locator: &mut dyn LobLocator, data: &[u8]) -> DbResult<usize> {
    let segment = locator.max_segment().max(1);
    let mut offset = 0;
    let mut segments = 0;
    while offset < data.len() {
        let end = (offset + segment).min(data.len());
        let written = locator.write_segment(&data[offset..end])?;
        if written == 0 {
            return Err(DbError::native(format!(
                "LOB write stalled at byte {offset} of {}",
                data.len()
            )));
        }
        offset += written;
        segments += 1;
    }
    Ok(segments)
}

/// Stream a `Buffer` or `Text` parameter through `locator`.
pub fn write_parameter(locator: &mut dyn LobLocator, param: &Parameter) -> DbResult<usize> {
    match param.data_type() {
        DataType::Buffer | DataType::Text => write_lob(locator, param.bytes().unwrap_or_default()),
        other => Err(DbError::Conversion(format!(
            "parameter '{}' of type {other} is not a LOB",
            param.name()
        ))),
    }
}

/// Read a whole LOB into `field` as `data_type` (`Buffer` or `Text`).
/// Returns the total size read.
pub fn read_lob(
    locator: &mut dyn LobLocator,
    field: &mut ResultField,
    data_type: DataType,
) -> DbResult<usize> {
    let mut chunk = vec![0u8; locator.max_segment().max(1)];
    field.buffer_mut().clear();
    loop {
        let read = locator.read_segment(&mut chunk)?;
        if read == 0 {
            break;
        }
        field.buffer_mut().append(&chunk[..read]);
    }
    let total = field.buffer_mut().len();
    field.commit_buffer(data_type);
    Ok(total)
}

/// In-memory LOB, mainly for exercising the segment protocol.
#[derive(Debug, Default)]
pub struct MemoryLob {
    data: Vec<u8>,
    position: usize,
    max_segment: usize,
    segments_written: usize,
    segments_read: usize,
}

impl MemoryLob {
    pub fn new(max_segment: usize) -> Self {
        Self {
            max_segment,
            ..Self::default()
        }
    }

    pub fn with_data(data: Vec<u8>, max_segment: usize) -> Self {
        Self {
            data,
            max_segment,
            ..Self::default()
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn segments_written(&self) -> usize {
        self.segments_written
    }

    pub fn segments_read(&self) -> usize {
        self.segments_read
    }
}

impl LobLocator for MemoryLob {
    fn max_segment(&self) -> usize {
        self.max_segment
    }

    fn write_segment(&mut self, data: &[u8]) -> DbResult<usize> {
        if data.len() > self.max_segment {
            return Err(DbError::native(format!(
                "segment of {} bytes exceeds limit {}",
                data.len(),
                self.max_segment
            )));
        }
        self.data.extend_from_slice(data);
        self.segments_written += 1;
        Ok(data.len())
    }

    fn read_segment(&mut self, buf: &mut [u8]) -> DbResult<usize> {
        let remaining = &self.data[self.position..];
        let n = remaining.len().min(buf.len()).min(self.max_segment);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        if n > 0 {
            self.segments_read += 1;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_respects_segment_limit() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let mut lob = MemoryLob::new(4096);
        assert_eq!(write_lob(&mut lob, &payload).unwrap(), 3);
        assert_eq!(lob.data(), &payload[..]);
    }

    #[test]
    fn test_read_grows_field_until_empty_segment() {
        let payload = vec![7u8; 70_000];
        let mut lob = MemoryLob::with_data(payload.clone(), 65_535);
        let mut field = ResultField::new("doc", 0, DataType::Buffer, 0, 1024);

        let total = read_lob(&mut lob, &mut field, DataType::Buffer).unwrap();
        assert_eq!(total, payload.len());
        assert_eq!(lob.segments_read(), 2);
        assert_eq!(field.field_size(), payload.len());
        assert_eq!(field.bytes(), Some(&payload[..]));
    }

    #[test]
    fn test_write_parameter_rejects_scalars() {
        let mut lob = MemoryLob::new(8);
        let mut param = Parameter::new("doc");
        param.set_value(&b"0123456789"[..]);
        assert_eq!(write_parameter(&mut lob, &param).unwrap(), 2);
        assert_eq!(lob.data(), b"0123456789");

        param.set_value(3);
        assert_eq!(write_parameter(&mut lob, &param).unwrap_err().kind(), crate::error::ErrorKind::Type);
    }

    #[test]
    fn test_empty_lob_reads_as_empty_value() {
        let mut lob = MemoryLob::new(512);
        let mut field = ResultField::new("doc", 0, DataType::Text, 0, 64);
        assert_eq!(read_lob(&mut lob, &mut field, DataType::Text).unwrap(), 0);
        assert!(!field.is_null());
        assert_eq!(field.as_string(), "");
    }
}
