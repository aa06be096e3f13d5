//! Result columns.

use std::ops::{Deref, DerefMut};

use crate::buffer::ByteBuffer;
use crate::value::{DataType, TypedValue};

/// One output column: the current row's value plus column metadata.
///
/// Variable-length values are read into a per-field buffer whose declared
/// size grows on demand and is never shrunk.
#[derive(Debug, Clone)]
pub struct ResultField {
    name: String,
    column: usize,
    field_type: i32,
    size: usize,
    value: TypedValue,
    buffer: ByteBuffer,
}

impl ResultField {
    pub fn new(
        name: impl Into<String>,
        column: usize,
        data_type: DataType,
        field_type: i32,
        size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            column,
            field_type,
            size,
            value: TypedValue::null(data_type),
            buffer: ByteBuffer::with_capacity(size),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 0-based ordinal in the result set.
    pub fn column(&self) -> usize {
        self.column
    }

    /// Native driver type code.
    pub fn field_type(&self) -> i32 {
        self.field_type
    }

    /// Declared buffer capacity in bytes.
    pub fn field_size(&self) -> usize {
        self.size
    }

    pub fn value(&self) -> &TypedValue {
        &self.value
    }

    /// Grow the declared size so `size` bytes fit. Returns `true` if it grew.
    pub fn check_size(&mut self, size: usize) -> bool {
        if size <= self.size {
            return false;
        }
        self.size = size;
        self.buffer.check_size(size);
        true
    }

    /// Read buffer used for segmented (LOB) fetches.
    pub fn buffer_mut(&mut self) -> &mut ByteBuffer {
        &mut self.buffer
    }

    /// Copy variable-length data read from a native buffer into the field.
    pub fn set_from_bytes(&mut self, data_type: DataType, data: &[u8]) {
        self.check_size(data.len());
        self.buffer.set(data);
        self.commit_buffer(data_type);
    }

    /// Publish whatever was accumulated in the buffer as the field value.
    pub fn commit_buffer(&mut self, data_type: DataType) {
        let len = self.buffer.len();
        self.check_size(len);
        let data = self.buffer.take();
        self.value.set_owned_bytes(data_type, data);
    }
}

impl Deref for ResultField {
    type Target = TypedValue;

    fn deref(&self) -> &TypedValue {
        &self.value
    }
}

impl DerefMut for ResultField {
    fn deref_mut(&mut self) -> &mut TypedValue {
        &mut self.value
    }
}

/// Ordered result columns of a query.
#[derive(Debug, Clone, Default)]
pub struct FieldList {
    fields: Vec<ResultField>,
}

impl FieldList {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn replace(&mut self, fields: Vec<ResultField>) {
        self.fields = fields;
    }

    pub(crate) fn clear(&mut self) {
        self.fields.clear();
    }

    /// Case-insensitive lookup by column name.
    pub fn get(&self, name: &str) -> Option<&ResultField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn get_at(&self, index: usize) -> Option<&ResultField> {
        self.fields.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultField> {
        self.fields.iter()
    }

    pub fn as_mut_slice(&mut self) -> &mut [ResultField] {
        &mut self.fields
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<'a> IntoIterator for &'a FieldList {
    type Item = &'a ResultField;
    type IntoIter = std::slice::Iter<'a, ResultField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_grows_for_large_values() {
        let mut field = ResultField::new("data", 0, DataType::Buffer, 252, 16);
        assert_eq!(field.field_size(), 16);

        let big = vec![0xAB; 100];
        field.set_from_bytes(DataType::Buffer, &big);
        assert_eq!(field.field_size(), 100);
        assert_eq!(field.bytes(), Some(&big[..]));

        field.set_from_bytes(DataType::Buffer, b"tiny");
        assert_eq!(field.field_size(), 100);
        assert_eq!(field.bytes(), Some(&b"tiny"[..]));
    }

    #[test]
    fn test_new_field_is_typed_null() {
        let field = ResultField::new("n", 3, DataType::Int64, 8, 8);
        assert!(field.is_null());
        assert_eq!(field.data_type(), DataType::Int64);
        assert_eq!(field.column(), 3);
        assert_eq!(field.field_type(), 8);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut list = FieldList::new();
        list.replace(vec![
            ResultField::new("ID", 0, DataType::Int, 3, 4),
            ResultField::new("Name", 1, DataType::String, 253, 64),
        ]);
        assert_eq!(list.get("name").unwrap().column(), 1);
        assert_eq!(list.get_at(0).unwrap().name(), "ID");
        assert!(list.get("missing").is_none());
        assert_eq!(list.names(), vec!["ID", "Name"]);
    }
}
