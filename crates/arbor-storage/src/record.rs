//! Record representation and serialization.

use std::fmt;

use arbor_common::{ArborError, Field, PageIdentity, Result, Schema};
use bytes::{Buf, BufMut};

/// Identifies a slot within a page.
///
/// Leaf records and internal entries both use this to remember where they
/// were placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    /// Page holding the slot.
    pub page: PageIdentity,
    /// Slot index within the page.
    pub slot: u16,
}

impl RecordId {
    /// Creates a record identifier.
    pub fn new(page: PageIdentity, slot: u16) -> Self {
        Self { page, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page, self.slot)
    }
}

/// A fixed-width record holding one field per schema column.
///
/// A record starts out unplaced; inserting it into a leaf page assigns its
/// [`RecordId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<Field>,
    rid: Option<RecordId>,
}

impl Record {
    /// Creates an unplaced record from its field values.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields, rid: None }
    }

    /// Returns the field values in column order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns field `index`, if present.
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Returns where this record is stored, if it has been placed.
    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }

    /// Records the slot this record occupies.
    pub fn set_rid(&mut self, rid: RecordId) {
        self.rid = Some(rid);
    }

    /// Checks the field list against `schema`, column for column.
    pub fn check_schema(&self, schema: &Schema) -> Result<()> {
        if self.fields.len() != schema.len() {
            return Err(ArborError::SchemaMismatch {
                expected: schema.len(),
                actual: self.fields.len(),
            });
        }
        for (field, column) in self.fields.iter().zip(schema.columns()) {
            if field.column_type() != *column {
                return Err(ArborError::TypeMismatch {
                    expected: column.to_string(),
                    actual: field.column_type().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Encodes the fields into `buf` in column order.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        for field in &self.fields {
            field.encode(buf);
        }
    }

    /// Decodes a record of `schema` from `buf`. The result is unplaced.
    pub fn decode<B: Buf>(schema: &Schema, buf: &mut B) -> Result<Record> {
        let mut fields = Vec::with_capacity(schema.len());
        for column in schema.columns() {
            fields.push(Field::decode(*column, buf)?);
        }
        Ok(Record::new(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::{ColumnType, PageCategory};

    fn test_schema() -> Schema {
        Schema::new(vec![ColumnType::Int, ColumnType::Str])
    }

    fn test_pid() -> PageIdentity {
        PageIdentity::new(1, 3, PageCategory::Leaf)
    }

    #[test]
    fn test_record_id_display() {
        let rid = RecordId::new(test_pid(), 7);
        assert_eq!(rid.to_string(), "1:3:leaf:7");
    }

    #[test]
    fn test_new_record_is_unplaced() {
        let record = Record::new(vec![Field::Int(5), Field::Str("a".to_string())]);
        assert!(record.rid().is_none());
        assert_eq!(record.field(0), Some(&Field::Int(5)));
        assert_eq!(record.field(2), None);
    }

    #[test]
    fn test_set_rid() {
        let mut record = Record::new(vec![Field::Int(5)]);
        record.set_rid(RecordId::new(test_pid(), 2));
        assert_eq!(record.rid(), Some(RecordId::new(test_pid(), 2)));
    }

    #[test]
    fn test_check_schema_accepts_match() {
        let record = Record::new(vec![Field::Int(5), Field::Str("a".to_string())]);
        assert!(record.check_schema(&test_schema()).is_ok());
    }

    #[test]
    fn test_check_schema_rejects_arity() {
        let record = Record::new(vec![Field::Int(5)]);
        let err = record.check_schema(&test_schema()).unwrap_err();
        assert!(matches!(err, ArborError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_check_schema_rejects_type() {
        let record = Record::new(vec![Field::Str("5".to_string()), Field::Str("a".to_string())]);
        let err = record.check_schema(&test_schema()).unwrap_err();
        assert!(matches!(err, ArborError::TypeMismatch { .. }));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let schema = test_schema();
        let original = Record::new(vec![Field::Int(-9), Field::Str("hello".to_string())]);

        let mut buf = Vec::new();
        original.encode(&mut buf);
        assert_eq!(buf.len(), schema.record_width());

        let decoded = Record::decode(&schema, &mut buf.as_slice()).unwrap();
        assert_eq!(decoded.fields(), original.fields());
        assert!(decoded.rid().is_none());
    }

    #[test]
    fn test_decode_propagates_field_error() {
        let schema = test_schema();
        let short = [0u8; 10];
        let err = Record::decode(&schema, &mut short.as_slice()).unwrap_err();
        assert!(matches!(err, ArborError::FieldDecode(_)));
    }
}
