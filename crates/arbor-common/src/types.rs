//! Column types, field values, and schemas for Arbor records.

use std::cmp::Ordering;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{ArborError, Result};

/// Maximum byte length of a string field's content.
pub const STRING_MAX_LEN: usize = 128;

/// Column types supported by Arbor.
///
/// Both types are fixed-width on disk so that a record's byte width is a
/// schema constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColumnType {
    /// 32-bit signed integer (4 bytes).
    Int = 0,
    /// Fixed-width string: 4-byte length prefix plus [`STRING_MAX_LEN`]
    /// content bytes, zero padded.
    Str = 1,
}

impl ColumnType {
    /// Returns the on-disk width of a value of this type in bytes.
    pub fn width(&self) -> usize {
        match self {
            ColumnType::Int => 4,
            ColumnType::Str => 4 + STRING_MAX_LEN,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Int => "INT",
            ColumnType::Str => "STRING",
        };
        write!(f, "{}", name)
    }
}

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    /// Integer value.
    Int(i32),
    /// String value.
    Str(String),
}

impl Field {
    /// Returns the column type of this field.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Field::Int(_) => ColumnType::Int,
            Field::Str(_) => ColumnType::Str,
        }
    }

    /// Returns the on-disk width of this field in bytes.
    pub fn width(&self) -> usize {
        self.column_type().width()
    }

    /// Encodes this field into `buf` in its fixed-width little-endian layout.
    ///
    /// Strings longer than [`STRING_MAX_LEN`] bytes are truncated at a
    /// character boundary; shorter strings are zero padded to full width.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Field::Int(v) => buf.put_i32_le(*v),
            Field::Str(s) => {
                let mut len = s.len().min(STRING_MAX_LEN);
                while !s.is_char_boundary(len) {
                    len -= 1;
                }
                buf.put_u32_le(len as u32);
                buf.put_slice(&s.as_bytes()[..len]);
                buf.put_bytes(0, STRING_MAX_LEN - len);
            }
        }
    }

    /// Decodes a field of the given type from `buf`.
    pub fn decode<B: Buf>(column_type: ColumnType, buf: &mut B) -> Result<Field> {
        match column_type {
            ColumnType::Int => {
                if buf.remaining() < 4 {
                    return Err(ArborError::FieldDecode("truncated int field".to_string()));
                }
                Ok(Field::Int(buf.get_i32_le()))
            }
            ColumnType::Str => {
                if buf.remaining() < 4 + STRING_MAX_LEN {
                    return Err(ArborError::FieldDecode(
                        "truncated string field".to_string(),
                    ));
                }
                let len = buf.get_u32_le() as usize;
                if len > STRING_MAX_LEN {
                    return Err(ArborError::FieldDecode(format!(
                        "string length {} exceeds {}",
                        len, STRING_MAX_LEN
                    )));
                }
                let mut content = vec![0u8; len];
                buf.copy_to_slice(&mut content);
                buf.advance(STRING_MAX_LEN - len);
                let value = String::from_utf8(content).map_err(|e| {
                    ArborError::FieldDecode(format!("invalid utf-8 in string field: {}", e))
                })?;
                Ok(Field::Str(value))
            }
        }
    }

    /// Compares two fields of the same type.
    ///
    /// Returns a [`TypeMismatch`](ArborError::TypeMismatch) error when the
    /// types differ.
    pub fn compare(&self, other: &Field) -> Result<Ordering> {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => Ok(a.cmp(b)),
            (Field::Str(a), Field::Str(b)) => Ok(a.cmp(b)),
            _ => Err(ArborError::TypeMismatch {
                expected: self.column_type().to_string(),
                actual: other.column_type().to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Str(s) => write!(f, "{}", s),
        }
    }
}

/// An ordered list of column types defining a table's record layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnType>,
}

impl Schema {
    /// Creates a schema from an ordered column list.
    pub fn new(columns: Vec<ColumnType>) -> Self {
        Self { columns }
    }

    /// Returns the column types in order.
    pub fn columns(&self) -> &[ColumnType] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the type of column `index`, if it exists.
    pub fn column(&self, index: usize) -> Option<ColumnType> {
        self.columns.get(index).copied()
    }

    /// Returns the total on-disk width of one record in bytes.
    pub fn record_width(&self) -> usize {
        self.columns.iter().map(|c| c.width()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_widths() {
        assert_eq!(ColumnType::Int.width(), 4);
        assert_eq!(ColumnType::Str.width(), 132);
    }

    #[test]
    fn test_column_display() {
        assert_eq!(ColumnType::Int.to_string(), "INT");
        assert_eq!(ColumnType::Str.to_string(), "STRING");
    }

    #[test]
    fn test_record_width() {
        let schema = Schema::new(vec![ColumnType::Int, ColumnType::Int, ColumnType::Str]);
        assert_eq!(schema.record_width(), 140);
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.column(0), Some(ColumnType::Int));
        assert_eq!(schema.column(2), Some(ColumnType::Str));
        assert_eq!(schema.column(3), None);
    }

    #[test]
    fn test_int_encode_layout() {
        let mut buf = Vec::new();
        Field::Int(0x0403_0201).encode(&mut buf);
        // Little-endian byte order
        assert_eq!(buf, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_int_roundtrip() {
        for value in [0, 1, -1, i32::MAX, i32::MIN, 42] {
            let mut buf = Vec::new();
            Field::Int(value).encode(&mut buf);
            assert_eq!(buf.len(), 4);

            let decoded = Field::decode(ColumnType::Int, &mut buf.as_slice()).unwrap();
            assert_eq!(decoded, Field::Int(value));
        }
    }

    #[test]
    fn test_string_roundtrip() {
        let original = Field::Str("hello".to_string());
        let mut buf = Vec::new();
        original.encode(&mut buf);
        assert_eq!(buf.len(), 132);
        // Length prefix then content, zero padded
        assert_eq!(&buf[0..4], &5u32.to_le_bytes());
        assert_eq!(&buf[4..9], b"hello");
        assert!(buf[9..].iter().all(|&b| b == 0));

        let decoded = Field::decode(ColumnType::Str, &mut buf.as_slice()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_empty_string_roundtrip() {
        let original = Field::Str(String::new());
        let mut buf = Vec::new();
        original.encode(&mut buf);
        assert_eq!(buf.len(), 132);

        let decoded = Field::decode(ColumnType::Str, &mut buf.as_slice()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_max_length_string_roundtrip() {
        let original = Field::Str("x".repeat(STRING_MAX_LEN));
        let mut buf = Vec::new();
        original.encode(&mut buf);
        assert_eq!(buf.len(), 132);

        let decoded = Field::decode(ColumnType::Str, &mut buf.as_slice()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_long_string_truncated() {
        let long = "y".repeat(STRING_MAX_LEN + 50);
        let mut buf = Vec::new();
        Field::Str(long).encode(&mut buf);
        assert_eq!(buf.len(), 132);

        let decoded = Field::decode(ColumnType::Str, &mut buf.as_slice()).unwrap();
        assert_eq!(decoded, Field::Str("y".repeat(STRING_MAX_LEN)));
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        // 'é' is 2 bytes in utf-8; 127 of them is 254 bytes, so the cut at
        // 128 falls mid-character and must back off to 127.
        let s = "é".repeat(127);
        let mut buf = Vec::new();
        Field::Str(s).encode(&mut buf);
        assert_eq!(buf.len(), 132);

        let decoded = Field::decode(ColumnType::Str, &mut buf.as_slice()).unwrap();
        match decoded {
            Field::Str(out) => {
                assert_eq!(out.len(), 126);
                assert!(out.chars().all(|c| c == 'é'));
            }
            other => panic!("expected string field, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let mut buf = vec![0u8; 132];
        buf[0..4].copy_from_slice(&900u32.to_le_bytes());

        let err = Field::decode(ColumnType::Str, &mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, ArborError::FieldDecode(_)));
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let mut buf = vec![0u8; 132];
        buf[0..4].copy_from_slice(&2u32.to_le_bytes());
        buf[4] = 0xFF;
        buf[5] = 0xFE;

        let err = Field::decode(ColumnType::Str, &mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, ArborError::FieldDecode(_)));
        assert!(err.to_string().contains("utf-8"));
    }

    #[test]
    fn test_decode_rejects_truncated_buffer() {
        let short = [0u8; 2];
        let err = Field::decode(ColumnType::Int, &mut short.as_slice()).unwrap_err();
        assert!(matches!(err, ArborError::FieldDecode(_)));

        let short = [0u8; 100];
        let err = Field::decode(ColumnType::Str, &mut short.as_slice()).unwrap_err();
        assert!(matches!(err, ArborError::FieldDecode(_)));
    }

    #[test]
    fn test_compare_ints() {
        assert_eq!(
            Field::Int(1).compare(&Field::Int(2)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            Field::Int(2).compare(&Field::Int(2)).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            Field::Int(3).compare(&Field::Int(2)).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_compare_strings() {
        let a = Field::Str("apple".to_string());
        let b = Field::Str("banana".to_string());
        assert_eq!(a.compare(&b).unwrap(), Ordering::Less);
        assert_eq!(b.compare(&a).unwrap(), Ordering::Greater);
        assert_eq!(a.compare(&a).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_compare_type_mismatch() {
        let err = Field::Int(1)
            .compare(&Field::Str("one".to_string()))
            .unwrap_err();
        assert!(matches!(err, ArborError::TypeMismatch { .. }));
        assert_eq!(err.to_string(), "Type mismatch: expected INT, got STRING");
    }

    #[test]
    fn test_field_display() {
        assert_eq!(Field::Int(-7).to_string(), "-7");
        assert_eq!(Field::Str("abc".to_string()).to_string(), "abc");
    }

    #[test]
    fn test_schema_serde_roundtrip() {
        let original = Schema::new(vec![ColumnType::Int, ColumnType::Str]);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: Schema = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_field_serde_roundtrip() {
        for field in [Field::Int(99), Field::Str("serde".to_string())] {
            let serialized = serde_json::to_string(&field).unwrap();
            let deserialized: Field = serde_json::from_str(&serialized).unwrap();
            assert_eq!(field, deserialized);
        }
    }
}
