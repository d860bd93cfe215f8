//! Tuple representation and schema-driven serialization.

use bytes::{BufMut, Bytes, BytesMut};
use lasdb_common::types::{Field, FieldType, CHAR_SIZE};
use lasdb_common::{LasError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// A record: an ordered vector of field values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    fields: Vec<Field>,
}

impl Tuple {
    /// Creates a tuple from field values.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Number of fields.
    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Returns the field at an index.
    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    /// Replaces the field at an index.
    pub fn set_field(&mut self, i: usize, value: Field) {
        self.fields[i] = value;
    }

    /// All fields in order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

/// Immutable per-index schema: named, typed fields.
///
/// Carries the byte-level codec for tuples. Every tuple stored in an
/// index must be [`Schema::compatible`] with that index's schema.
#[derive(Debug, Clone)]
pub struct Schema {
    types: Arc<[FieldType]>,
    name_to_index: Arc<HashMap<String, usize>>,
}

impl Schema {
    /// Creates a schema from parallel type and name lists.
    pub fn new(types: Vec<FieldType>, names: Vec<&str>) -> Result<Self> {
        if types.len() != names.len() {
            return Err(LasError::SchemaMismatch(format!(
                "{} types but {} names",
                types.len(),
                names.len()
            )));
        }
        let mut name_to_index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            name_to_index.insert(name.to_string(), i);
        }
        if name_to_index.len() != names.len() {
            return Err(LasError::SchemaMismatch("duplicate field name".to_string()));
        }
        Ok(Self {
            types: types.into(),
            name_to_index: Arc::new(name_to_index),
        })
    }

    /// Number of fields.
    pub fn arity(&self) -> usize {
        self.types.len()
    }

    /// Type of field `i`.
    pub fn field_type(&self, i: usize) -> FieldType {
        self.types[i]
    }

    /// Index of a named field.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Checks arity and per-field types against this schema.
    pub fn compatible(&self, tuple: &Tuple) -> bool {
        if tuple.arity() != self.arity() {
            return false;
        }
        self.types
            .iter()
            .zip(tuple.fields())
            .all(|(ty, field)| field.field_type() == *ty)
    }

    /// Serialized byte length of a tuple under this schema.
    pub fn length(&self, tuple: &Tuple) -> usize {
        self.types
            .iter()
            .zip(tuple.fields())
            .map(|(ty, field)| match ty {
                FieldType::Varchar => {
                    2 + field.as_str().map(str::len).unwrap_or(0)
                }
                _ => ty.fixed_size().unwrap_or(0),
            })
            .sum()
    }

    /// Serializes a tuple to bytes.
    ///
    /// INT is 4 bytes little-endian, DOUBLE 8 bytes IEEE-754, CHAR a
    /// 64-byte NUL-padded block (values are capped at 63 bytes so the
    /// terminator always fits), VARCHAR a u16 length prefix plus bytes.
    pub fn serialize(&self, tuple: &Tuple) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.length(tuple));
        for (ty, field) in self.types.iter().zip(tuple.fields()) {
            match (ty, field) {
                (FieldType::Int, Field::Int(v)) => buf.put_i32_le(*v),
                (FieldType::Double, Field::Double(v)) => buf.put_f64_le(*v),
                (FieldType::Char, Field::Char(s)) | (FieldType::Char, Field::Varchar(s)) => {
                    let raw = s.as_bytes();
                    let len = raw.len().min(CHAR_SIZE - 1);
                    buf.put_slice(&raw[..len]);
                    buf.put_bytes(0, CHAR_SIZE - len);
                }
                (FieldType::Varchar, Field::Varchar(s)) | (FieldType::Varchar, Field::Char(s)) => {
                    let raw = s.as_bytes();
                    buf.put_u16_le(raw.len() as u16);
                    buf.put_slice(raw);
                }
                // Type-checked at insert; a mismatch here writes the
                // field's zero value rather than corrupting the layout.
                (FieldType::Int, _) => buf.put_i32_le(0),
                (FieldType::Double, _) => buf.put_f64_le(0.0),
                (FieldType::Char, _) => buf.put_bytes(0, CHAR_SIZE),
                (FieldType::Varchar, _) => buf.put_u16_le(0),
            }
        }
        buf.freeze()
    }

    /// Deserializes a tuple from a page slice.
    ///
    /// The slice must start at a record written by [`Schema::serialize`];
    /// trailing bytes are ignored.
    pub fn deserialize(&self, data: &[u8]) -> Tuple {
        let mut fields = Vec::with_capacity(self.types.len());
        let mut off = 0;
        for ty in self.types.iter() {
            match ty {
                FieldType::Int => {
                    let v = i32::from_le_bytes([
                        data[off],
                        data[off + 1],
                        data[off + 2],
                        data[off + 3],
                    ]);
                    fields.push(Field::Int(v));
                    off += 4;
                }
                FieldType::Double => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&data[off..off + 8]);
                    fields.push(Field::Double(f64::from_le_bytes(raw)));
                    off += 8;
                }
                FieldType::Char => {
                    let raw = &data[off..off + CHAR_SIZE];
                    let end = raw.iter().position(|&b| b == 0).unwrap_or(CHAR_SIZE);
                    fields.push(Field::Char(
                        String::from_utf8_lossy(&raw[..end]).into_owned(),
                    ));
                    off += CHAR_SIZE;
                }
                FieldType::Varchar => {
                    let len = u16::from_le_bytes([data[off], data[off + 1]]) as usize;
                    off += 2;
                    fields.push(Field::Varchar(
                        String::from_utf8_lossy(&data[off..off + len]).into_owned(),
                    ));
                    off += len;
                }
            }
        }
        Tuple::new(fields)
    }
}
