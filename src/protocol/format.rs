//! Field descriptors
//!
//! A message schema is an ordered slice of `FieldKind`s. `encode_fields` and
//! `decode_fields` walk a schema and apply the matching codec to each field,
//! in order.

use super::{
    decode_metadata, decode_string, decode_string16, encode_metadata, encode_string,
    encode_string16, CodecError, CodecResult, Metadata, Wire,
};
use crate::buffer::ByteBuffer;

/// Wire type of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    /// Byte-count prefixed string
    String,
    /// Unit-count prefixed 16-bit string
    String16,
    Metadata,
}

/// A decoded or to-be-encoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(String),
    String16(String),
    Metadata(Metadata),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Byte(_) => FieldKind::Byte,
            Value::Short(_) => FieldKind::Short,
            Value::Int(_) => FieldKind::Int,
            Value::Long(_) => FieldKind::Long,
            Value::Float(_) => FieldKind::Float,
            Value::Double(_) => FieldKind::Double,
            Value::Boolean(_) => FieldKind::Boolean,
            Value::String(_) => FieldKind::String,
            Value::String16(_) => FieldKind::String16,
            Value::Metadata(_) => FieldKind::Metadata,
        }
    }

    /// Append this value using its own codec
    pub fn encode(&self, buf: &mut ByteBuffer<'_>) -> CodecResult<()> {
        match self {
            Value::Byte(v) => v.encode(buf),
            Value::Short(v) => v.encode(buf),
            Value::Int(v) => v.encode(buf),
            Value::Long(v) => v.encode(buf),
            Value::Float(v) => v.encode(buf),
            Value::Double(v) => v.encode(buf),
            Value::Boolean(v) => v.encode(buf),
            Value::String(v) => encode_string(buf, v)?,
            Value::String16(v) => encode_string16(buf, v)?,
            Value::Metadata(v) => encode_metadata(buf, v)?,
        }
        Ok(())
    }

    /// Take one value of the given kind
    pub fn decode(kind: FieldKind, buf: &mut ByteBuffer<'_>) -> CodecResult<Self> {
        Ok(match kind {
            FieldKind::Byte => Value::Byte(i8::decode(buf)?),
            FieldKind::Short => Value::Short(i16::decode(buf)?),
            FieldKind::Int => Value::Int(i32::decode(buf)?),
            FieldKind::Long => Value::Long(i64::decode(buf)?),
            FieldKind::Float => Value::Float(f32::decode(buf)?),
            FieldKind::Double => Value::Double(f64::decode(buf)?),
            FieldKind::Boolean => Value::Boolean(bool::decode(buf)?),
            FieldKind::String => Value::String(decode_string(buf)?),
            FieldKind::String16 => Value::String16(decode_string16(buf)?),
            FieldKind::Metadata => Value::Metadata(decode_metadata(buf)?),
        })
    }
}

/// Encode `values` in schema order
///
/// Each value must match its descriptor; nothing is written on mismatch.
pub fn encode_fields(
    buf: &mut ByteBuffer<'_>,
    schema: &[FieldKind],
    values: &[Value],
) -> CodecResult<()> {
    if schema.len() != values.len() {
        return Err(CodecError::FieldCount {
            expected: schema.len(),
            actual: values.len(),
        });
    }

    for (index, (expected, value)) in schema.iter().zip(values).enumerate() {
        if value.kind() != *expected {
            return Err(CodecError::FieldMismatch {
                index,
                expected: *expected,
                actual: value.kind(),
            });
        }
    }

    for value in values {
        value.encode(buf)?;
    }
    Ok(())
}

/// Decode one value per descriptor, in schema order
pub fn decode_fields(buf: &mut ByteBuffer<'_>, schema: &[FieldKind]) -> CodecResult<Vec<Value>> {
    schema.iter().map(|kind| Value::decode(*kind, buf)).collect()
}
