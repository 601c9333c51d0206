//! Entity metadata
//!
//! Wire form: a run of `(tag, value)` pairs closed by the byte 127.
//!
//! ```text
//!   tag byte: [K K K][I I I I I]
//!              kind    index
//! ```
//!
//! Kinds 0..=4 carry a single byte / short / int / float / raw string;
//! kind 5 carries (short, byte, short) and kind 6 (int, int, int).

use super::{decode_string, encode_string, CodecError, CodecResult, Wire};
use crate::buffer::ByteBuffer;

/// Terminator of a metadata run
pub const METADATA_END: u8 = 127;

/// Value kinds, as stored in the top three bits of the tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetadataKind {
    Byte = 0,
    Short = 1,
    Int = 2,
    Float = 3,
    String = 4,
    ShortByteShort = 5,
    IntIntInt = 6,
}

impl MetadataKind {
    pub fn from_bits(kind: u8) -> Option<Self> {
        Some(match kind {
            0 => MetadataKind::Byte,
            1 => MetadataKind::Short,
            2 => MetadataKind::Int,
            3 => MetadataKind::Float,
            4 => MetadataKind::String,
            5 => MetadataKind::ShortByteShort,
            6 => MetadataKind::IntIntInt,
            _ => return None,
        })
    }
}

/// A single metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Float(f32),
    String(String),
    /// Item slot: id, count, damage
    ShortByteShort(i16, i8, i16),
    /// Block position
    IntIntInt(i32, i32, i32),
}

impl MetadataValue {
    pub fn kind(&self) -> MetadataKind {
        match self {
            MetadataValue::Byte(_) => MetadataKind::Byte,
            MetadataValue::Short(_) => MetadataKind::Short,
            MetadataValue::Int(_) => MetadataKind::Int,
            MetadataValue::Float(_) => MetadataKind::Float,
            MetadataValue::String(_) => MetadataKind::String,
            MetadataValue::ShortByteShort(..) => MetadataKind::ShortByteShort,
            MetadataValue::IntIntInt(..) => MetadataKind::IntIntInt,
        }
    }
}

/// One tagged entry
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    index: u8,
    value: MetadataValue,
}

impl MetadataEntry {
    /// Create an entry; only the low five bits of `index` are kept
    pub fn new(index: u8, value: MetadataValue) -> Self {
        Self {
            index: index & 0x1F,
            value,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn value(&self) -> &MetadataValue {
        &self.value
    }

    /// The tag byte as it appears on the wire
    pub fn tag(&self) -> u8 {
        ((self.value.kind() as u8) << 5) | self.index
    }
}

/// An ordered metadata record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Vec<MetadataEntry>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: u8, value: MetadataValue) {
        self.entries.push(MetadataEntry::new(index, value));
    }

    /// Builder-style `push`
    pub fn with(mut self, index: u8, value: MetadataValue) -> Self {
        self.push(index, value);
        self
    }

    /// First entry with the given index
    pub fn get(&self, index: u8) -> Option<&MetadataValue> {
        self.entries
            .iter()
            .find(|e| e.index == index)
            .map(|e| &e.value)
    }

    pub fn entries(&self) -> &[MetadataEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Append a metadata record, terminator included
pub fn encode_metadata(buf: &mut ByteBuffer<'_>, metadata: &Metadata) -> CodecResult<()> {
    for entry in &metadata.entries {
        let tag = entry.tag();
        if tag == METADATA_END {
            return Err(CodecError::ReservedMetadataTag(tag));
        }
        tag.encode(buf);

        match &entry.value {
            MetadataValue::Byte(v) => v.encode(buf),
            MetadataValue::Short(v) => v.encode(buf),
            MetadataValue::Int(v) => v.encode(buf),
            MetadataValue::Float(v) => v.encode(buf),
            MetadataValue::String(v) => encode_string(buf, v)?,
            MetadataValue::ShortByteShort(first, second, third) => {
                first.encode(buf);
                second.encode(buf);
                third.encode(buf);
            }
            MetadataValue::IntIntInt(first, second, third) => {
                first.encode(buf);
                second.encode(buf);
                third.encode(buf);
            }
        }
    }

    METADATA_END.encode(buf);
    Ok(())
}

/// Take a metadata record
///
/// Stops after the terminator, leaving any following bytes in place. A
/// record whose terminator has not arrived yet is incomplete and nothing is
/// consumed.
pub fn decode_metadata(buf: &mut ByteBuffer<'_>) -> CodecResult<Metadata> {
    let mut scratch = ByteBuffer::from(buf.content());
    let metadata = read_entries(&mut scratch)?;

    let consumed = buf.len() - scratch.len();
    buf.drain(consumed)?;
    Ok(metadata)
}

fn read_entries(buf: &mut ByteBuffer<'_>) -> CodecResult<Metadata> {
    let mut metadata = Metadata::new();

    loop {
        let tag = u8::decode(buf)?;
        if tag == METADATA_END {
            break;
        }

        let kind = MetadataKind::from_bits(tag >> 5)
            .ok_or(CodecError::UnknownMetadataKind { tag, kind: tag >> 5 })?;

        let value = match kind {
            MetadataKind::Byte => MetadataValue::Byte(i8::decode(buf)?),
            MetadataKind::Short => MetadataValue::Short(i16::decode(buf)?),
            MetadataKind::Int => MetadataValue::Int(i32::decode(buf)?),
            MetadataKind::Float => MetadataValue::Float(f32::decode(buf)?),
            MetadataKind::String => MetadataValue::String(decode_string(buf)?),
            MetadataKind::ShortByteShort => MetadataValue::ShortByteShort(
                i16::decode(buf)?,
                i8::decode(buf)?,
                i16::decode(buf)?,
            ),
            MetadataKind::IntIntInt => MetadataValue::IntIntInt(
                i32::decode(buf)?,
                i32::decode(buf)?,
                i32::decode(buf)?,
            ),
        };

        metadata.entries.push(MetadataEntry::new(tag & 0x1F, value));
    }

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        Metadata::new()
            .with(0, MetadataValue::Byte(-3))
            .with(1, MetadataValue::Short(300))
            .with(2, MetadataValue::Int(-70000))
            .with(3, MetadataValue::Float(0.25))
            .with(4, MetadataValue::String("steve".to_string()))
            .with(5, MetadataValue::ShortByteShort(276, 1, -2))
            .with(17, MetadataValue::IntIntInt(10, -64, 1 << 20))
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let metadata = sample();
        let mut buf = ByteBuffer::new();
        encode_metadata(&mut buf, &metadata).unwrap();

        let decoded = decode_metadata(&mut buf).unwrap();
        assert_eq!(decoded, metadata);
        assert!(buf.is_empty());

        let tags: Vec<u8> = decoded.entries().iter().map(|e| e.tag()).collect();
        assert_eq!(tags, vec![0x00, 0x21, 0x42, 0x63, 0x84, 0xA5, 0xD1]);
    }

    #[test]
    fn test_composite_field_order() {
        let metadata = Metadata::new().with(2, MetadataValue::ShortByteShort(0x0102, 0x03, 0x0405));
        let mut buf = ByteBuffer::new();
        encode_metadata(&mut buf, &metadata).unwrap();
        assert_eq!(buf.content(), &[0xA2, 0x01, 0x02, 0x03, 0x04, 0x05, 0x7F]);
    }

    #[test]
    fn test_decode_stops_at_terminator() {
        let mut buf = ByteBuffer::from(vec![0x00, 0x05, 0x7F, 0x00, 0x09]);
        let metadata = decode_metadata(&mut buf).unwrap();

        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.get(0), Some(&MetadataValue::Byte(5)));
        assert_eq!(buf.content(), &[0x00, 0x09]);
    }

    #[test]
    fn test_empty_record() {
        let mut buf = ByteBuffer::new();
        encode_metadata(&mut buf, &Metadata::new()).unwrap();
        assert_eq!(buf.content(), &[METADATA_END]);
        assert!(decode_metadata(&mut buf).unwrap().is_empty());
    }

    #[test]
    fn test_unterminated_record_is_incomplete() {
        let mut buf = ByteBuffer::from(vec![0x00, 0x05, 0x21, 0x00]);
        assert!(decode_metadata(&mut buf).unwrap_err().is_incomplete());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_unknown_kind() {
        let mut buf = ByteBuffer::from(vec![0xE0, 0x00]);
        assert!(matches!(
            decode_metadata(&mut buf),
            Err(CodecError::UnknownMetadataKind { tag: 0xE0, kind: 7 })
        ));
    }

    #[test]
    fn test_reserved_tag() {
        let metadata = Metadata::new().with(31, MetadataValue::Float(1.0));
        let mut buf = ByteBuffer::new();
        assert!(matches!(
            encode_metadata(&mut buf, &metadata),
            Err(CodecError::ReservedMetadataTag(METADATA_END))
        ));
    }
}
