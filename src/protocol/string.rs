//! String codecs
//!
//! Two encodings share the wire:
//! - raw strings: a short byte count followed by the bytes
//! - legacy strings: a short count of 16-bit units followed by the units,
//!   each a Basic Multilingual Plane code point. Anything outside the BMP,
//!   and any malformed input, becomes U+FFFD.

use super::{CodecError, CodecResult, Wire};
use crate::buffer::ByteBuffer;

/// Replacement code unit for characters the legacy form cannot carry
pub const REPLACEMENT_UNIT: u16 = 0xFFFD;

/// What a replacement unit turns back into when decoded
pub const REPLACEMENT_BYTE: u8 = b'?';

/// Colour-code marker; a trailing one with nothing after it crashes clients
const FORMAT_MARKER: char = '\u{00A7}';

/// Largest length a short prefix can carry
pub const MAX_STRING_LENGTH: usize = i16::MAX as usize;

/// Strip characters clients must never receive
///
/// Control characters are removed, as is a colour-code marker that ends the
/// string without the code it introduces.
pub fn sanitize(input: &str) -> String {
    let mut out: String = input.chars().filter(|c| !c.is_control()).collect();
    while out.ends_with(FORMAT_MARKER) {
        out.pop();
    }
    out
}

/// Read the length prefix without consuming it
fn peek_length(buf: &ByteBuffer<'_>) -> CodecResult<usize> {
    buf.ensure(2)?;
    let raw = i16::from_be_bytes([buf.content()[0], buf.content()[1]]);
    if raw < 0 {
        return Err(CodecError::InvalidLength(raw));
    }
    Ok(raw as usize)
}

/// Append a raw string: sanitized bytes behind a byte-count prefix
pub fn encode_string(buf: &mut ByteBuffer<'_>, value: &str) -> CodecResult<()> {
    let sanitized = sanitize(value);
    let bytes = sanitized.as_bytes();
    if bytes.len() > MAX_STRING_LENGTH {
        return Err(CodecError::StringTooLong(bytes.len(), MAX_STRING_LENGTH));
    }

    (bytes.len() as i16).encode(buf);
    buf.add(bytes);
    Ok(())
}

/// Take a raw string
///
/// Invalid UTF-8 is replaced rather than rejected.
pub fn decode_string(buf: &mut ByteBuffer<'_>) -> CodecResult<String> {
    let length = peek_length(buf)?;
    buf.ensure(2 + length)?;
    buf.drain(2)?;

    let data = buf.remove(length)?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

/// Decode one UTF-8 sequence from the front of `input`
///
/// Returns the code unit and how many bytes were used.
fn next_unit(input: &[u8]) -> (u16, usize) {
    let lead = input[0];
    let needed = match lead {
        0x00..=0x7F => return (u16::from(lead), 1),
        0xC0..=0xDF => 1,
        0xE0..=0xEF => 2,
        0xF0..=0xF7 => 3,
        // Stray continuation byte or invalid lead
        _ => return (REPLACEMENT_UNIT, 1),
    };

    let tail = &input[1..];
    let valid = tail
        .iter()
        .take(needed)
        .take_while(|b| **b & 0xC0 == 0x80)
        .count();
    if valid < needed {
        return (REPLACEMENT_UNIT, 1 + valid);
    }

    let unit = match needed {
        1 => (u16::from(lead & 0x1F) << 6) | u16::from(tail[0] & 0x3F),
        2 => {
            (u16::from(lead & 0x0F) << 12)
                | (u16::from(tail[0] & 0x3F) << 6)
                | u16::from(tail[1] & 0x3F)
        }
        // Four-byte sequences lie outside the BMP
        _ => REPLACEMENT_UNIT,
    };
    (unit, needed + 1)
}

/// Transcode UTF-8 bytes into legacy 16-bit units, one per character
pub fn utf8_to_units(input: &[u8]) -> Vec<u16> {
    let mut units = Vec::with_capacity(input.len());
    let mut offset = 0;

    while offset < input.len() {
        let (unit, used) = next_unit(&input[offset..]);
        units.push(unit);
        offset += used;
    }

    units
}

/// Transcode legacy 16-bit units back into UTF-8 bytes
///
/// The replacement unit, and lone surrogates that have no UTF-8 form, come
/// back as `?`.
pub fn units_to_utf8(units: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(units.len());

    for &unit in units {
        match unit {
            REPLACEMENT_UNIT | 0xD800..=0xDFFF => out.push(REPLACEMENT_BYTE),
            0x0000..=0x007F => out.push(unit as u8),
            0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }

    out
}

/// Append a legacy string from arbitrary bytes
///
/// Malformed UTF-8 in `value` becomes replacement units.
pub fn encode_string16_bytes(buf: &mut ByteBuffer<'_>, value: &[u8]) -> CodecResult<()> {
    let units = utf8_to_units(value);
    if units.len() > MAX_STRING_LENGTH {
        return Err(CodecError::StringTooLong(units.len(), MAX_STRING_LENGTH));
    }

    (units.len() as i16).encode(buf);
    for unit in units {
        unit.encode(buf);
    }
    Ok(())
}

/// Append a legacy string: sanitized, one 16-bit unit per character
pub fn encode_string16(buf: &mut ByteBuffer<'_>, value: &str) -> CodecResult<()> {
    encode_string16_bytes(buf, sanitize(value).as_bytes())
}

/// Take a legacy string as NUL-terminated UTF-8 bytes
///
/// The terminator is not part of the string; it is there for consumers that
/// scan for it.
pub fn decode_string16_bytes(buf: &mut ByteBuffer<'_>) -> CodecResult<Vec<u8>> {
    let count = peek_length(buf)?;
    buf.ensure(2 + count * 2)?;
    buf.drain(2)?;

    let mut units = Vec::with_capacity(count);
    for _ in 0..count {
        units.push(u16::decode(buf)?);
    }

    let mut bytes = units_to_utf8(&units);
    bytes.push(0);
    Ok(bytes)
}

/// Take a legacy string
pub fn decode_string16(buf: &mut ByteBuffer<'_>) -> CodecResult<String> {
    let mut bytes = decode_string16_bytes(buf)?;
    bytes.pop();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
