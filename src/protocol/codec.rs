//! Scalar codecs
//!
//! Fixed-width big-endian encoding for the primitive wire types.

use bytes::{Buf, BufMut};

use super::CodecResult;
use crate::buffer::ByteBuffer;

/// A value with a fixed-width big-endian wire form
pub trait Wire: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Append the big-endian form of `self`
    fn encode(&self, buf: &mut ByteBuffer<'_>);

    /// Take one value from the front of `buf`
    ///
    /// Fails with an incomplete error, consuming nothing, when fewer than
    /// `SIZE` bytes are buffered.
    fn decode(buf: &mut ByteBuffer<'_>) -> CodecResult<Self>;
}

macro_rules! impl_wire_int {
    ($($t:ty => $put:ident, $get:ident;)*) => {
        $(
            impl Wire for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                #[inline]
                fn encode(&self, buf: &mut ByteBuffer<'_>) {
                    buf.raw_mut().$put(*self);
                }

                #[inline]
                fn decode(buf: &mut ByteBuffer<'_>) -> CodecResult<Self> {
                    buf.ensure(Self::SIZE)?;
                    Ok(buf.raw_mut().$get())
                }
            }
        )*
    };
}

impl_wire_int! {
    i8 => put_i8, get_i8;
    u8 => put_u8, get_u8;
    i16 => put_i16, get_i16;
    u16 => put_u16, get_u16;
    i32 => put_i32, get_i32;
    i64 => put_i64, get_i64;
}

// Floats travel as their raw bit pattern; only the byte order changes.

impl Wire for f32 {
    const SIZE: usize = 4;

    #[inline]
    fn encode(&self, buf: &mut ByteBuffer<'_>) {
        buf.raw_mut().put_u32(self.to_bits());
    }

    #[inline]
    fn decode(buf: &mut ByteBuffer<'_>) -> CodecResult<Self> {
        buf.ensure(Self::SIZE)?;
        Ok(f32::from_bits(buf.raw_mut().get_u32()))
    }
}

impl Wire for f64 {
    const SIZE: usize = 8;

    #[inline]
    fn encode(&self, buf: &mut ByteBuffer<'_>) {
        buf.raw_mut().put_u64(self.to_bits());
    }

    #[inline]
    fn decode(buf: &mut ByteBuffer<'_>) -> CodecResult<Self> {
        buf.ensure(Self::SIZE)?;
        Ok(f64::from_bits(buf.raw_mut().get_u64()))
    }
}

impl Wire for bool {
    const SIZE: usize = 1;

    #[inline]
    fn encode(&self, buf: &mut ByteBuffer<'_>) {
        buf.raw_mut().put_u8(u8::from(*self));
    }

    #[inline]
    fn decode(buf: &mut ByteBuffer<'_>) -> CodecResult<Self> {
        buf.ensure(Self::SIZE)?;
        Ok(buf.raw_mut().get_u8() != 0)
    }
}

/// Append any scalar
#[inline]
pub fn encode<T: Wire>(buf: &mut ByteBuffer<'_>, value: T) {
    value.encode(buf);
}

/// Take any scalar
#[inline]
pub fn decode<T: Wire>(buf: &mut ByteBuffer<'_>) -> CodecResult<T> {
    T::decode(buf)
}
