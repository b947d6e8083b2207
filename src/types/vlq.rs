//! Variable-length quantity (VLQ) integer codec.
//!
//! Each byte carries 7 payload bits; the MSB is the continuation flag. Groups
//! are emitted least-significant first. Signed values are zig-zag folded
//! before chunking so that small magnitudes of either sign stay short.
//!
//! ```text
//! 300 (0b1_0010_1100) -> [0xAC, 0x02]
//!                          |      └─ 0b0000010, last group
//!                          └─ 0b0101100 | continuation
//! ```
//!
//! Fixed-width header fields are *not* VLQ; see [`super::wire`].

use bytes::{Buf, BufMut};

use crate::error::{Result, S7Error};

/// Decode an unsigned VLQ limited to `bits` bits of payload.
fn decode_raw(buf: &mut impl Buf, bits: u32) -> Result<u64> {
    let max_chunks = bits.div_ceil(7);
    let mut value = 0u64;
    let mut shift = 0u32;

    for _ in 0..max_chunks {
        if !buf.has_remaining() {
            return Err(S7Error::TruncatedInput {
                needed: 1,
                available: 0,
            });
        }
        let byte = buf.get_u8();
        let payload = u64::from(byte & 0x7F);

        // Last group may only carry the bits left in the target width
        if shift + 7 > bits && (payload >> (bits - shift)) != 0 {
            return Err(S7Error::Overflow { bits });
        }
        value |= payload << shift;

        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }

    Err(S7Error::Overflow { bits })
}

#[inline]
fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Encode an unsigned value.
pub fn encode_u64(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Encode an unsigned 32-bit value.
#[inline]
pub fn encode_u32(buf: &mut impl BufMut, value: u32) {
    encode_u64(buf, u64::from(value));
}

/// Encode an unsigned 16-bit value.
#[inline]
pub fn encode_u16(buf: &mut impl BufMut, value: u16) {
    encode_u64(buf, u64::from(value));
}

/// Encode a signed 64-bit value.
#[inline]
pub fn encode_i64(buf: &mut impl BufMut, value: i64) {
    encode_u64(buf, zigzag_encode(value));
}

/// Encode a signed 32-bit value.
#[inline]
pub fn encode_i32(buf: &mut impl BufMut, value: i32) {
    encode_i64(buf, i64::from(value));
}

/// Encode a signed 16-bit value.
#[inline]
pub fn encode_i16(buf: &mut impl BufMut, value: i16) {
    encode_i64(buf, i64::from(value));
}

/// Number of bytes [`encode_u64`] emits for `value`.
pub fn encoded_len(value: u64) -> usize {
    let significant = 64 - value.leading_zeros() as usize;
    significant.div_ceil(7).max(1)
}

/// Decode an unsigned 64-bit value.
#[inline]
pub fn decode_u64(buf: &mut impl Buf) -> Result<u64> {
    decode_raw(buf, 64)
}

/// Decode an unsigned 32-bit value.
#[inline]
pub fn decode_u32(buf: &mut impl Buf) -> Result<u32> {
    decode_raw(buf, 32).map(|v| v as u32)
}

/// Decode an unsigned 16-bit value.
#[inline]
pub fn decode_u16(buf: &mut impl Buf) -> Result<u16> {
    decode_raw(buf, 16).map(|v| v as u16)
}

/// Decode a signed 64-bit value.
#[inline]
pub fn decode_i64(buf: &mut impl Buf) -> Result<i64> {
    decode_raw(buf, 64).map(zigzag_decode)
}

/// Decode a signed 32-bit value.
#[inline]
pub fn decode_i32(buf: &mut impl Buf) -> Result<i32> {
    decode_raw(buf, 32).map(|v| zigzag_decode(v) as i32)
}

/// Decode a signed 16-bit value.
#[inline]
pub fn decode_i16(buf: &mut impl Buf) -> Result<i16> {
    decode_raw(buf, 16).map(|v| zigzag_decode(v) as i16)
}

/// Decode an unsigned value of `bits` width from the start of `input`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_unsigned(input: &[u8], bits: u32) -> Result<(u64, usize)> {
    let mut cursor = input;
    let value = decode_raw(&mut cursor, bits)?;
    Ok((value, input.len() - cursor.len()))
}

/// Decode a signed value of `bits` width from the start of `input`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_signed(input: &[u8], bits: u32) -> Result<(i64, usize)> {
    let (raw, consumed) = decode_unsigned(input, bits)?;
    Ok((zigzag_decode(raw), consumed))
}
