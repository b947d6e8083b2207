//! Checked fixed-width readers.
//!
//! `bytes::Buf` getters panic on underflow; these return
//! [`S7Error::TruncatedInput`] instead. All multi-byte fields are big-endian.

use bytes::{Buf, Bytes};

use crate::error::{Result, S7Error};

#[inline]
pub(crate) fn ensure(buf: &impl Buf, needed: usize) -> Result<()> {
    let available = buf.remaining();
    if available < needed {
        return Err(S7Error::TruncatedInput { needed, available });
    }
    Ok(())
}

#[inline]
pub(crate) fn peek_u8(buf: &impl Buf) -> Option<u8> {
    buf.chunk().first().copied()
}

#[inline]
pub(crate) fn read_u8(buf: &mut impl Buf) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

#[inline]
pub(crate) fn read_i8(buf: &mut impl Buf) -> Result<i8> {
    ensure(buf, 1)?;
    Ok(buf.get_i8())
}

#[inline]
pub(crate) fn read_u16(buf: &mut impl Buf) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

#[inline]
pub(crate) fn read_i16(buf: &mut impl Buf) -> Result<i16> {
    ensure(buf, 2)?;
    Ok(buf.get_i16())
}

#[inline]
pub(crate) fn read_u32(buf: &mut impl Buf) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

#[inline]
pub(crate) fn read_i32(buf: &mut impl Buf) -> Result<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

#[inline]
pub(crate) fn read_u64(buf: &mut impl Buf) -> Result<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

#[inline]
pub(crate) fn read_i64(buf: &mut impl Buf) -> Result<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

#[inline]
pub(crate) fn read_f32(buf: &mut impl Buf) -> Result<f32> {
    ensure(buf, 4)?;
    Ok(buf.get_f32())
}

#[inline]
pub(crate) fn read_f64(buf: &mut impl Buf) -> Result<f64> {
    ensure(buf, 8)?;
    Ok(buf.get_f64())
}

#[inline]
pub(crate) fn read_bytes(buf: &mut impl Buf, len: usize) -> Result<Bytes> {
    ensure(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

/// Little-endian readers, used only by the alarm text library tables.
pub(crate) mod le {
    use super::*;

    #[inline]
    pub(crate) fn read_u16(buf: &mut impl Buf) -> Result<u16> {
        ensure(buf, 2)?;
        Ok(buf.get_u16_le())
    }

    #[inline]
    pub(crate) fn read_u32(buf: &mut impl Buf) -> Result<u32> {
        ensure(buf, 4)?;
        Ok(buf.get_u32_le())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_reads() {
        let mut buf: &[u8] = &[0x12, 0x34, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(read_u16(&mut buf).unwrap(), 0x1234);
        assert_eq!(read_u32(&mut buf).unwrap(), 0x100);
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_truncated_read() {
        let mut buf: &[u8] = &[0x12];
        let err = read_u32(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            S7Error::TruncatedInput {
                needed: 4,
                available: 1
            }
        ));
    }

    #[test]
    fn test_little_endian_reads() {
        let mut buf: &[u8] = &[0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(le::read_u16(&mut buf).unwrap(), 0x1234);
        assert_eq!(le::read_u32(&mut buf).unwrap(), 0x1234_5678);
    }
}
