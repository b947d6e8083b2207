//! S7CommPlus frame codec for tokio.
//!
//! A PDU is carried in one or more fragments, each with a 4-byte header, and
//! closed by a trailer with length 0:
//!
//! ```text
//! 72 | version | len:u16 | data[len]      fragment (repeated)
//! 72 | version | 00 00                    trailer
//! ```
//!
//! System event frames (version 0xFE) consist of a single fragment and carry
//! no trailer.
//!
//! The frame layer sits above TLS, so the codec is driven over a plaintext
//! buffer rather than through `Framed`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::S7Error;
use crate::pdu::ProtocolVersion;

/// Frame start byte.
pub const START_BYTE: u8 = 0x72;

/// Frame/fragment header size.
pub const HEADER_SIZE: usize = 4;

/// Default maximum data length of one outbound fragment.
pub const DEFAULT_MAX_FRAGMENT: usize = 0x0400;

/// Upper bound on a reassembled frame.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// A complete S7CommPlus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: ProtocolVersion,
    /// PDU bytes, starting with the opcode.
    pub data: Bytes,
}

impl Frame {
    pub fn new(version: ProtocolVersion, data: impl Into<Bytes>) -> Self {
        Self {
            version,
            data: data.into(),
        }
    }
}

/// S7CommPlus frame codec.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_util::codec::{Decoder, Encoder};
/// use s7commplus::codec::{Frame, S7CommPlusCodec};
///
/// let mut codec = S7CommPlusCodec::new();
/// let mut out = BytesMut::new();
/// codec.encode(Frame::new(ProtocolVersion::V1, pdu), &mut out)?;
///
/// plaintext.extend_from_slice(&received);
/// while let Some(frame) = codec.decode(&mut plaintext)? {
///     handle(frame);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct S7CommPlusCodec {
    max_fragment: usize,
    // Fragments received so far for the current frame
    partial: Option<(ProtocolVersion, BytesMut)>,
}

impl Default for S7CommPlusCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl S7CommPlusCodec {
    /// Create a codec with the default fragment size.
    pub fn new() -> Self {
        Self::with_max_fragment(DEFAULT_MAX_FRAGMENT)
    }

    /// Create a codec splitting outbound frames into fragments of at most
    /// `max_fragment` data bytes.
    pub fn with_max_fragment(max_fragment: usize) -> Self {
        Self {
            max_fragment: max_fragment.clamp(1, usize::from(u16::MAX)),
            partial: None,
        }
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.partial = None;
    }
}

impl Decoder for S7CommPlusCodec {
    type Item = Frame;
    type Error = S7Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }
            if src[0] != START_BYTE {
                return Err(S7Error::invalid_frame(format!(
                    "expected start byte 0x72, got 0x{:02X}",
                    src[0]
                )));
            }
            let version = ProtocolVersion::from_u8(src[1])?;
            let length = usize::from(u16::from_be_bytes([src[2], src[3]]));

            if length == 0 {
                src.advance(HEADER_SIZE);
                return match self.partial.take() {
                    Some((version, data)) => Ok(Some(Frame {
                        version,
                        data: data.freeze(),
                    })),
                    None => Err(S7Error::invalid_frame("trailer without data")),
                };
            }

            if src.len() < HEADER_SIZE + length {
                src.reserve(HEADER_SIZE + length - src.len());
                return Ok(None);
            }
            src.advance(HEADER_SIZE);
            let chunk = src.split_to(length);

            if version == ProtocolVersion::SystemEvent {
                if self.partial.is_some() {
                    return Err(S7Error::invalid_frame("system event inside fragmented frame"));
                }
                return Ok(Some(Frame {
                    version,
                    data: chunk.freeze(),
                }));
            }

            match &mut self.partial {
                Some((partial_version, data)) => {
                    if *partial_version != version {
                        return Err(S7Error::invalid_frame(format!(
                            "fragment version {version:?} differs from {partial_version:?}"
                        )));
                    }
                    if data.len() + chunk.len() > MAX_FRAME_SIZE {
                        return Err(S7Error::invalid_frame("frame too large"));
                    }
                    data.extend_from_slice(&chunk);
                }
                None => self.partial = Some((version, chunk)),
            }
        }
    }
}

impl Encoder<Frame> for S7CommPlusCodec {
    type Error = S7Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        if item.data.is_empty() {
            return Err(S7Error::invalid_frame("empty frame"));
        }
        let fragments = item.data.len().div_ceil(self.max_fragment);
        dst.reserve(item.data.len() + (fragments + 1) * HEADER_SIZE);

        for chunk in item.data.chunks(self.max_fragment) {
            dst.put_u8(START_BYTE);
            dst.put_u8(item.version.as_u8());
            dst.put_u16(chunk.len() as u16);
            dst.put_slice(chunk);
        }
        if item.version != ProtocolVersion::SystemEvent {
            dst.put_u8(START_BYTE);
            dst.put_u8(item.version.as_u8());
            dst.put_u16(0);
        }
        Ok(())
    }
}
