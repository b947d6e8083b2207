//! ISO-on-TCP (RFC 1006) codec.
//!
//! Every TPDU is wrapped in a TPKT header; the COTP header that follows
//! identifies connection request/confirm and data TPDUs:
//!
//! ```text
//! TPKT: 03 | 00 | length:u16 (whole packet)
//! COTP: li:u8 | type:u8 | ...
//!   CR/CC: E0|D0 dst_ref:u16 src_ref:u16 class:u8 (code:u8 len:u8 value)*
//!   DT:    F0 eot|nr:u8
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::S7Error;

/// TPKT version byte.
pub const TPKT_VERSION: u8 = 0x03;
/// TPKT header size.
pub const TPKT_HEADER_SIZE: usize = 4;

/// COTP connection request.
pub const COTP_CR: u8 = 0xE0;
/// COTP connection confirm.
pub const COTP_CC: u8 = 0xD0;
/// COTP data.
pub const COTP_DT: u8 = 0xF0;
/// End-of-transmission bit of a data TPDU.
pub const COTP_EOT: u8 = 0x80;

/// TPDU size parameter.
pub const PARAM_TPDU_SIZE: u8 = 0xC0;
/// Calling (local) TSAP parameter.
pub const PARAM_SRC_TSAP: u8 = 0xC1;
/// Called (remote) TSAP parameter.
pub const PARAM_DST_TSAP: u8 = 0xC2;

/// TPDU size code for 1024 bytes.
pub const TPDU_SIZE_1024: u8 = 0x0A;

/// Local TSAP used for S7CommPlus sessions.
pub const DEFAULT_LOCAL_TSAP: &[u8] = &[0x06, 0x00];
/// Remote TSAP of the HMI access point.
pub const DEFAULT_REMOTE_TSAP: &[u8] = b"SIMATIC-ROOT-HMI";

/// Largest TPKT packet.
const MAX_TPKT_LENGTH: usize = 0xFFFF;

/// Size in bytes of a TPDU size code.
#[inline]
pub const fn tpdu_size(code: u8) -> usize {
    1 << code
}

/// Connection parameters carried by CR and CC TPDUs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub dst_ref: u16,
    pub src_ref: u16,
    pub tpdu_size: u8,
    pub local_tsap: Bytes,
    pub remote_tsap: Bytes,
}

impl ConnectionParams {
    /// Parameters of an S7CommPlus connection request.
    pub fn new(remote_tsap: impl Into<Bytes>) -> Self {
        Self {
            dst_ref: 0,
            src_ref: 0x0001,
            tpdu_size: TPDU_SIZE_1024,
            local_tsap: Bytes::from_static(DEFAULT_LOCAL_TSAP),
            remote_tsap: remote_tsap.into(),
        }
    }
}

/// A COTP TPDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tpdu {
    ConnectionRequest(ConnectionParams),
    ConnectionConfirm(ConnectionParams),
    Data { eot: bool, payload: Bytes },
}

impl Tpdu {
    /// Data TPDU.
    pub fn data(eot: bool, payload: impl Into<Bytes>) -> Self {
        Self::Data {
            eot,
            payload: payload.into(),
        }
    }
}

fn decode_connection(mut cotp: Bytes) -> Result<ConnectionParams, S7Error> {
    if cotp.remaining() < 5 {
        return Err(S7Error::invalid_frame("COTP connection TPDU too short"));
    }
    let dst_ref = cotp.get_u16();
    let src_ref = cotp.get_u16();
    let _class = cotp.get_u8();

    let mut params = ConnectionParams {
        dst_ref,
        src_ref,
        tpdu_size: TPDU_SIZE_1024,
        local_tsap: Bytes::new(),
        remote_tsap: Bytes::new(),
    };
    while cotp.remaining() >= 2 {
        let code = cotp.get_u8();
        let len = usize::from(cotp.get_u8());
        if cotp.remaining() < len {
            return Err(S7Error::invalid_frame("COTP parameter truncated"));
        }
        let value = cotp.split_to(len);
        match code {
            PARAM_TPDU_SIZE if len == 1 => params.tpdu_size = value[0],
            PARAM_SRC_TSAP => params.local_tsap = value,
            PARAM_DST_TSAP => params.remote_tsap = value,
            _ => {}
        }
    }
    Ok(params)
}

fn encode_connection(kind: u8, params: &ConnectionParams, dst: &mut BytesMut) {
    // type, refs, class, tpdu size, both TSAPs
    let li = 6 + 3 + 2 + params.local_tsap.len() + 2 + params.remote_tsap.len();
    dst.put_u8(li as u8);
    dst.put_u8(kind);
    dst.put_u16(params.dst_ref);
    dst.put_u16(params.src_ref);
    dst.put_u8(0x00);
    dst.put_u8(PARAM_TPDU_SIZE);
    dst.put_u8(1);
    dst.put_u8(params.tpdu_size);
    dst.put_u8(PARAM_SRC_TSAP);
    dst.put_u8(params.local_tsap.len() as u8);
    dst.put_slice(&params.local_tsap);
    dst.put_u8(PARAM_DST_TSAP);
    dst.put_u8(params.remote_tsap.len() as u8);
    dst.put_slice(&params.remote_tsap);
}

/// TPKT/COTP codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsoCodec;

impl IsoCodec {
    /// Create a new ISO-on-TCP codec.
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for IsoCodec {
    type Item = Tpdu;
    type Error = S7Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if src.len() < TPKT_HEADER_SIZE {
            return Ok(None);
        }
        if src[0] != TPKT_VERSION {
            return Err(S7Error::invalid_frame(format!(
                "invalid TPKT version 0x{:02X}",
                src[0]
            )));
        }
        let length = usize::from(u16::from_be_bytes([src[2], src[3]]));
        if length < TPKT_HEADER_SIZE + 2 {
            return Err(S7Error::invalid_frame(format!("invalid TPKT length {length}")));
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut packet = src.split_to(length).freeze();
        packet.advance(TPKT_HEADER_SIZE);
        let li = usize::from(packet.get_u8());
        if li == 0 || li > packet.remaining() {
            return Err(S7Error::invalid_frame(format!("invalid COTP length {li}")));
        }
        let mut header = packet.split_to(li);
        let kind = header.get_u8();

        match kind {
            COTP_DT => {
                if !header.has_remaining() {
                    return Err(S7Error::invalid_frame("COTP data header truncated"));
                }
                let eot = header.get_u8() & COTP_EOT != 0;
                Ok(Some(Tpdu::Data {
                    eot,
                    payload: packet,
                }))
            }
            COTP_CR => Ok(Some(Tpdu::ConnectionRequest(decode_connection(header)?))),
            COTP_CC => Ok(Some(Tpdu::ConnectionConfirm(decode_connection(header)?))),
            other => Err(S7Error::invalid_frame(format!(
                "unsupported COTP type 0x{other:02X}"
            ))),
        }
    }
}

impl Encoder<Tpdu> for IsoCodec {
    type Error = S7Error;

    fn encode(&mut self, item: Tpdu, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let mut body = BytesMut::with_capacity(32);
        match &item {
            Tpdu::Data { eot, payload } => {
                body.put_u8(2);
                body.put_u8(COTP_DT);
                body.put_u8(if *eot { COTP_EOT } else { 0x00 });
                body.put_slice(payload);
            }
            Tpdu::ConnectionRequest(params) => encode_connection(COTP_CR, params, &mut body),
            Tpdu::ConnectionConfirm(params) => encode_connection(COTP_CC, params, &mut body),
        }

        let length = TPKT_HEADER_SIZE + body.len();
        if length > MAX_TPKT_LENGTH {
            return Err(S7Error::invalid_frame("TPDU too large"));
        }
        dst.reserve(length);
        dst.put_u8(TPKT_VERSION);
        dst.put_u8(0x00);
        dst.put_u16(length as u16);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
