//! S7CommPlus PDUs.
//!
//! A PDU travels as the data of one [`Frame`](crate::codec::Frame). Requests
//! and responses share a fixed-width header; the body layout depends on the
//! function code:
//!
//! ```text
//! request:  31 | rsvd:u16 | fn:u16 | rsvd:u16 | seq:u16 | session:u32 | flags:u8
//!              | body | [integrity:vlq] | 00 00 00 00
//! response: 32 | rsvd:u16 | fn:u16 | rsvd:u16 | seq:u16 | flags:u8
//!              | return_value:vlq body.. | [integrity:vlq]
//! notify:   33 | see `Notification`
//! ```
//!
//! Response bodies are self-delimiting, so an integrity id is whatever
//! remains after the body has been decoded.

mod explore;
mod notification;
mod session;
mod variables;

pub use explore::*;
pub use notification::*;
pub use session::*;
pub use variables::*;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, S7Error};
use crate::types::{vlq, wire};

/// Transport flags of a regular request.
pub const TRANSPORT_FLAGS: u8 = 0x34;
/// Transport flag bit: the sender expects no response.
pub const FLAG_NO_RESPONSE: u8 = 0x40;

/// First byte of a PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Request = 0x31,
    Response = 0x32,
    Notification = 0x33,
}

impl Opcode {
    #[inline]
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x31 => Ok(Self::Request),
            0x32 => Ok(Self::Response),
            0x33 => Ok(Self::Notification),
            _ => Err(S7Error::protocol(format!("unknown opcode 0x{value:02X}"))),
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Protocol version carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolVersion {
    V1 = 0x01,
    V2 = 0x02,
    V3 = 0x03,
    SystemEvent = 0xFE,
}

impl ProtocolVersion {
    #[inline]
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::V1),
            0x02 => Ok(Self::V2),
            0x03 => Ok(Self::V3),
            0xFE => Ok(Self::SystemEvent),
            _ => Err(S7Error::invalid_frame(format!(
                "unknown protocol version 0x{value:02X}"
            ))),
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether requests and responses of this version carry an integrity id.
    #[inline]
    pub const fn has_integrity(&self) -> bool {
        matches!(self, Self::V3)
    }
}

/// Request/response function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FunctionCode {
    Error = 0x04b1,
    Explore = 0x04bb,
    CreateObject = 0x04ca,
    DeleteObject = 0x04d4,
    SetVariable = 0x04f2,
    GetVariable = 0x04fc,
    AddLink = 0x0506,
    RemoveLink = 0x051a,
    GetLink = 0x0524,
    SetMultiVariables = 0x0542,
    GetMultiVariables = 0x054c,
    BeginSequence = 0x0556,
    EndSequence = 0x0560,
    Invoke = 0x056b,
    SetVarSubStreamed = 0x057c,
    GetVarSubStreamed = 0x0586,
    GetVariablesAddress = 0x0590,
    Abort = 0x059a,
    Error2 = 0x05a9,
    InitSsl = 0x05b3,
}

impl FunctionCode {
    /// Create a FunctionCode from its raw value.
    pub fn from_u16(value: u16) -> Result<Self> {
        let code = match value {
            0x04b1 => Self::Error,
            0x04bb => Self::Explore,
            0x04ca => Self::CreateObject,
            0x04d4 => Self::DeleteObject,
            0x04f2 => Self::SetVariable,
            0x04fc => Self::GetVariable,
            0x0506 => Self::AddLink,
            0x051a => Self::RemoveLink,
            0x0524 => Self::GetLink,
            0x0542 => Self::SetMultiVariables,
            0x054c => Self::GetMultiVariables,
            0x0556 => Self::BeginSequence,
            0x0560 => Self::EndSequence,
            0x056b => Self::Invoke,
            0x057c => Self::SetVarSubStreamed,
            0x0586 => Self::GetVarSubStreamed,
            0x0590 => Self::GetVariablesAddress,
            0x059a => Self::Abort,
            0x05a9 => Self::Error2,
            0x05b3 => Self::InitSsl,
            _ => return Err(S7Error::UnknownFunctionCode(value)),
        };
        Ok(code)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Functions that modify device state and use the write integrity counter.
    #[inline]
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::SetVariable
                | Self::SetMultiVariables
                | Self::SetVarSubStreamed
                | Self::CreateObject
                | Self::DeleteObject
                | Self::AddLink
                | Self::RemoveLink
                | Self::BeginSequence
                | Self::EndSequence
                | Self::Invoke
        )
    }

    /// Whether this is one of the error function codes.
    #[inline]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::Error2)
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}(0x{:04X})", self, self.as_u16())
    }
}

/// Fixed request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub function_code: FunctionCode,
    pub sequence_number: u16,
    pub session_id: u32,
    pub transport_flags: u8,
}

impl RequestHeader {
    /// Encoded size including the opcode.
    pub const SIZE: usize = 14;

    /// Whether the sender expects no response.
    #[inline]
    pub const fn no_response(&self) -> bool {
        self.transport_flags & FLAG_NO_RESPONSE != 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(Opcode::Request.as_u8());
        buf.put_u16(0);
        buf.put_u16(self.function_code.as_u16());
        buf.put_u16(0);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.session_id);
        buf.put_u8(self.transport_flags);
    }

    /// Decode a request header starting at the opcode.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        let opcode = Opcode::from_u8(wire::read_u8(buf)?)?;
        if opcode != Opcode::Request {
            return Err(S7Error::protocol(format!("expected request, got {opcode:?}")));
        }
        let _reserved = wire::read_u16(buf)?;
        let function_code = FunctionCode::from_u16(wire::read_u16(buf)?)?;
        let _reserved = wire::read_u16(buf)?;
        Ok(Self {
            function_code,
            sequence_number: wire::read_u16(buf)?,
            session_id: wire::read_u32(buf)?,
            transport_flags: wire::read_u8(buf)?,
        })
    }
}

/// Fixed response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub function_code: FunctionCode,
    pub sequence_number: u16,
    pub transport_flags: u8,
}

impl ResponseHeader {
    /// Encoded size including the opcode.
    pub const SIZE: usize = 10;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(Opcode::Response.as_u8());
        buf.put_u16(0);
        buf.put_u16(self.function_code.as_u16());
        buf.put_u16(0);
        buf.put_u16(self.sequence_number);
        buf.put_u8(self.transport_flags);
    }

    /// Decode the header after the opcode byte.
    fn decode_after_opcode(buf: &mut impl Buf) -> Result<Self> {
        let _reserved = wire::read_u16(buf)?;
        let function_code = FunctionCode::from_u16(wire::read_u16(buf)?)?;
        let _reserved = wire::read_u16(buf)?;
        Ok(Self {
            function_code,
            sequence_number: wire::read_u16(buf)?,
            transport_flags: wire::read_u8(buf)?,
        })
    }
}

/// A request PDU body.
pub trait Request {
    /// Response type paired with this request.
    type Response: Response;

    /// Function code of the request.
    const FUNCTION_CODE: FunctionCode;

    /// Encode the body between the header and the integrity id.
    fn encode_body(&self, buf: &mut BytesMut);
}

/// A response PDU body, starting with the return value.
pub trait Response: Sized {
    /// Function code of the response.
    const FUNCTION_CODE: FunctionCode;

    /// Return value reported by the device.
    fn return_value(&self) -> u64;

    /// Decode the body, leaving any integrity id in `body`.
    fn decode_body(body: &mut Bytes) -> Result<Self>;

    /// Encode the body.
    fn encode_body(&self, buf: &mut BytesMut);
}

/// Build a complete request PDU.
pub fn encode_request<R: Request>(
    request: &R,
    sequence_number: u16,
    session_id: u32,
    transport_flags: u8,
    integrity_id: Option<u32>,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    RequestHeader {
        function_code: R::FUNCTION_CODE,
        sequence_number,
        session_id,
        transport_flags,
    }
    .encode(&mut buf);
    request.encode_body(&mut buf);
    if let Some(id) = integrity_id {
        vlq::encode_u32(&mut buf, id);
    }
    buf.put_u32(0);
    buf.freeze()
}

/// Build a complete response PDU.
pub fn encode_response<R: Response>(
    response: &R,
    sequence_number: u16,
    transport_flags: u8,
    integrity_id: Option<u32>,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    ResponseHeader {
        function_code: R::FUNCTION_CODE,
        sequence_number,
        transport_flags,
    }
    .encode(&mut buf);
    response.encode_body(&mut buf);
    if let Some(id) = integrity_id {
        vlq::encode_u32(&mut buf, id);
    }
    buf.freeze()
}

/// Body of an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    pub return_value: u64,
}

impl Response for ErrorResponse {
    const FUNCTION_CODE: FunctionCode = FunctionCode::Error;

    fn return_value(&self) -> u64 {
        self.return_value
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            return_value: vlq::decode_u64(body)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        vlq::encode_u64(buf, self.return_value);
    }
}

/// A PDU received from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPdu {
    /// Response header and undecoded body.
    Response(ResponseHeader, Bytes),
    Notification(Notification),
    /// Notification whose body did not decode, with the decode error.
    MalformedNotification(String),
    /// System event payload.
    SystemEvent(Bytes),
}

impl InboundPdu {
    /// Classify and parse the data of one frame.
    ///
    /// Only an unreadable opcode or response header is an error. A
    /// notification body that fails to decode is returned as
    /// [`InboundPdu::MalformedNotification`].
    pub fn parse(version: ProtocolVersion, mut data: Bytes) -> Result<Self> {
        if version == ProtocolVersion::SystemEvent {
            return Ok(Self::SystemEvent(data));
        }
        match Opcode::from_u8(wire::read_u8(&mut data)?)? {
            Opcode::Response => {
                let header = ResponseHeader::decode_after_opcode(&mut data)?;
                Ok(Self::Response(header, data))
            }
            Opcode::Notification => match Notification::decode_body(&mut data) {
                Ok(notification) => Ok(Self::Notification(notification)),
                Err(e) => Ok(Self::MalformedNotification(e.to_string())),
            },
            Opcode::Request => Err(S7Error::protocol("unexpected request from device")),
        }
    }
}

/// Read objects until a `00` terminator.
pub(crate) fn decode_object_list(buf: &mut impl Buf) -> Result<Vec<crate::types::Object>> {
    let mut objects = Vec::new();
    loop {
        match wire::peek_u8(buf) {
            Some(0x00) => {
                buf.advance(1);
                return Ok(objects);
            }
            Some(crate::types::ELEMENT_START_OF_OBJECT) => {
                objects.push(crate::types::Object::decode(buf)?);
            }
            Some(other) => {
                return Err(S7Error::decode(format!(
                    "unexpected byte 0x{other:02X} in object list"
                )));
            }
            None => {
                return Err(S7Error::TruncatedInput {
                    needed: 1,
                    available: 0,
                });
            }
        }
    }
}

/// Write objects followed by a `00` terminator.
pub(crate) fn encode_object_list(buf: &mut BytesMut, objects: &[crate::types::Object]) {
    for object in objects {
        object.encode(buf);
    }
    buf.put_u8(0x00);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_roundtrip() {
        for code in [0x04b1u16, 0x04bb, 0x04ca, 0x04d4, 0x04f2, 0x054c, 0x0586, 0x05b3] {
            assert_eq!(FunctionCode::from_u16(code).unwrap().as_u16(), code);
        }
        assert!(matches!(
            FunctionCode::from_u16(0x1234),
            Err(S7Error::UnknownFunctionCode(0x1234))
        ));
    }

    #[test]
    fn test_write_functions() {
        assert!(FunctionCode::SetVariable.is_write());
        assert!(FunctionCode::CreateObject.is_write());
        assert!(FunctionCode::DeleteObject.is_write());
        assert!(FunctionCode::SetMultiVariables.is_write());
        assert!(!FunctionCode::GetMultiVariables.is_write());
        assert!(!FunctionCode::Explore.is_write());
        assert!(!FunctionCode::GetVarSubStreamed.is_write());
    }

    #[test]
    fn test_request_header_layout() {
        let request = SetVariableRequest::new(0x1234_5678, 1053, crate::types::Value::Int(20));
        let flags = TRANSPORT_FLAGS | FLAG_NO_RESPONSE;
        let pdu = encode_request(&request, 7, 0x1234_5678, flags, Some(300));
        assert_eq!(
            &pdu[..RequestHeader::SIZE],
            &[0x31, 0x00, 0x00, 0x04, 0xf2, 0x00, 0x00, 0x00, 0x07, 0x12, 0x34, 0x56, 0x78, 0x74]
        );
        // Integrity id and fill close the PDU
        assert_eq!(&pdu[pdu.len() - 6..], &[0xAC, 0x02, 0x00, 0x00, 0x00, 0x00]);

        let header = RequestHeader::decode(&mut pdu.clone()).unwrap();
        assert_eq!(header.function_code, FunctionCode::SetVariable);
        assert_eq!(header.sequence_number, 7);
        assert!(header.no_response());
    }

    #[test]
    fn test_parse_response() {
        let response = SetVariableResponse { return_value: 0 };
        let pdu = encode_response(&response, 9, TRANSPORT_FLAGS, Some(5));
        let InboundPdu::Response(header, mut body) =
            InboundPdu::parse(ProtocolVersion::V3, pdu).unwrap()
        else {
            panic!("expected response");
        };
        assert_eq!(header.sequence_number, 9);
        assert_eq!(header.function_code, FunctionCode::SetVariable);
        let decoded = SetVariableResponse::decode_body(&mut body).unwrap();
        assert_eq!(decoded.return_value(), 0);
        assert_eq!(vlq::decode_u32(&mut body).unwrap(), 5);
    }

    #[test]
    fn test_parse_system_event() {
        let data = Bytes::from_static(&[1, 2]);
        let pdu = InboundPdu::parse(ProtocolVersion::SystemEvent, data).unwrap();
        assert_eq!(pdu, InboundPdu::SystemEvent(Bytes::from_static(&[1, 2])));
    }

    #[test]
    fn test_parse_malformed_notification() {
        // Value entry with an unsupported Variant datatype
        let data = Bytes::from_static(&[
            0x33, 0x70, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00,
            0x01, 0x92, 0x00, 0x16,
        ]);
        let pdu = InboundPdu::parse(ProtocolVersion::V3, data).unwrap();
        assert!(matches!(pdu, InboundPdu::MalformedNotification(_)));
    }

    #[test]
    fn test_parse_rejects_request() {
        let request = InitSslRequest;
        let pdu = encode_request(&request, 1, 288, TRANSPORT_FLAGS, None);
        assert!(InboundPdu::parse(ProtocolVersion::V1, pdu).is_err());
        assert!(InboundPdu::parse(ProtocolVersion::V1, Bytes::from_static(&[0x99])).is_err());
    }

    #[test]
    fn test_object_list() {
        let objects = vec![crate::types::Object::new(1, 2, 0), crate::types::Object::new(3, 4, 0)];
        let mut buf = BytesMut::new();
        encode_object_list(&mut buf, &objects);
        let mut input = buf.freeze();
        assert_eq!(decode_object_list(&mut input).unwrap(), objects);
        assert!(input.is_empty());
        assert!(decode_object_list(&mut &[0xA1, 0, 0][..]).is_err());
    }
}
