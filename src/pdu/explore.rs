//! Explore PDU: browse the object tree below an id.

use bytes::{BufMut, Bytes, BytesMut};

use super::{decode_object_list, encode_object_list, FunctionCode, Request, Response};
use crate::error::Result;
use crate::types::{vlq, wire, Object, Value};

/// Explore request.
///
/// Body: `explore_id:u32 | request_id:vlq | children:u8 | 01 | parents:u8 |
/// filters:u8 | [AddressArray]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploreRequest {
    pub explore_id: u32,
    pub request_id: u32,
    pub explore_children: bool,
    pub explore_parents: bool,
    /// Attributes to return; empty returns all.
    pub attributes: Vec<u32>,
}

impl ExploreRequest {
    /// Explore `explore_id` and its children.
    pub fn new(explore_id: u32) -> Self {
        Self {
            explore_id,
            request_id: 0,
            explore_children: true,
            explore_parents: false,
            attributes: Vec::new(),
        }
    }

    /// Restrict the returned attributes.
    pub fn with_attributes(mut self, attributes: &[u32]) -> Self {
        self.attributes = attributes.to_vec();
        self
    }
}

impl Request for ExploreRequest {
    type Response = ExploreResponse;
    const FUNCTION_CODE: FunctionCode = FunctionCode::Explore;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.explore_id);
        vlq::encode_u32(buf, self.request_id);
        buf.put_u8(u8::from(self.explore_children));
        buf.put_u8(1);
        buf.put_u8(u8::from(self.explore_parents));
        if self.attributes.is_empty() {
            buf.put_u8(0);
        } else {
            buf.put_u8(1);
            Value::AddressArray(self.attributes.clone()).encode(buf);
        }
    }
}

/// Body: `return_value:vlq | explore_id:u32 | objects* | 00`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExploreResponse {
    pub return_value: u64,
    pub explore_id: u32,
    pub objects: Vec<Object>,
}

impl Response for ExploreResponse {
    const FUNCTION_CODE: FunctionCode = FunctionCode::Explore;

    fn return_value(&self) -> u64 {
        self.return_value
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        let return_value = vlq::decode_u64(body)?;
        if return_value != 0 {
            return Ok(Self {
                return_value,
                ..Default::default()
            });
        }
        Ok(Self {
            return_value,
            explore_id: wire::read_u32(body)?,
            objects: decode_object_list(body)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        vlq::encode_u64(buf, self.return_value);
        if self.return_value == 0 {
            buf.put_u32(self.explore_id);
            encode_object_list(buf, &self.objects);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ids;

    #[test]
    fn test_explore_request_body() {
        let mut buf = BytesMut::new();
        ExploreRequest::new(ids::NATIVE_OBJECTS_THE_PLC_PROGRAM_RID).encode_body(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 3, 0, 1, 1, 0, 0]);

        let mut buf = BytesMut::new();
        ExploreRequest::new(1)
            .with_attributes(&[ids::MULTIPLE_STAI])
            .encode_body(&mut buf);
        assert_eq!(&buf[8..11], &[0x01, 0x20, 0x04]);
    }

    #[test]
    fn test_explore_response_roundtrip() {
        let child = Object::new(0x10, 7, 0)
            .with_attribute(ids::OBJECT_VARIABLE_TYPE_NAME, Value::WString("Main".into()));
        let response = ExploreResponse {
            return_value: 0,
            explore_id: 3,
            objects: vec![Object::new(3, 9, 0).with_object(child)],
        };
        let mut buf = BytesMut::new();
        response.encode_body(&mut buf);
        let mut body = buf.freeze();
        assert_eq!(ExploreResponse::decode_body(&mut body).unwrap(), response);
        assert!(body.is_empty());
    }

    #[test]
    fn test_explore_error_has_no_objects() {
        let decoded = ExploreResponse::decode_body(&mut Bytes::from_static(&[0x07])).unwrap();
        assert_eq!(decoded.return_value(), 7);
        assert!(decoded.objects.is_empty());
    }
}
