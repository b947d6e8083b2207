//! Session setup and object lifecycle PDUs.

use bytes::{BufMut, Bytes, BytesMut};

use super::{decode_object_list, encode_object_list, FunctionCode, Request, Response};
use crate::error::Result;
use crate::types::{vlq, wire, Object, Value};

/// Switches the connection to TLS. Has no body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitSslRequest;

impl Request for InitSslRequest {
    type Response = InitSslResponse;
    const FUNCTION_CODE: FunctionCode = FunctionCode::InitSsl;

    fn encode_body(&self, _buf: &mut BytesMut) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitSslResponse {
    pub return_value: u64,
}

impl Response for InitSslResponse {
    const FUNCTION_CODE: FunctionCode = FunctionCode::InitSsl;

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

/// Create an object below `request_id`.
///
/// Body: `request_id:u32 | request_value:Value | 00 00 00 00 | Object`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateObjectRequest {
    pub request_id: u32,
    pub request_value: Value,
    pub object: Object,
}

impl CreateObjectRequest {
    pub fn new(request_id: u32, object: Object) -> Self {
        Self {
            request_id,
            request_value: Value::UDInt(0),
            object,
        }
    }
}

impl Request for CreateObjectRequest {
    type Response = CreateObjectResponse;
    const FUNCTION_CODE: FunctionCode = FunctionCode::CreateObject;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.request_id);
        self.request_value.encode(buf);
        buf.put_u32(0);
        self.object.encode(buf);
    }
}

/// Body: `return_value:vlq | count:u8 | object_id:vlq* | objects* | 00`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateObjectResponse {
    pub return_value: u64,
    /// Device-assigned ids of the created objects.
    pub object_ids: Vec<u32>,
    pub objects: Vec<Object>,
}

impl CreateObjectResponse {
    /// First returned object, if any.
    pub fn object(&self) -> Option<&Object> {
        self.objects.first()
    }
}

impl Response for CreateObjectResponse {
    const FUNCTION_CODE: FunctionCode = FunctionCode::CreateObject;

    fn return_value(&self) -> u64 {
        self.return_value
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        let return_value = vlq::decode_u64(body)?;
        let count = wire::read_u8(body)?;
        let mut object_ids = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            object_ids.push(vlq::decode_u32(body)?);
        }
        let objects = decode_object_list(body)?;
        Ok(Self {
            return_value,
            object_ids,
            objects,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        vlq::encode_u64(buf, self.return_value);
        buf.put_u8(self.object_ids.len() as u8);
        for id in &self.object_ids {
            vlq::encode_u32(buf, *id);
        }
        encode_object_list(buf, &self.objects);
    }
}

/// Delete an object by its device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteObjectRequest {
    pub object_id: u32,
}

impl Request for DeleteObjectRequest {
    type Response = DeleteObjectResponse;
    const FUNCTION_CODE: FunctionCode = FunctionCode::DeleteObject;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.object_id);
        buf.put_u32(0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteObjectResponse {
    pub return_value: u64,
    pub object_id: u32,
}

impl Response for DeleteObjectResponse {
    const FUNCTION_CODE: FunctionCode = FunctionCode::DeleteObject;

    fn return_value(&self) -> u64 {
        self.return_value
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            return_value: vlq::decode_u64(body)?,
            object_id: vlq::decode_u32(body)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        vlq::encode_u64(buf, self.return_value);
        vlq::encode_u32(buf, self.object_id);
    }
}
