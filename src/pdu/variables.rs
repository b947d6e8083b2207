//! Variable access PDUs.

use bytes::{BufMut, Bytes, BytesMut};

use super::{FunctionCode, Request, Response};
use crate::error::Result;
use crate::types::{ids, vlq, ItemAddress, Value, ValueStruct};

/// Qualifier appended to multi-variable requests.
pub fn object_qualifier() -> Value {
    Value::Struct(
        ValueStruct::new(ids::OBJECT_QUALIFIER)
            .with(ids::PARENT_RID, Value::Rid(0))
            .with(ids::COMPOSITION_AID, Value::Aid(0))
            .with(ids::KEY_QUALIFIER, Value::UDInt(0)),
    )
}

/// Read one attribute of an object.
///
/// Body: `in_object_id:u32 | AddressArray[address]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetVarSubstreamedRequest {
    pub in_object_id: u32,
    pub address: u32,
}

impl Request for GetVarSubstreamedRequest {
    type Response = GetVarSubstreamedResponse;
    const FUNCTION_CODE: FunctionCode = FunctionCode::GetVarSubStreamed;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.in_object_id);
        Value::AddressArray(vec![self.address]).encode(buf);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetVarSubstreamedResponse {
    pub return_value: u64,
    pub value: Value,
}

impl Response for GetVarSubstreamedResponse {
    const FUNCTION_CODE: FunctionCode = FunctionCode::GetVarSubStreamed;

    fn return_value(&self) -> u64 {
        self.return_value
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        let return_value = vlq::decode_u64(body)?;
        // Failed reads carry no value
        let value = if return_value == 0 {
            Value::decode(body)?
        } else {
            Value::Null
        };
        Ok(Self {
            return_value,
            value,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        vlq::encode_u64(buf, self.return_value);
        if self.return_value == 0 {
            self.value.encode(buf);
        }
    }
}

/// Write one attribute of an object.
///
/// Body: `in_object_id:u32 | 1:vlq | address:vlq | Value`.
#[derive(Debug, Clone, PartialEq)]
pub struct SetVariableRequest {
    pub in_object_id: u32,
    pub address: u32,
    pub value: Value,
}

impl SetVariableRequest {
    pub fn new(in_object_id: u32, address: u32, value: Value) -> Self {
        Self {
            in_object_id,
            address,
            value,
        }
    }
}

impl Request for SetVariableRequest {
    type Response = SetVariableResponse;
    const FUNCTION_CODE: FunctionCode = FunctionCode::SetVariable;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.in_object_id);
        vlq::encode_u32(buf, 1);
        vlq::encode_u32(buf, self.address);
        self.value.encode(buf);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetVariableResponse {
    pub return_value: u64,
}

impl Response for SetVariableResponse {
    const FUNCTION_CODE: FunctionCode = FunctionCode::SetVariable;

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

/// Per-item results keyed by 1-based item number.
fn encode_item_values(buf: &mut BytesMut, values: &[(u32, Value)]) {
    for (item, value) in values {
        vlq::encode_u32(buf, *item);
        value.encode(buf);
    }
    vlq::encode_u32(buf, 0);
}

fn decode_item_values(body: &mut Bytes) -> Result<Vec<(u32, Value)>> {
    let mut values = Vec::new();
    loop {
        let item = vlq::decode_u32(body)?;
        if item == 0 {
            return Ok(values);
        }
        values.push((item, Value::decode(body)?));
    }
}

fn encode_item_errors(buf: &mut BytesMut, errors: &[(u32, u64)]) {
    for (item, code) in errors {
        vlq::encode_u32(buf, *item);
        vlq::encode_u64(buf, *code);
    }
    vlq::encode_u32(buf, 0);
}

fn decode_item_errors(body: &mut Bytes) -> Result<Vec<(u32, u64)>> {
    let mut errors = Vec::new();
    loop {
        let item = vlq::decode_u32(body)?;
        if item == 0 {
            return Ok(errors);
        }
        errors.push((item, vlq::decode_u64(body)?));
    }
}

/// Read several variables by address.
///
/// Body: `link_id:u32 | count:vlq | fields:vlq | ItemAddress* | qualifier`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetMultiVariablesRequest {
    pub link_id: u32,
    pub addresses: Vec<ItemAddress>,
}

impl GetMultiVariablesRequest {
    pub fn new(addresses: Vec<ItemAddress>) -> Self {
        Self {
            link_id: 0,
            addresses,
        }
    }
}

impl Request for GetMultiVariablesRequest {
    type Response = GetMultiVariablesResponse;
    const FUNCTION_CODE: FunctionCode = FunctionCode::GetMultiVariables;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.link_id);
        vlq::encode_u32(buf, self.addresses.len() as u32);
        let fields: u32 = self.addresses.iter().map(ItemAddress::field_count).sum();
        vlq::encode_u32(buf, fields);
        for address in &self.addresses {
            address.encode(buf);
        }
        object_qualifier().encode(buf);
    }
}

/// Body: `return_value:vlq | (item:vlq Value)* 0 | (item:vlq error:vlq)* 0`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetMultiVariablesResponse {
    pub return_value: u64,
    pub values: Vec<(u32, Value)>,
    pub errors: Vec<(u32, u64)>,
}

impl Response for GetMultiVariablesResponse {
    const FUNCTION_CODE: FunctionCode = FunctionCode::GetMultiVariables;

    fn return_value(&self) -> u64 {
        self.return_value
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            return_value: vlq::decode_u64(body)?,
            values: decode_item_values(body)?,
            errors: decode_item_errors(body)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        vlq::encode_u64(buf, self.return_value);
        encode_item_values(buf, &self.values);
        encode_item_errors(buf, &self.errors);
    }
}

/// Target of one item in a [`SetMultiVariablesRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableAddress {
    /// Attribute of the request's `in_object_id`.
    Attribute(u32),
    /// Variable in the PLC program.
    Item(ItemAddress),
}

impl VariableAddress {
    fn field_count(&self) -> u32 {
        match self {
            Self::Attribute(_) => 1,
            Self::Item(address) => address.field_count(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Attribute(id) => vlq::encode_u32(buf, *id),
            Self::Item(address) => address.encode(buf),
        }
    }
}

/// Write several variables.
///
/// Body: `in_object_id:u32 | count:vlq | fields:vlq | address* | (item:vlq Value)* 0 | qualifier`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetMultiVariablesRequest {
    pub in_object_id: u32,
    pub items: Vec<(VariableAddress, Value)>,
}

impl SetMultiVariablesRequest {
    /// Write attributes of an object.
    pub fn attributes(in_object_id: u32, items: Vec<(u32, Value)>) -> Self {
        Self {
            in_object_id,
            items: items
                .into_iter()
                .map(|(id, value)| (VariableAddress::Attribute(id), value))
                .collect(),
        }
    }

    /// Write program variables.
    pub fn variables(items: Vec<(ItemAddress, Value)>) -> Self {
        Self {
            in_object_id: 0,
            items: items
                .into_iter()
                .map(|(address, value)| (VariableAddress::Item(address), value))
                .collect(),
        }
    }
}

impl Request for SetMultiVariablesRequest {
    type Response = SetMultiVariablesResponse;
    const FUNCTION_CODE: FunctionCode = FunctionCode::SetMultiVariables;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.in_object_id);
        vlq::encode_u32(buf, self.items.len() as u32);
        let fields: u32 = self.items.iter().map(|(address, _)| address.field_count()).sum();
        vlq::encode_u32(buf, fields);
        for (address, _) in &self.items {
            address.encode(buf);
        }
        for (index, (_, value)) in self.items.iter().enumerate() {
            vlq::encode_u32(buf, index as u32 + 1);
            value.encode(buf);
        }
        vlq::encode_u32(buf, 0);
        object_qualifier().encode(buf);
    }
}

/// Body: `return_value:vlq | (item:vlq error:vlq)* 0`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetMultiVariablesResponse {
    pub return_value: u64,
    pub errors: Vec<(u32, u64)>,
}

impl Response for SetMultiVariablesResponse {
    const FUNCTION_CODE: FunctionCode = FunctionCode::SetMultiVariables;

    fn return_value(&self) -> u64 {
        self.return_value
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            return_value: vlq::decode_u64(body)?,
            errors: decode_item_errors(body)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        vlq::encode_u64(buf, self.return_value);
        encode_item_errors(buf, &self.errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_var_substreamed_body() {
        let request = GetVarSubstreamedRequest {
            in_object_id: 0x7000_0001,
            address: ids::EFFECTIVE_PROTECTION_LEVEL,
        };
        let mut buf = BytesMut::new();
        request.encode_body(&mut buf);
        // 1842 = 0xB2 0x0E
        assert_eq!(&buf[..], &[0x70, 0x00, 0x00, 0x01, 0x20, 0x04, 0x01, 0xB2, 0x0E]);
    }

    #[test]
    fn test_get_var_substreamed_response() {
        let response = GetVarSubstreamedResponse {
            return_value: 0,
            value: Value::UDInt(3),
        };
        let mut buf = BytesMut::new();
        response.encode_body(&mut buf);
        assert_eq!(
            GetVarSubstreamedResponse::decode_body(&mut buf.freeze()).unwrap(),
            response
        );

        let mut body = Bytes::from_static(&[0x05]);
        let failed = GetVarSubstreamedResponse::decode_body(&mut body).unwrap();
        assert_eq!(failed.return_value(), 5);
        assert_eq!(failed.value, Value::Null);
    }

    #[test]
    fn test_get_multi_variables_request_fields() {
        let request = GetMultiVariablesRequest::new(vec![
            ItemAddress::data_block(1, &[0xA]),
            ItemAddress::data_block(2, &[0xB, 0x1]),
        ]);
        let mut buf = BytesMut::new();
        request.encode_body(&mut buf);
        assert_eq!(&buf[..4], &[0, 0, 0, 0]);
        // two items, 5 + 6 fields
        assert_eq!(&buf[4..6], &[0x02, 0x0B]);
    }

    #[test]
    fn test_get_multi_variables_response_roundtrip() {
        let response = GetMultiVariablesResponse {
            return_value: 0,
            values: vec![(1, Value::Int(-4)), (3, Value::Real(1.5))],
            errors: vec![(2, 0x8104_0000_0000_0001)],
        };
        let mut buf = BytesMut::new();
        response.encode_body(&mut buf);
        let mut body = buf.freeze();
        assert_eq!(GetMultiVariablesResponse::decode_body(&mut body).unwrap(), response);
        assert!(body.is_empty());
    }

    #[test]
    fn test_set_multi_variables_attribute_body() {
        let request = SetMultiVariablesRequest::attributes(
            0x7000_0001,
            vec![(ids::SERVER_SESSION_VERSION, Value::UDInt(1))],
        );
        let mut buf = BytesMut::new();
        request.encode_body(&mut buf);
        // in_object_id, 1 item, 1 field, address 306, item 1, UDInt 1, end
        assert_eq!(
            &buf[..13],
            &[0x70, 0x00, 0x00, 0x01, 0x01, 0x01, 0xB2, 0x02, 0x01, 0x00, 0x04, 0x01, 0x00]
        );
    }

    #[test]
    fn test_set_multi_variables_response_roundtrip() {
        let response = SetMultiVariablesResponse {
            return_value: 0,
            errors: vec![(1, 42)],
        };
        let mut buf = BytesMut::new();
        response.encode_body(&mut buf);
        assert_eq!(
            SetMultiVariablesResponse::decode_body(&mut buf.freeze()).unwrap(),
            response
        );
    }
}
