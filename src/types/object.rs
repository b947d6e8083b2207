//! Device objects.
//!
//! An object is framed by start/terminate tags and holds attributes, nested
//! child objects, relation edges and optional variable type/name lists:
//!
//! ```text
//! A1 relation_id:u32 class_id:vlq class_flags:vlq attribute_id:vlq [attribute_flags:vlq]
//!    ( A3 id:vlq Value
//!    | A1 ... A2                 nested object
//!    | A4 kind:vlq target:u32
//!    | AB (len:u16 bytes)* 00 00
//!    | AC (len:u16 bytes)* 00 00 )*
//! A2
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::Value;
use super::{vlq, wire};
use crate::error::{Result, S7Error};

pub const ELEMENT_START_OF_OBJECT: u8 = 0xA1;
pub const ELEMENT_TERMINATING_OBJECT: u8 = 0xA2;
pub const ELEMENT_ATTRIBUTE: u8 = 0xA3;
pub const ELEMENT_RELATION: u8 = 0xA4;
pub const ELEMENT_VARTYPE_LIST: u8 = 0xAB;
pub const ELEMENT_VARNAME_LIST: u8 = 0xAC;

const MAX_DEPTH: usize = 32;

/// A device object with its attributes and children.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Object {
    /// Relation id; the object's RID for objects read from the device.
    pub relation_id: u32,
    pub class_id: u32,
    pub class_flags: u32,
    pub attribute_id: u32,
    pub attribute_flags: u32,
    attributes: Vec<(u32, Value)>,
    objects: Vec<Object>,
    relations: Vec<(u32, u32)>,
    vartype_list: Option<Bytes>,
    varnames: Vec<String>,
}

impl Object {
    /// Create an empty object.
    pub fn new(relation_id: u32, class_id: u32, attribute_id: u32) -> Self {
        Self {
            relation_id,
            class_id,
            attribute_id,
            ..Default::default()
        }
    }

    /// Set an attribute, replacing any previous value with the same id.
    pub fn set_attribute(&mut self, id: u32, value: Value) {
        match self.attributes.iter_mut().find(|(attr_id, _)| *attr_id == id) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((id, value)),
        }
    }

    /// Builder-style [`set_attribute`](Self::set_attribute).
    pub fn with_attribute(mut self, id: u32, value: Value) -> Self {
        self.set_attribute(id, value);
        self
    }

    /// Attribute value, or `AttributeNotFound`.
    pub fn get_attribute(&self, id: u32) -> Result<&Value> {
        self.attribute(id).ok_or(S7Error::AttributeNotFound(id))
    }

    /// Attribute value if present.
    pub fn attribute(&self, id: u32) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(attr_id, _)| *attr_id == id)
            .map(|(_, value)| value)
    }

    /// Attributes in insertion order.
    pub fn attributes(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.attributes.iter().map(|(id, value)| (*id, value))
    }

    /// Append a child object.
    pub fn add_object(&mut self, child: Object) {
        self.objects.push(child);
    }

    /// Builder-style [`add_object`](Self::add_object).
    pub fn with_object(mut self, child: Object) -> Self {
        self.add_object(child);
        self
    }

    /// Direct children in encounter order.
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    /// Direct children of the given class, in encounter order.
    pub fn objects_by_class_id(&self, class_id: u32) -> impl Iterator<Item = &Object> {
        self.objects.iter().filter(move |o| o.class_id == class_id)
    }

    /// First direct child of the given class.
    pub fn first_object_by_class_id(&self, class_id: u32) -> Option<&Object> {
        self.objects_by_class_id(class_id).next()
    }

    /// Append a relation edge.
    pub fn add_relation(&mut self, kind: u32, target: u32) {
        self.relations.push((kind, target));
    }

    /// Builder-style [`add_relation`](Self::add_relation).
    pub fn with_relation(mut self, kind: u32, target: u32) -> Self {
        self.add_relation(kind, target);
        self
    }

    /// Relation edges as `(kind, target)` in encounter order.
    pub fn relations(&self) -> &[(u32, u32)] {
        &self.relations
    }

    /// Raw variable type list, if the object carried one.
    pub fn vartype_list(&self) -> Option<&Bytes> {
        self.vartype_list.as_ref()
    }

    /// Decoded variable names, if the object carried a name list.
    pub fn varnames(&self) -> &[String] {
        &self.varnames
    }

    /// Set the variable name list.
    pub fn set_varnames(&mut self, names: Vec<String>) {
        self.varnames = names;
    }

    /// Set the raw variable type list.
    pub fn set_vartype_list(&mut self, raw: Bytes) {
        self.vartype_list = Some(raw);
    }

    /// Decode an object starting at its `A1` tag.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        Self::decode_nested(buf, 0)
    }

    fn decode_nested(buf: &mut impl Buf, depth: usize) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(S7Error::decode("object nesting too deep"));
        }
        let tag = wire::read_u8(buf)?;
        if tag != ELEMENT_START_OF_OBJECT {
            return Err(S7Error::decode(format!(
                "expected object start 0xA1, got 0x{tag:02X}"
            )));
        }

        let relation_id = wire::read_u32(buf)?;
        let class_id = vlq::decode_u32(buf)?;
        let class_flags = vlq::decode_u32(buf)?;
        let attribute_id = vlq::decode_u32(buf)?;
        let attribute_flags = if attribute_id != 0 {
            vlq::decode_u32(buf)?
        } else {
            0
        };

        let mut object = Self {
            relation_id,
            class_id,
            class_flags,
            attribute_id,
            attribute_flags,
            ..Default::default()
        };

        loop {
            let tag = wire::peek_u8(buf).ok_or(S7Error::TruncatedInput {
                needed: 1,
                available: 0,
            })?;
            match tag {
                ELEMENT_TERMINATING_OBJECT => {
                    buf.advance(1);
                    return Ok(object);
                }
                ELEMENT_ATTRIBUTE => {
                    buf.advance(1);
                    let id = vlq::decode_u32(buf)?;
                    let value = Value::decode(buf)?;
                    object.set_attribute(id, value);
                }
                ELEMENT_START_OF_OBJECT => {
                    object.add_object(Self::decode_nested(buf, depth + 1)?);
                }
                ELEMENT_RELATION => {
                    buf.advance(1);
                    let kind = vlq::decode_u32(buf)?;
                    let target = wire::read_u32(buf)?;
                    object.add_relation(kind, target);
                }
                ELEMENT_VARTYPE_LIST => {
                    buf.advance(1);
                    object.vartype_list = Some(read_blocks(buf)?);
                }
                ELEMENT_VARNAME_LIST => {
                    buf.advance(1);
                    object.varnames = decode_varnames(&read_blocks(buf)?)?;
                }
                other => {
                    return Err(S7Error::decode(format!(
                        "unexpected element 0x{other:02X} in object {relation_id:#x}"
                    )));
                }
            }
        }
    }

    /// Encode the object including its start and terminate tags.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(ELEMENT_START_OF_OBJECT);
        buf.put_u32(self.relation_id);
        vlq::encode_u32(buf, self.class_id);
        vlq::encode_u32(buf, self.class_flags);
        vlq::encode_u32(buf, self.attribute_id);
        if self.attribute_id != 0 {
            vlq::encode_u32(buf, self.attribute_flags);
        }

        for (id, value) in &self.attributes {
            buf.put_u8(ELEMENT_ATTRIBUTE);
            vlq::encode_u32(buf, *id);
            value.encode(buf);
        }
        for child in &self.objects {
            child.encode(buf);
        }
        for (kind, target) in &self.relations {
            buf.put_u8(ELEMENT_RELATION);
            vlq::encode_u32(buf, *kind);
            buf.put_u32(*target);
        }
        if let Some(raw) = &self.vartype_list {
            buf.put_u8(ELEMENT_VARTYPE_LIST);
            write_blocks(buf, raw);
        }
        if !self.varnames.is_empty() {
            buf.put_u8(ELEMENT_VARNAME_LIST);
            write_blocks(buf, &encode_varnames(&self.varnames));
        }

        buf.put_u8(ELEMENT_TERMINATING_OBJECT);
    }
}

/// Concatenate length-prefixed blocks up to a zero-length block.
fn read_blocks(buf: &mut impl Buf) -> Result<Bytes> {
    let mut out = BytesMut::new();
    loop {
        let len = usize::from(wire::read_u16(buf)?);
        if len == 0 {
            return Ok(out.freeze());
        }
        out.extend_from_slice(&wire::read_bytes(buf, len)?);
    }
}

fn write_blocks(buf: &mut BytesMut, raw: &[u8]) {
    for chunk in raw.chunks(usize::from(u16::MAX)) {
        buf.put_u16(chunk.len() as u16);
        buf.put_slice(chunk);
    }
    buf.put_u16(0);
}

/// Names are stored as `len:u8` followed by UTF-8 bytes.
fn decode_varnames(raw: &[u8]) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut input = raw;
    while input.has_remaining() {
        let len = usize::from(wire::read_u8(&mut input)?);
        let bytes = wire::read_bytes(&mut input, len)?;
        let name = String::from_utf8(bytes.to_vec())
            .map_err(|e| S7Error::decode(format!("invalid variable name: {e}")))?;
        names.push(name);
    }
    Ok(names)
}

fn encode_varnames(names: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for name in names {
        let bytes = &name.as_bytes()[..name.len().min(usize::from(u8::MAX))];
        out.push(bytes.len() as u8);
        out.extend_from_slice(bytes);
    }
    out
}
