//! Tagged wire values.
//!
//! Every value on the wire starts with a flags byte and a [`Datatype`] byte,
//! followed by the payload:
//!
//! ```text
//! +-------+----------+-------------------------------+
//! | flags | datatype | payload                       |
//! +-------+----------+-------------------------------+
//!   0x00              scalar
//!   0x10              VLQ count, then count payloads
//!   0x20              address array (UDInt only)
//!   0x40              (VLQ key, payload)*, VLQ 0
//! ```
//!
//! UDInt, ULInt, DInt, LInt, AID and Timespan payloads are VLQ encoded; the
//! other numeric payloads are fixed-width big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::datatype::{Datatype, FLAG_ADDRESS_ARRAY, FLAG_ARRAY, FLAG_SPARSE_ARRAY};
use super::{vlq, wire};
use crate::error::{Result, S7Error};

/// Maximum nesting of structs inside structs.
const MAX_DEPTH: usize = 32;

/// Bound an array count by the remaining input.
///
/// Every element payload takes at least one byte, so a larger count cannot
/// be satisfied. Null elements take none and are only accepted in empty arrays.
fn check_count(datatype: Datatype, count: usize, buf: &impl Buf) -> Result<usize> {
    if datatype == Datatype::Null && count > 0 {
        return Err(S7Error::decode(format!("array of {count} Null elements")));
    }
    if count > buf.remaining() {
        return Err(S7Error::TruncatedInput {
            needed: count,
            available: buf.remaining(),
        });
    }
    Ok(count)
}

/// Opaque byte payload tagged with a root type id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob {
    /// Catalog id describing the blob content.
    pub root_id: u32,
    /// Raw content.
    pub data: Bytes,
}

impl Blob {
    /// Create a blob with root id 0.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            root_id: 0,
            data: data.into(),
        }
    }

    /// Create a blob with an explicit root id.
    pub fn with_root_id(root_id: u32, data: impl Into<Bytes>) -> Self {
        Self {
            root_id,
            data: data.into(),
        }
    }

    fn decode(buf: &mut impl Buf) -> Result<Self> {
        let root_id = vlq::decode_u32(buf)?;
        let len = vlq::decode_u32(buf)? as usize;
        let data = wire::read_bytes(buf, len)?;
        Ok(Self { root_id, data })
    }

    fn encode(&self, buf: &mut BytesMut) {
        vlq::encode_u32(buf, self.root_id);
        vlq::encode_u32(buf, self.data.len() as u32);
        buf.put_slice(&self.data);
    }
}

/// Ordered list of `(element id, value)` pairs with a struct type id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueStruct {
    /// Catalog id of the struct type.
    pub id: u32,
    /// Elements in wire order.
    pub elements: Vec<(u32, Value)>,
}

impl ValueStruct {
    /// Create an empty struct.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            elements: Vec::new(),
        }
    }

    /// Append an element.
    pub fn push(&mut self, id: u32, value: Value) {
        self.elements.push((id, value));
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, id: u32, value: Value) -> Self {
        self.push(id, value);
        self
    }

    /// First element with the given id.
    pub fn get(&self, id: u32) -> Option<&Value> {
        self.elements
            .iter()
            .find(|(element_id, _)| *element_id == id)
            .map(|(_, value)| value)
    }
}

/// A decoded S7CommPlus value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    USInt(u8),
    UInt(u16),
    UDInt(u32),
    ULInt(u64),
    SInt(i8),
    Int(i16),
    DInt(i32),
    LInt(i64),
    Byte(u8),
    Word(u16),
    DWord(u32),
    LWord(u64),
    Real(f32),
    LReal(f64),
    /// Nanoseconds since 1970-01-01.
    Timestamp(u64),
    /// Signed nanosecond duration.
    Timespan(i64),
    Rid(u32),
    Aid(u32),
    Blob(Blob),
    WString(String),
    Struct(ValueStruct),
    /// Homogeneous array. Every item must be a scalar of `datatype`.
    Array {
        datatype: Datatype,
        items: Vec<Value>,
    },
    /// UDInt array flagged as an address list.
    AddressArray(Vec<u32>),
    BlobArray(Vec<Blob>),
    /// Keyed blobs in receive order.
    BlobSparseArray(Vec<(u32, Blob)>),
}

impl Value {
    /// Wire datatype of this value (element type for arrays).
    pub fn datatype(&self) -> Datatype {
        match self {
            Self::Null => Datatype::Null,
            Self::Bool(_) => Datatype::Bool,
            Self::USInt(_) => Datatype::USInt,
            Self::UInt(_) => Datatype::UInt,
            Self::UDInt(_) | Self::AddressArray(_) => Datatype::UDInt,
            Self::ULInt(_) => Datatype::ULInt,
            Self::SInt(_) => Datatype::SInt,
            Self::Int(_) => Datatype::Int,
            Self::DInt(_) => Datatype::DInt,
            Self::LInt(_) => Datatype::LInt,
            Self::Byte(_) => Datatype::Byte,
            Self::Word(_) => Datatype::Word,
            Self::DWord(_) => Datatype::DWord,
            Self::LWord(_) => Datatype::LWord,
            Self::Real(_) => Datatype::Real,
            Self::LReal(_) => Datatype::LReal,
            Self::Timestamp(_) => Datatype::Timestamp,
            Self::Timespan(_) => Datatype::Timespan,
            Self::Rid(_) => Datatype::Rid,
            Self::Aid(_) => Datatype::Aid,
            Self::Blob(_) | Self::BlobArray(_) | Self::BlobSparseArray(_) => Datatype::Blob,
            Self::WString(_) => Datatype::WString,
            Self::Struct(_) => Datatype::Struct,
            Self::Array { datatype, .. } => *datatype,
        }
    }

    /// Flags byte written before the datatype.
    pub fn flags(&self) -> u8 {
        match self {
            Self::Array { .. } | Self::BlobArray(_) => FLAG_ARRAY,
            Self::AddressArray(_) => FLAG_ADDRESS_ARRAY,
            Self::BlobSparseArray(_) => FLAG_SPARSE_ARRAY,
            _ => 0,
        }
    }

    /// USInt array from raw bytes.
    pub fn usint_array(bytes: &[u8]) -> Self {
        Self::Array {
            datatype: Datatype::USInt,
            items: bytes.iter().map(|b| Self::USInt(*b)).collect(),
        }
    }

    /// UInt array from words.
    pub fn uint_array(words: &[u16]) -> Self {
        Self::Array {
            datatype: Datatype::UInt,
            items: words.iter().map(|w| Self::UInt(*w)).collect(),
        }
    }

    /// UDInt array.
    pub fn udint_array(values: &[u32]) -> Self {
        Self::Array {
            datatype: Datatype::UDInt,
            items: values.iter().map(|v| Self::UDInt(*v)).collect(),
        }
    }

    /// Decode one value including its flags and datatype bytes.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        Self::decode_nested(buf, 0)
    }

    fn decode_nested(buf: &mut impl Buf, depth: usize) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(S7Error::decode("value nesting too deep"));
        }
        let flags = wire::read_u8(buf)?;
        let datatype = Datatype::from_u8(wire::read_u8(buf)?)?;

        if flags & FLAG_SPARSE_ARRAY != 0 {
            if datatype != Datatype::Blob {
                return Err(S7Error::decode(format!(
                    "sparse array of {datatype} not supported"
                )));
            }
            let mut entries = Vec::new();
            loop {
                let key = vlq::decode_u32(buf)?;
                if key == 0 {
                    break;
                }
                entries.push((key, Blob::decode(buf)?));
            }
            return Ok(Self::BlobSparseArray(entries));
        }

        if flags & FLAG_ADDRESS_ARRAY != 0 {
            if datatype != Datatype::UDInt {
                return Err(S7Error::decode(format!(
                    "address array of {datatype} not supported"
                )));
            }
            let count = check_count(datatype, vlq::decode_u32(buf)? as usize, buf)?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(vlq::decode_u32(buf)?);
            }
            return Ok(Self::AddressArray(items));
        }

        if flags & FLAG_ARRAY != 0 {
            let count = check_count(datatype, vlq::decode_u32(buf)? as usize, buf)?;
            if datatype == Datatype::Blob {
                let mut blobs = Vec::with_capacity(count);
                for _ in 0..count {
                    blobs.push(Blob::decode(buf)?);
                }
                return Ok(Self::BlobArray(blobs));
            }
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(Self::decode_payload(datatype, buf, depth)?);
            }
            return Ok(Self::Array { datatype, items });
        }

        Self::decode_payload(datatype, buf, depth)
    }

    fn decode_payload(datatype: Datatype, buf: &mut impl Buf, depth: usize) -> Result<Self> {
        let value = match datatype {
            Datatype::Null => Self::Null,
            Datatype::Bool => Self::Bool(wire::read_u8(buf)? != 0),
            Datatype::USInt => Self::USInt(wire::read_u8(buf)?),
            Datatype::UInt => Self::UInt(wire::read_u16(buf)?),
            Datatype::UDInt => Self::UDInt(vlq::decode_u32(buf)?),
            Datatype::ULInt => Self::ULInt(vlq::decode_u64(buf)?),
            Datatype::SInt => Self::SInt(wire::read_i8(buf)?),
            Datatype::Int => Self::Int(wire::read_i16(buf)?),
            Datatype::DInt => Self::DInt(vlq::decode_i32(buf)?),
            Datatype::LInt => Self::LInt(vlq::decode_i64(buf)?),
            Datatype::Byte => Self::Byte(wire::read_u8(buf)?),
            Datatype::Word => Self::Word(wire::read_u16(buf)?),
            Datatype::DWord => Self::DWord(wire::read_u32(buf)?),
            Datatype::LWord => Self::LWord(wire::read_u64(buf)?),
            Datatype::Real => Self::Real(wire::read_f32(buf)?),
            Datatype::LReal => Self::LReal(wire::read_f64(buf)?),
            Datatype::Timestamp => Self::Timestamp(wire::read_u64(buf)?),
            Datatype::Timespan => Self::Timespan(vlq::decode_i64(buf)?),
            Datatype::Rid => Self::Rid(wire::read_u32(buf)?),
            Datatype::Aid => Self::Aid(vlq::decode_u32(buf)?),
            Datatype::Blob => Self::Blob(Blob::decode(buf)?),
            Datatype::WString => {
                let len = vlq::decode_u32(buf)? as usize;
                let raw = wire::read_bytes(buf, len)?;
                let text = String::from_utf8(raw.to_vec())
                    .map_err(|e| S7Error::decode(format!("invalid WString: {e}")))?;
                Self::WString(text)
            }
            Datatype::Struct => {
                let mut value = ValueStruct::new(wire::read_u32(buf)?);
                loop {
                    let id = vlq::decode_u32(buf)?;
                    if id == 0 {
                        break;
                    }
                    value.push(id, Self::decode_nested(buf, depth + 1)?);
                }
                Self::Struct(value)
            }
            Datatype::Variant | Datatype::S7String => {
                return Err(S7Error::decode(format!(
                    "datatype {datatype} not supported"
                )));
            }
        };
        Ok(value)
    }

    /// Encode the value including its flags and datatype bytes.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags());
        buf.put_u8(self.datatype().as_u8());

        match self {
            Self::Array { items, .. } => {
                vlq::encode_u32(buf, items.len() as u32);
                for item in items {
                    item.encode_payload(buf);
                }
            }
            Self::AddressArray(items) => {
                vlq::encode_u32(buf, items.len() as u32);
                for item in items {
                    vlq::encode_u32(buf, *item);
                }
            }
            Self::BlobArray(blobs) => {
                vlq::encode_u32(buf, blobs.len() as u32);
                for blob in blobs {
                    blob.encode(buf);
                }
            }
            Self::BlobSparseArray(entries) => {
                for (key, blob) in entries {
                    vlq::encode_u32(buf, *key);
                    blob.encode(buf);
                }
                vlq::encode_u32(buf, 0);
            }
            scalar => scalar.encode_payload(buf),
        }
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Self::Null => {}
            Self::Bool(v) => buf.put_u8(u8::from(*v)),
            Self::USInt(v) | Self::Byte(v) => buf.put_u8(*v),
            Self::UInt(v) | Self::Word(v) => buf.put_u16(*v),
            Self::UDInt(v) | Self::Aid(v) => vlq::encode_u32(buf, *v),
            Self::ULInt(v) => vlq::encode_u64(buf, *v),
            Self::SInt(v) => buf.put_i8(*v),
            Self::Int(v) => buf.put_i16(*v),
            Self::DInt(v) => vlq::encode_i32(buf, *v),
            Self::LInt(v) | Self::Timespan(v) => vlq::encode_i64(buf, *v),
            Self::DWord(v) | Self::Rid(v) => buf.put_u32(*v),
            Self::LWord(v) | Self::Timestamp(v) => buf.put_u64(*v),
            Self::Real(v) => buf.put_f32(*v),
            Self::LReal(v) => buf.put_f64(*v),
            Self::Blob(blob) => blob.encode(buf),
            Self::WString(text) => {
                vlq::encode_u32(buf, text.len() as u32);
                buf.put_slice(text.as_bytes());
            }
            Self::Struct(value) => {
                buf.put_u32(value.id);
                for (id, element) in &value.elements {
                    vlq::encode_u32(buf, *id);
                    element.encode(buf);
                }
                vlq::encode_u32(buf, 0);
            }
            Self::Array { .. }
            | Self::AddressArray(_)
            | Self::BlobArray(_)
            | Self::BlobSparseArray(_) => {
                // Containers only appear at the top level of a value
                self.encode(buf)
            }
        }
    }

    /// Unsigned integer content of any unsigned scalar.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Bool(v) => Some(u64::from(*v)),
            Self::USInt(v) | Self::Byte(v) => Some(u64::from(*v)),
            Self::UInt(v) | Self::Word(v) => Some(u64::from(*v)),
            Self::UDInt(v) | Self::DWord(v) | Self::Rid(v) | Self::Aid(v) => Some(u64::from(*v)),
            Self::ULInt(v) | Self::LWord(v) | Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Unsigned 32-bit content, if the value fits.
    pub fn as_u32(&self) -> Option<u32> {
        self.as_u64().and_then(|v| u32::try_from(v).ok())
    }

    /// Signed integer content of any signed scalar.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SInt(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::DInt(v) => Some(i64::from(*v)),
            Self::LInt(v) | Self::Timespan(v) => Some(*v),
            _ => None,
        }
    }

    /// Text content of a WString.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::WString(text) => Some(text),
            _ => None,
        }
    }

    /// Blob content.
    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Self::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    /// Struct content.
    pub fn as_struct(&self) -> Option<&ValueStruct> {
        match self {
            Self::Struct(value) => Some(value),
            _ => None,
        }
    }

    /// Bytes of a USInt/Byte array.
    pub fn as_byte_array(&self) -> Option<Vec<u8>> {
        match self {
            Self::Array {
                datatype: Datatype::USInt | Datatype::Byte,
                items,
            } => items
                .iter()
                .map(|item| match item {
                    Self::USInt(b) | Self::Byte(b) => Some(*b),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Words of a UInt/Word array.
    pub fn as_word_array(&self) -> Option<Vec<u16>> {
        match self {
            Self::Array {
                datatype: Datatype::UInt | Datatype::Word,
                items,
            } => items
                .iter()
                .map(|item| match item {
                    Self::UInt(w) | Self::Word(w) => Some(*w),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}
