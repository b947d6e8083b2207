//! Static and dynamic alarm records.

use bytes::Buf;
use chrono::{Duration, NaiveDateTime};

use crate::error::{Result, S7Error};
use crate::types::{ids, wire, Datatype, Object, Value, ValueStruct};

/// Most associated values an alarm state carries.
pub const MAX_ASSOCIATED_VALUES: usize = 10;

/// HmiInfo syntax adding group id and flags.
pub const HMI_INFO_SYNTAX_GROUP: u16 = 257;
/// HmiInfo syntax adding the extension word.
pub const HMI_INFO_SYNTAX_EXTENDED: u16 = 258;

/// CPU alarm id of alarm `alid` in the program block `relation_id`.
#[inline]
pub const fn cpu_alarm_id(relation_id: u32, alid: u16) -> u64 {
    ((relation_id as u64) << 32) | ((alid as u64) << 16)
}

/// Display metadata of an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HmiInfo {
    pub syntax_id: u16,
    pub version: u16,
    pub client_alarm_id: u32,
    pub priority: u8,
    pub alarm_class: u16,
    pub producer: u8,
    /// Present from syntax 257.
    pub group_id: Option<u8>,
    /// Present from syntax 257.
    pub flags: Option<u8>,
    /// Present from syntax 258.
    pub extension: Option<u32>,
}

impl HmiInfo {
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        let syntax_id = wire::read_u16(buf)?;
        let version = wire::read_u16(buf)?;
        let client_alarm_id = wire::read_u32(buf)?;
        let priority = wire::read_u8(buf)?;
        let _reserved = wire::read_bytes(buf, 3)?;
        let alarm_class = wire::read_u16(buf)?;
        let producer = wire::read_u8(buf)?;

        let mut info = Self {
            syntax_id,
            version,
            client_alarm_id,
            priority,
            alarm_class,
            producer,
            ..Default::default()
        };
        if syntax_id >= HMI_INFO_SYNTAX_GROUP {
            info.group_id = Some(wire::read_u8(buf)?);
            info.flags = Some(wire::read_u8(buf)?);
        }
        if syntax_id >= HMI_INFO_SYNTAX_EXTENDED {
            info.extension = Some(wire::read_u32(buf)?);
        }
        Ok(info)
    }
}

/// Static data of one alarm, from a MultipleSTAI blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaiRecord {
    pub alid: u16,
    pub alarm_domain: u16,
    pub message_type: u16,
    pub enabled: bool,
    pub hmi_info: HmiInfo,
}

/// Decode a MultipleSTAI blob: `count:u16` followed by the records.
pub fn decode_multiple_stai(mut data: &[u8]) -> Result<Vec<StaiRecord>> {
    let count = wire::read_u16(&mut data)?;
    let mut records = Vec::with_capacity(usize::from(count).min(data.len()));
    for _ in 0..count {
        records.push(StaiRecord {
            alid: wire::read_u16(&mut data)?,
            alarm_domain: wire::read_u16(&mut data)?,
            message_type: wire::read_u16(&mut data)?,
            enabled: wire::read_u8(&mut data)? != 0,
            hmi_info: HmiInfo::decode(&mut data)?,
        });
    }
    Ok(records)
}

/// Decode associated values: `(datatype:u8, payload)` until the blob ends.
///
/// Payloads are fixed-width big-endian scalars.
pub fn decode_associated_values(mut data: &[u8]) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    while data.has_remaining() {
        if values.len() == MAX_ASSOCIATED_VALUES {
            return Err(S7Error::decode("more than 10 associated values"));
        }
        let value = match Datatype::from_u8(wire::read_u8(&mut data)?)? {
            Datatype::Null => Value::Null,
            Datatype::Bool => Value::Bool(wire::read_u8(&mut data)? != 0),
            Datatype::USInt => Value::USInt(wire::read_u8(&mut data)?),
            Datatype::Byte => Value::Byte(wire::read_u8(&mut data)?),
            Datatype::SInt => Value::SInt(wire::read_i8(&mut data)?),
            Datatype::UInt => Value::UInt(wire::read_u16(&mut data)?),
            Datatype::Word => Value::Word(wire::read_u16(&mut data)?),
            Datatype::Int => Value::Int(wire::read_i16(&mut data)?),
            Datatype::UDInt => Value::UDInt(wire::read_u32(&mut data)?),
            Datatype::DWord => Value::DWord(wire::read_u32(&mut data)?),
            Datatype::DInt => Value::DInt(wire::read_i32(&mut data)?),
            Datatype::ULInt => Value::ULInt(wire::read_u64(&mut data)?),
            Datatype::LWord => Value::LWord(wire::read_u64(&mut data)?),
            Datatype::LInt => Value::LInt(wire::read_i64(&mut data)?),
            Datatype::Real => Value::Real(wire::read_f32(&mut data)?),
            Datatype::LReal => Value::LReal(wire::read_f64(&mut data)?),
            other => {
                return Err(S7Error::decode(format!(
                    "unsupported associated value type {other}"
                )))
            }
        };
        values.push(value);
    }
    Ok(values)
}

fn timestamp(value: Option<&Value>) -> Option<NaiveDateTime> {
    let nanos = match value? {
        Value::Timestamp(0) => return None,
        Value::Timestamp(ns) => i64::try_from(*ns).ok()?,
        _ => return None,
    };
    NaiveDateTime::default().checked_add_signed(Duration::nanoseconds(nanos))
}

/// One state change (coming or going) of an alarm instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlarmState {
    pub all_states_info: u8,
    pub timestamp: Option<NaiveDateTime>,
    pub ack_timestamp: Option<NaiveDateTime>,
    pub associated_values: Vec<Value>,
}

impl AlarmState {
    pub fn from_struct(state: &ValueStruct) -> Result<Self> {
        let associated_values = match state.get(ids::AS_CGS_ASSOCIATED_VALUES) {
            Some(Value::Blob(blob)) => decode_associated_values(&blob.data)?,
            _ => Vec::new(),
        };
        Ok(Self {
            all_states_info: state
                .get(ids::AS_CGS_ALL_STATES_INFO)
                .and_then(Value::as_u32)
                .unwrap_or(0) as u8,
            timestamp: timestamp(state.get(ids::AS_CGS_TIMESTAMP)),
            ack_timestamp: timestamp(state.get(ids::AS_CGS_ACK_TIMESTAMP)),
            associated_values,
        })
    }
}

/// A dynamic alarm instance pushed by an alarm subscription.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dai {
    pub cpu_alarm_id: u64,
    pub all_states_info: u8,
    pub alarm_domain: u16,
    pub message_type: u32,
    pub sequence_counter: u32,
    pub hmi_info: Option<HmiInfo>,
    pub coming: Option<AlarmState>,
    pub going: Option<AlarmState>,
}

impl Dai {
    /// Build from an object of class [`CLASS_DAI`](ids::CLASS_DAI).
    pub fn from_object(object: &Object) -> Result<Self> {
        if object.class_id != ids::CLASS_DAI {
            return Err(S7Error::decode(format!(
                "object class {} is not an alarm instance",
                object.class_id
            )));
        }
        let cpu_alarm_id = object
            .get_attribute(ids::DAI_CPU_ALARM_ID)?
            .as_u64()
            .ok_or_else(|| S7Error::decode("CPU alarm id is not an unsigned integer"))?;
        let number = |id| object.attribute(id).and_then(Value::as_u32).unwrap_or(0);
        let state = |id| match object.attribute(id) {
            Some(Value::Struct(state)) => AlarmState::from_struct(state).map(Some),
            _ => Ok(None),
        };
        let hmi_info = match object.attribute(ids::DAI_HMI_INFO) {
            Some(Value::Blob(blob)) => Some(HmiInfo::decode(&mut &blob.data[..])?),
            _ => None,
        };

        Ok(Self {
            cpu_alarm_id,
            all_states_info: number(ids::DAI_ALL_STATES_INFO) as u8,
            alarm_domain: number(ids::DAI_ALARM_DOMAIN) as u16,
            message_type: number(ids::DAI_MESSAGE_TYPE),
            sequence_counter: number(ids::DAI_SEQUENCE_COUNTER),
            hmi_info,
            coming: state(ids::DAI_COMING)?,
            going: state(ids::DAI_GOING)?,
        })
    }

    /// Relation id of the program block raising the alarm.
    pub fn relation_id(&self) -> u32 {
        (self.cpu_alarm_id >> 32) as u32
    }

    /// Alarm number within its block.
    pub fn alid(&self) -> u16 {
        (self.cpu_alarm_id >> 16) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::fixtures;
    use crate::types::Blob;

    #[test]
    fn test_cpu_alarm_id() {
        let id = cpu_alarm_id(0x0001_0002, 5);
        assert_eq!(id, 0x0001_0002_0005_0000);
        let dai = Dai {
            cpu_alarm_id: id,
            ..Default::default()
        };
        assert_eq!(dai.relation_id(), 0x0001_0002);
        assert_eq!(dai.alid(), 5);
    }

    #[test]
    fn test_hmi_info_syntax_gating() {
        let info = HmiInfo::decode(&mut &fixtures::hmi_info(256)[..]).unwrap();
        assert_eq!(info.priority, 3);
        assert_eq!(info.alarm_class, 0x0102);
        assert_eq!(info.group_id, None);
        assert_eq!(info.extension, None);

        let info = HmiInfo::decode(&mut &fixtures::hmi_info(257)[..]).unwrap();
        assert_eq!(info.group_id, Some(7));
        assert_eq!(info.flags, Some(1));
        assert_eq!(info.extension, None);

        let mut data = &fixtures::hmi_info(258)[..];
        let info = HmiInfo::decode(&mut data).unwrap();
        assert_eq!(info.extension, Some(0xDEAD_BEEF));
        assert!(data.is_empty());

        // Syntax 258 without its extension
        let data = fixtures::hmi_info(258);
        assert!(HmiInfo::decode(&mut &data[..data.len() - 1]).is_err());
    }

    #[test]
    fn test_multiple_stai() {
        let records = decode_multiple_stai(&fixtures::multiple_stai(&[5, 6])).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].alid, 5);
        assert_eq!(records[1].alid, 6);
        assert!(records[0].enabled);
        assert_eq!(records[0].hmi_info.group_id, Some(7));

        let data = fixtures::multiple_stai(&[5]);
        assert!(decode_multiple_stai(&data[..data.len() - 2]).is_err());
    }

    #[test]
    fn test_associated_values() {
        let data = [0x07, 0x00, 0x2A, 0x01, 0x01, 0x0e, 0x3F, 0xC0, 0x00, 0x00];
        assert_eq!(
            decode_associated_values(&data).unwrap(),
            vec![Value::Int(42), Value::Bool(true), Value::Real(1.5)]
        );
        assert!(decode_associated_values(&[0x07, 0x00]).is_err());
        assert!(decode_associated_values(&[0x15, 0x00]).is_err());
        assert!(decode_associated_values(&[0x02, 0x01].repeat(11)).is_err());
    }

    #[test]
    fn test_dai_from_object() {
        let object = fixtures::dai(cpu_alarm_id(0x0001_0002, 5));
        let dai = Dai::from_object(&object).unwrap();

        assert_eq!(dai.alid(), 5);
        assert_eq!(dai.alarm_domain, 1);
        let coming = dai.coming.unwrap();
        assert_eq!(coming.associated_values, vec![Value::Int(42)]);
        assert_eq!(
            coming.timestamp.unwrap().and_utc().timestamp(),
            1_700_000_000
        );
        assert!(coming.ack_timestamp.is_none());
        assert!(dai.going.is_none());

        let wrong = Object::new(1, ids::CLASS_SUBSCRIPTION, 0)
            .with_attribute(ids::DAI_CPU_ALARM_ID, Value::ULInt(1));
        assert!(Dai::from_object(&wrong).is_err());
        let missing_id = Object::new(1, ids::CLASS_DAI, 0)
            .with_attribute(ids::DAI_HMI_INFO, Value::Blob(Blob::new(fixtures::hmi_info(257))));
        assert!(matches!(
            Dai::from_object(&missing_id),
            Err(S7Error::AttributeNotFound(ids::DAI_CPU_ALARM_ID))
        ));
    }
}
