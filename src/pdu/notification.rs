//! Notification PDU.
//!
//! ```text
//! 33 | subscription_object_id:u32 | u16 | u16 | u16 | credit_tick:u8 | seq:vlq | u8
//!    | (ref_id:vlq status:u8 [Value])* 0
//!    | objects* 00
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::{decode_object_list, encode_object_list, Opcode};
use crate::error::Result;
use crate::types::{vlq, wire, Object, Value};

/// Entry status: value follows.
pub const NOTIFICATION_STATUS_VALUE: u8 = 0x92;
/// Entry status: value follows (alternative encoding).
pub const NOTIFICATION_STATUS_VALUE_ALT: u8 = 0x9B;

/// One value entry of a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationValue {
    pub reference_id: u32,
    pub status: u8,
    pub value: Option<Value>,
}

impl NotificationValue {
    /// Whether the status code announces a value.
    #[inline]
    pub const fn has_value_status(status: u8) -> bool {
        matches!(status, NOTIFICATION_STATUS_VALUE | NOTIFICATION_STATUS_VALUE_ALT)
    }
}

/// A notification pushed by the device for a subscription.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Notification {
    pub subscription_object_id: u32,
    pub unknown: [u16; 3],
    pub credit_tick: u8,
    pub sequence_number: u32,
    pub unknown2: u8,
    pub values: Vec<NotificationValue>,
    /// Objects carried by alarm notifications.
    pub objects: Vec<Object>,
}

impl Notification {
    /// Decode the body following the opcode.
    pub fn decode_body(body: &mut Bytes) -> Result<Self> {
        let subscription_object_id = wire::read_u32(body)?;
        let unknown = [
            wire::read_u16(body)?,
            wire::read_u16(body)?,
            wire::read_u16(body)?,
        ];
        let credit_tick = wire::read_u8(body)?;
        let sequence_number = vlq::decode_u32(body)?;
        let unknown2 = wire::read_u8(body)?;

        let mut values = Vec::new();
        loop {
            let reference_id = vlq::decode_u32(body)?;
            if reference_id == 0 {
                break;
            }
            let status = wire::read_u8(body)?;
            let value = if NotificationValue::has_value_status(status) {
                Some(Value::decode(body)?)
            } else {
                None
            };
            values.push(NotificationValue {
                reference_id,
                status,
                value,
            });
        }

        let objects = if body.is_empty() {
            Vec::new()
        } else {
            decode_object_list(body)?
        };

        Ok(Self {
            subscription_object_id,
            unknown,
            credit_tick,
            sequence_number,
            unknown2,
            values,
            objects,
        })
    }

    /// Encode the complete PDU including the opcode.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_u8(Opcode::Notification.as_u8());
        buf.put_u32(self.subscription_object_id);
        for word in self.unknown {
            buf.put_u16(word);
        }
        buf.put_u8(self.credit_tick);
        vlq::encode_u32(&mut buf, self.sequence_number);
        buf.put_u8(self.unknown2);
        for entry in &self.values {
            vlq::encode_u32(&mut buf, entry.reference_id);
            buf.put_u8(entry.status);
            if let Some(value) = &entry.value {
                value.encode(&mut buf);
            }
        }
        vlq::encode_u32(&mut buf, 0);
        encode_object_list(&mut buf, &self.objects);
        buf.freeze()
    }
}
