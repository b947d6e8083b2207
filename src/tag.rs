//! PLC tags: a named variable address with its latest value.

use std::fmt;

use crate::error::{Result, S7Error};
use crate::types::{ItemAddress, PlcValue, Softdatatype, Value};

/// Quality of a tag's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagStatus {
    /// Never read.
    #[default]
    Unknown,
    /// Value is current.
    Good,
    /// Device reported an item error code.
    DeviceError(u64),
    /// Notification entry without a value, with its status code.
    NotificationStatus(u8),
    /// Received value did not match the tag's softdatatype.
    TypeMismatch,
}

impl TagStatus {
    #[inline]
    pub const fn is_good(&self) -> bool {
        matches!(self, Self::Good)
    }
}

/// A PLC variable addressed by access area, sub-area and LID chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PlcTag {
    pub name: String,
    pub address: ItemAddress,
    pub softdatatype: Softdatatype,
    pub value: Option<PlcValue>,
    pub status: TagStatus,
}

impl PlcTag {
    pub fn new(name: impl Into<String>, address: ItemAddress, softdatatype: Softdatatype) -> Self {
        Self {
            name: name.into(),
            address,
            softdatatype,
            value: None,
            status: TagStatus::Unknown,
        }
    }

    /// Set the value to write.
    ///
    /// Fails when the value's type differs from the tag's softdatatype.
    pub fn set_value(&mut self, value: PlcValue) -> Result<()> {
        if value.softdatatype() != self.softdatatype {
            return Err(S7Error::invalid_value(format!(
                "{} expects {}, got {}",
                self.name,
                self.softdatatype,
                value.softdatatype()
            )));
        }
        self.value = Some(value);
        Ok(())
    }

    /// Builder form of [`set_value`](Self::set_value).
    pub fn with_value(mut self, value: PlcValue) -> Result<Self> {
        self.set_value(value)?;
        Ok(self)
    }

    /// Wire value for a write.
    pub fn wire_value(&self) -> Result<Value> {
        match &self.value {
            Some(value) => value.to_wire(),
            None => Err(S7Error::invalid_value(format!("{} has no value to write", self.name))),
        }
    }

    /// Store a value received from the device.
    ///
    /// On a type mismatch the previous value is kept, the status becomes
    /// [`TagStatus::TypeMismatch`] and the error is returned.
    pub fn apply_wire(&mut self, value: &Value) -> Result<()> {
        match PlcValue::from_wire(self.softdatatype, value) {
            Ok(value) => {
                self.value = Some(value);
                self.status = TagStatus::Good;
                Ok(())
            }
            Err(e) => {
                self.status = TagStatus::TypeMismatch;
                Err(e)
            }
        }
    }

    /// Record an item error reported by the device.
    pub fn set_error(&mut self, code: u64) {
        self.status = TagStatus::DeviceError(code);
    }
}

impl fmt::Display for PlcTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} ({}) = {:?}", self.name, self.address, value),
            None => write!(f, "{} ({}) = <{:?}>", self.name, self.address, self.status),
        }
    }
}
