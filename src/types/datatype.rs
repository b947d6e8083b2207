//! Wire datatype and PLC softdatatype identifiers.
//!
//! A [`Datatype`] is the tag byte that precedes every encoded
//! [`Value`](super::Value). A [`Softdatatype`] is the type a variable has in the
//! PLC program, as reported by the symbol table; several softdatatypes share
//! one wire datatype.

use crate::error::{Result, S7Error};

/// Value flag: payload is an array.
pub const FLAG_ARRAY: u8 = 0x10;
/// Value flag: payload is an address array.
pub const FLAG_ADDRESS_ARRAY: u8 = 0x20;
/// Value flag: payload is a sparse array.
pub const FLAG_SPARSE_ARRAY: u8 = 0x40;

/// Datatype tag of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Datatype {
    Null = 0x00,
    Bool = 0x01,
    USInt = 0x02,
    UInt = 0x03,
    UDInt = 0x04,
    ULInt = 0x05,
    SInt = 0x06,
    Int = 0x07,
    DInt = 0x08,
    LInt = 0x09,
    Byte = 0x0a,
    Word = 0x0b,
    DWord = 0x0c,
    LWord = 0x0d,
    Real = 0x0e,
    LReal = 0x0f,
    Timestamp = 0x10,
    Timespan = 0x11,
    Rid = 0x12,
    Aid = 0x13,
    Blob = 0x14,
    WString = 0x15,
    Variant = 0x16,
    Struct = 0x17,
    S7String = 0x19,
}

impl Datatype {
    /// Create a Datatype from its raw byte value.
    #[inline]
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Null),
            0x01 => Ok(Self::Bool),
            0x02 => Ok(Self::USInt),
            0x03 => Ok(Self::UInt),
            0x04 => Ok(Self::UDInt),
            0x05 => Ok(Self::ULInt),
            0x06 => Ok(Self::SInt),
            0x07 => Ok(Self::Int),
            0x08 => Ok(Self::DInt),
            0x09 => Ok(Self::LInt),
            0x0a => Ok(Self::Byte),
            0x0b => Ok(Self::Word),
            0x0c => Ok(Self::DWord),
            0x0d => Ok(Self::LWord),
            0x0e => Ok(Self::Real),
            0x0f => Ok(Self::LReal),
            0x10 => Ok(Self::Timestamp),
            0x11 => Ok(Self::Timespan),
            0x12 => Ok(Self::Rid),
            0x13 => Ok(Self::Aid),
            0x14 => Ok(Self::Blob),
            0x15 => Ok(Self::WString),
            0x16 => Ok(Self::Variant),
            0x17 => Ok(Self::Struct),
            0x19 => Ok(Self::S7String),
            _ => Err(S7Error::decode(format!("unknown datatype 0x{value:02X}"))),
        }
    }

    /// Convert to raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the payload of this type is VLQ encoded.
    #[inline]
    pub const fn is_vlq(&self) -> bool {
        matches!(
            self,
            Self::UDInt | Self::ULInt | Self::DInt | Self::LInt | Self::Aid | Self::Timespan
        )
    }
}

impl std::fmt::Display for Datatype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Datatype of a variable as declared in the PLC program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Softdatatype {
    Void = 0,
    Bool = 1,
    Byte = 2,
    Char = 3,
    Word = 4,
    Int = 5,
    DWord = 6,
    DInt = 7,
    Real = 8,
    Date = 9,
    TimeOfDay = 10,
    Time = 11,
    S5Time = 12,
    DateAndTime = 14,
    Array = 16,
    Struct = 17,
    String = 19,
    Pointer = 20,
    Any = 22,
    LReal = 48,
    ULInt = 49,
    LInt = 50,
    LWord = 51,
    USInt = 52,
    UInt = 53,
    UDInt = 54,
    SInt = 55,
    WChar = 61,
    WString = 62,
    LTime = 64,
    LTimeOfDay = 65,
    LDateAndTime = 66,
    Dtl = 67,
}

impl Softdatatype {
    /// Create a Softdatatype from its raw identifier.
    pub fn from_u32(value: u32) -> Result<Self> {
        let ty = match value {
            0 => Self::Void,
            1 => Self::Bool,
            2 => Self::Byte,
            3 => Self::Char,
            4 => Self::Word,
            5 => Self::Int,
            6 => Self::DWord,
            7 => Self::DInt,
            8 => Self::Real,
            9 => Self::Date,
            10 => Self::TimeOfDay,
            11 => Self::Time,
            12 => Self::S5Time,
            14 => Self::DateAndTime,
            16 => Self::Array,
            17 => Self::Struct,
            19 => Self::String,
            20 => Self::Pointer,
            22 => Self::Any,
            48 => Self::LReal,
            49 => Self::ULInt,
            50 => Self::LInt,
            51 => Self::LWord,
            52 => Self::USInt,
            53 => Self::UInt,
            54 => Self::UDInt,
            55 => Self::SInt,
            61 => Self::WChar,
            62 => Self::WString,
            64 => Self::LTime,
            65 => Self::LTimeOfDay,
            66 => Self::LDateAndTime,
            67 => Self::Dtl,
            _ => {
                return Err(S7Error::decode(format!("unknown softdatatype {value}")));
            }
        };
        Ok(ty)
    }

    /// Convert to raw identifier.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Wire datatype used to carry a scalar of this type.
    ///
    /// Types with a packed byte layout (strings, DT, DTL, pointers) travel as
    /// a USInt array; `WString` travels as a UInt array. `None` for types that
    /// cannot be transferred as a single value.
    pub const fn wire_datatype(&self) -> Option<Datatype> {
        let ty = match self {
            Self::Bool => Datatype::Bool,
            Self::Byte => Datatype::Byte,
            Self::Char | Self::USInt => Datatype::USInt,
            Self::Word | Self::S5Time => Datatype::Word,
            Self::Int => Datatype::Int,
            Self::DWord => Datatype::DWord,
            Self::DInt | Self::Time => Datatype::DInt,
            Self::Real => Datatype::Real,
            Self::Date | Self::UInt | Self::WChar => Datatype::UInt,
            Self::TimeOfDay | Self::UDInt => Datatype::UDInt,
            Self::LReal => Datatype::LReal,
            Self::ULInt | Self::LTimeOfDay => Datatype::ULInt,
            Self::LInt => Datatype::LInt,
            Self::LWord => Datatype::LWord,
            Self::SInt => Datatype::SInt,
            Self::LTime => Datatype::Timespan,
            Self::LDateAndTime => Datatype::Timestamp,
            Self::DateAndTime
            | Self::String
            | Self::Pointer
            | Self::Any
            | Self::Dtl => Datatype::USInt,
            Self::WString => Datatype::UInt,
            Self::Void | Self::Array | Self::Struct => return None,
        };
        Some(ty)
    }

    /// Whether the wire representation is an array of packed bytes/words.
    #[inline]
    pub const fn is_packed(&self) -> bool {
        matches!(
            self,
            Self::DateAndTime
                | Self::String
                | Self::Pointer
                | Self::Any
                | Self::Dtl
                | Self::WString
        )
    }
}

impl std::fmt::Display for Softdatatype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
