//! PLC-level values and their packed byte layouts.
//!
//! [`PlcValue`] is what a program variable holds, typed by its
//! [`Softdatatype`]. Scalars map one-to-one onto a wire [`Value`]; types with a
//! packed layout travel as a USInt (or UInt) array:
//!
//! | softdatatype        | wire value                      |
//! |---------------------|---------------------------------|
//! | Time                | DInt (ms)                       |
//! | LTime               | Timespan (ns)                   |
//! | S5Time              | Word (BCD + time base)          |
//! | Date                | UInt (days since 1990-01-01)    |
//! | TimeOfDay           | UDInt (ms since midnight)       |
//! | LTimeOfDay          | ULInt (ns since midnight)       |
//! | LDateAndTime        | Timestamp (ns since 1970)       |
//! | Char / WChar        | USInt / UInt                    |
//! | DateAndTime         | USInt[8] (BCD)                  |
//! | Dtl                 | USInt[12]                       |
//! | String              | USInt[max + 2] (Latin-1)        |
//! | WString             | UInt[max + 2] (UTF-16)          |
//! | Pointer / Any       | USInt[6] / USInt[10]            |

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use super::datatype::Softdatatype;
use super::value::Value;
use crate::error::{Result, S7Error};

/// Days between 1970-01-01 and 1990-01-01.
const DAYS_1970_TO_1990: i64 = 7305;

/// Area byte of a data block pointer.
pub const AREA_DB: u8 = 0x84;

/// Syntax id of an ANY pointer.
pub const ANY_SYNTAX_ID: u8 = 0x10;

#[inline]
fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

#[inline]
fn from_bcd(byte: u8) -> Result<u8> {
    let (high, low) = (byte >> 4, byte & 0x0F);
    if high > 9 || low > 9 {
        return Err(S7Error::decode(format!("invalid BCD byte 0x{byte:02X}")));
    }
    Ok(high * 10 + low)
}

fn expect_len(bytes: &[u8], len: usize, what: &str) -> Result<()> {
    if bytes.len() != len {
        return Err(S7Error::decode(format!(
            "{what} needs {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

/// S5TIME time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TimeBase {
    /// 10 ms
    Ms10 = 0,
    /// 100 ms
    Ms100 = 1,
    /// 1 s
    S1 = 2,
    /// 10 s
    S10 = 3,
}

impl TimeBase {
    /// Create a TimeBase from its two-bit code.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Ms10),
            1 => Ok(Self::Ms100),
            2 => Ok(Self::S1),
            3 => Ok(Self::S10),
            _ => Err(S7Error::invalid_value(format!("S5Time base {value}"))),
        }
    }

    /// Length of one tick in milliseconds.
    pub const fn millis(&self) -> u64 {
        match self {
            Self::Ms10 => 10,
            Self::Ms100 => 100,
            Self::S1 => 1000,
            Self::S10 => 10_000,
        }
    }
}

/// S5TIME: three BCD digits and a time base packed in a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct S5Time {
    value: u16,
    base: TimeBase,
}

impl S5Time {
    /// Largest representable tick count.
    pub const MAX_VALUE: u16 = 999;

    /// Create an S5Time; `value` must be at most 999.
    pub fn new(value: u16, base: TimeBase) -> Result<Self> {
        if value > Self::MAX_VALUE {
            return Err(S7Error::invalid_value(format!(
                "S5Time value {value} exceeds 999"
            )));
        }
        Ok(Self { value, base })
    }

    #[inline]
    pub const fn value(&self) -> u16 {
        self.value
    }

    #[inline]
    pub const fn base(&self) -> TimeBase {
        self.base
    }

    /// Encoded word: BCD digits in bits 0-11, time base in bits 12-13.
    pub fn to_word(&self) -> u16 {
        let hundreds = self.value / 100;
        let tens = (self.value / 10) % 10;
        let ones = self.value % 10;
        ((self.base as u16) << 12) | (hundreds << 8) | (tens << 4) | ones
    }

    /// Decode from the encoded word.
    pub fn from_word(word: u16) -> Result<Self> {
        let base = TimeBase::from_u8(((word >> 12) & 0x03) as u8)?;
        let high = from_bcd(((word >> 8) & 0x0F) as u8)?;
        let low = from_bcd((word & 0xFF) as u8)?;
        Self::new(u16::from(high) * 100 + u16::from(low), base)
    }

    /// Duration represented by this value.
    pub fn to_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.value) * self.base.millis())
    }
}

/// DTL: date and time with a separate nanosecond field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dtl {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    /// 1 = Sunday .. 7 = Saturday
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// 0..=999_999_999
    pub nanosecond: u32,
}

impl Dtl {
    /// Encoded size.
    pub const SIZE: usize = 12;

    /// Largest valid nanosecond value.
    pub const MAX_NANOSECOND: u32 = 999_999_999;

    /// Build from a chrono timestamp. DTL covers the years 1970 to 2554.
    pub fn from_naive(dt: &NaiveDateTime) -> Result<Self> {
        let year = dt.year();
        if !(1970..=2554).contains(&year) {
            return Err(S7Error::invalid_value(format!("DTL year {year} out of range")));
        }
        Ok(Self {
            year: year as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            weekday: dt.weekday().number_from_sunday() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            nanosecond: dt.nanosecond().min(Self::MAX_NANOSECOND),
        })
    }

    /// Convert to a chrono timestamp. The weekday field is not checked.
    pub fn to_naive(&self) -> Result<NaiveDateTime> {
        NaiveDate::from_ymd_opt(i32::from(self.year), u32::from(self.month), u32::from(self.day))
            .and_then(|date| {
                date.and_hms_nano_opt(
                    u32::from(self.hour),
                    u32::from(self.minute),
                    u32::from(self.second),
                    self.nanosecond,
                )
            })
            .ok_or_else(|| S7Error::decode(format!("invalid DTL {self:?}")))
    }

    /// Encode the 12-byte layout.
    pub fn to_bytes(&self) -> Result<[u8; 12]> {
        if self.nanosecond > Self::MAX_NANOSECOND {
            return Err(S7Error::invalid_value(format!(
                "DTL nanosecond {} out of range",
                self.nanosecond
            )));
        }
        let mut out = [0u8; 12];
        out[0..2].copy_from_slice(&self.year.to_be_bytes());
        out[2] = self.month;
        out[3] = self.day;
        out[4] = self.weekday;
        out[5] = self.hour;
        out[6] = self.minute;
        out[7] = self.second;
        out[8..12].copy_from_slice(&self.nanosecond.to_be_bytes());
        Ok(out)
    }

    /// Decode the 12-byte layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        expect_len(bytes, Self::SIZE, "DTL")?;
        let nanosecond = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if nanosecond > Self::MAX_NANOSECOND {
            return Err(S7Error::decode(format!("DTL nanosecond {nanosecond} out of range")));
        }
        Ok(Self {
            year: u16::from_be_bytes([bytes[0], bytes[1]]),
            month: bytes[2],
            day: bytes[3],
            weekday: bytes[4],
            hour: bytes[5],
            minute: bytes[6],
            second: bytes[7],
            nanosecond,
        })
    }
}

/// Encode DATE_AND_TIME (8 bytes BCD, millisecond resolution, 1990-2089).
pub fn encode_date_and_time(dt: &NaiveDateTime) -> Result<[u8; 8]> {
    let year = dt.year();
    if !(1990..=2089).contains(&year) {
        return Err(S7Error::invalid_value(format!(
            "DATE_AND_TIME year {year} out of range"
        )));
    }
    let millis = (dt.nanosecond() / 1_000_000).min(999);
    let weekday = dt.weekday().number_from_sunday() as u8;
    Ok([
        to_bcd((year % 100) as u8),
        to_bcd(dt.month() as u8),
        to_bcd(dt.day() as u8),
        to_bcd(dt.hour() as u8),
        to_bcd(dt.minute() as u8),
        to_bcd(dt.second() as u8),
        to_bcd((millis / 10) as u8),
        (((millis % 10) as u8) << 4) | weekday,
    ])
}

/// Decode DATE_AND_TIME. The weekday nibble is ignored.
pub fn decode_date_and_time(bytes: &[u8]) -> Result<NaiveDateTime> {
    expect_len(bytes, 8, "DATE_AND_TIME")?;
    let yy = i32::from(from_bcd(bytes[0])?);
    let year = if yy < 90 { 2000 + yy } else { 1900 + yy };
    let ms_low = bytes[7] >> 4;
    if ms_low > 9 {
        return Err(S7Error::decode("invalid DATE_AND_TIME milliseconds"));
    }
    let millis = u32::from(from_bcd(bytes[6])?) * 10 + u32::from(ms_low);

    NaiveDate::from_ymd_opt(
        year,
        u32::from(from_bcd(bytes[1])?),
        u32::from(from_bcd(bytes[2])?),
    )
    .and_then(|date| {
        date.and_hms_milli_opt(
            u32::from(from_bcd(bytes[3]).ok()?),
            u32::from(from_bcd(bytes[4]).ok()?),
            u32::from(from_bcd(bytes[5]).ok()?),
            millis,
        )
    })
    .ok_or_else(|| S7Error::decode(format!("invalid DATE_AND_TIME {bytes:02X?}")))
}

/// POINTER: data block number, area and bit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub db_number: u16,
    pub area: u8,
    pub byte_offset: u32,
    pub bit_offset: u8,
}

impl Pointer {
    /// Encoded size.
    pub const SIZE: usize = 6;

    /// Largest byte offset that fits the 24-bit address field.
    pub const MAX_BYTE_OFFSET: u32 = 0x1F_FFFF;

    /// Pointer into a data block.
    pub fn new(db_number: u16, byte_offset: u32, bit_offset: u8) -> Result<Self> {
        Self::with_area(db_number, AREA_DB, byte_offset, bit_offset)
    }

    /// Pointer into an arbitrary area.
    pub fn with_area(db_number: u16, area: u8, byte_offset: u32, bit_offset: u8) -> Result<Self> {
        if bit_offset > 7 {
            return Err(S7Error::invalid_value(format!("bit offset {bit_offset} > 7")));
        }
        if byte_offset > Self::MAX_BYTE_OFFSET {
            return Err(S7Error::invalid_value(format!(
                "byte offset {byte_offset} exceeds 24-bit address"
            )));
        }
        Ok(Self {
            db_number,
            area,
            byte_offset,
            bit_offset,
        })
    }

    /// Encode the 6-byte layout.
    pub fn to_bytes(&self) -> [u8; 6] {
        let address = (self.byte_offset << 3) | u32::from(self.bit_offset & 0x07);
        let db = self.db_number.to_be_bytes();
        let addr = address.to_be_bytes();
        [db[0], db[1], self.area, addr[1], addr[2], addr[3]]
    }

    /// Decode the 6-byte layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        expect_len(bytes, Self::SIZE, "POINTER")?;
        let address = u32::from_be_bytes([0, bytes[3], bytes[4], bytes[5]]);
        Ok(Self {
            db_number: u16::from_be_bytes([bytes[0], bytes[1]]),
            area: bytes[2],
            byte_offset: address >> 3,
            bit_offset: (address & 0x07) as u8,
        })
    }
}

/// ANY pointer: element type and repetition factor around a [`Pointer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnyPointer {
    pub syntax_id: u8,
    pub data_type: u8,
    pub repetition: u16,
    pub pointer: Pointer,
}

impl AnyPointer {
    /// Encoded size.
    pub const SIZE: usize = 10;

    pub fn new(data_type: u8, repetition: u16, pointer: Pointer) -> Self {
        Self {
            syntax_id: ANY_SYNTAX_ID,
            data_type,
            repetition,
            pointer,
        }
    }

    pub fn to_bytes(&self) -> [u8; 10] {
        let mut out = [0u8; 10];
        out[0] = self.syntax_id;
        out[1] = self.data_type;
        out[2..4].copy_from_slice(&self.repetition.to_be_bytes());
        out[4..10].copy_from_slice(&self.pointer.to_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        expect_len(bytes, Self::SIZE, "ANY")?;
        Ok(Self {
            syntax_id: bytes[0],
            data_type: bytes[1],
            repetition: u16::from_be_bytes([bytes[2], bytes[3]]),
            pointer: Pointer::from_bytes(&bytes[4..10])?,
        })
    }
}

/// STRING: Latin-1 text with a declared maximum length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S7String {
    pub max_len: u8,
    pub text: String,
}

impl S7String {
    pub fn new(max_len: u8, text: impl Into<String>) -> Self {
        Self {
            max_len,
            text: text.into(),
        }
    }

    /// Encode as max length, actual length and text padded to max length.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let latin1 = self
            .text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| S7Error::invalid_value("STRING accepts Latin-1 characters only"))?;
        if latin1.len() > usize::from(self.max_len) {
            return Err(S7Error::invalid_value(format!(
                "STRING length {} exceeds maximum {}",
                latin1.len(),
                self.max_len
            )));
        }
        let mut out = Vec::with_capacity(usize::from(self.max_len) + 2);
        out.push(self.max_len);
        out.push(latin1.len() as u8);
        out.extend_from_slice(&latin1);
        out.resize(usize::from(self.max_len) + 2, 0);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(S7Error::decode("STRING header truncated"));
        }
        let (max_len, act_len) = (bytes[0], usize::from(bytes[1]));
        if act_len > usize::from(max_len) || act_len > bytes.len() - 2 {
            return Err(S7Error::decode(format!(
                "STRING length {act_len} invalid for max {max_len}"
            )));
        }
        let text = bytes[2..2 + act_len].iter().map(|b| char::from(*b)).collect();
        Ok(Self { max_len, text })
    }
}

/// WSTRING: UTF-16 text with a declared maximum length in code units.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S7WString {
    pub max_len: u16,
    pub text: String,
}

impl S7WString {
    pub fn new(max_len: u16, text: impl Into<String>) -> Self {
        Self {
            max_len,
            text: text.into(),
        }
    }

    /// Encode as max length, actual length and code units padded to max length.
    pub fn to_words(&self) -> Result<Vec<u16>> {
        let units: Vec<u16> = self.text.encode_utf16().collect();
        if units.len() > usize::from(self.max_len) {
            return Err(S7Error::invalid_value(format!(
                "WSTRING length {} exceeds maximum {}",
                units.len(),
                self.max_len
            )));
        }
        let mut out = Vec::with_capacity(usize::from(self.max_len) + 2);
        out.push(self.max_len);
        out.push(units.len() as u16);
        out.extend_from_slice(&units);
        out.resize(usize::from(self.max_len) + 2, 0);
        Ok(out)
    }

    pub fn from_words(words: &[u16]) -> Result<Self> {
        if words.len() < 2 {
            return Err(S7Error::decode("WSTRING header truncated"));
        }
        let (max_len, act_len) = (words[0], usize::from(words[1]));
        if act_len > usize::from(max_len) || act_len > words.len() - 2 {
            return Err(S7Error::decode(format!(
                "WSTRING length {act_len} invalid for max {max_len}"
            )));
        }
        let text = String::from_utf16(&words[2..2 + act_len])
            .map_err(|e| S7Error::decode(format!("invalid WSTRING: {e}")))?;
        Ok(Self { max_len, text })
    }
}

/// A typed PLC variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum PlcValue {
    Bool(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
    LWord(u64),
    USInt(u8),
    SInt(i8),
    UInt(u16),
    Int(i16),
    UDInt(u32),
    DInt(i32),
    ULInt(u64),
    LInt(i64),
    Real(f32),
    LReal(f64),
    Char(u8),
    WChar(u16),
    String(S7String),
    WString(S7WString),
    /// Milliseconds.
    Time(i32),
    /// Nanoseconds.
    LTime(i64),
    S5Time(S5Time),
    Date(NaiveDate),
    TimeOfDay(NaiveTime),
    LTimeOfDay(NaiveTime),
    DateAndTime(NaiveDateTime),
    LDateAndTime(NaiveDateTime),
    Dtl(Dtl),
    Pointer(Pointer),
    Any(AnyPointer),
}

impl PlcValue {
    /// Softdatatype of this value.
    pub fn softdatatype(&self) -> Softdatatype {
        match self {
            Self::Bool(_) => Softdatatype::Bool,
            Self::Byte(_) => Softdatatype::Byte,
            Self::Word(_) => Softdatatype::Word,
            Self::DWord(_) => Softdatatype::DWord,
            Self::LWord(_) => Softdatatype::LWord,
            Self::USInt(_) => Softdatatype::USInt,
            Self::SInt(_) => Softdatatype::SInt,
            Self::UInt(_) => Softdatatype::UInt,
            Self::Int(_) => Softdatatype::Int,
            Self::UDInt(_) => Softdatatype::UDInt,
            Self::DInt(_) => Softdatatype::DInt,
            Self::ULInt(_) => Softdatatype::ULInt,
            Self::LInt(_) => Softdatatype::LInt,
            Self::Real(_) => Softdatatype::Real,
            Self::LReal(_) => Softdatatype::LReal,
            Self::Char(_) => Softdatatype::Char,
            Self::WChar(_) => Softdatatype::WChar,
            Self::String(_) => Softdatatype::String,
            Self::WString(_) => Softdatatype::WString,
            Self::Time(_) => Softdatatype::Time,
            Self::LTime(_) => Softdatatype::LTime,
            Self::S5Time(_) => Softdatatype::S5Time,
            Self::Date(_) => Softdatatype::Date,
            Self::TimeOfDay(_) => Softdatatype::TimeOfDay,
            Self::LTimeOfDay(_) => Softdatatype::LTimeOfDay,
            Self::DateAndTime(_) => Softdatatype::DateAndTime,
            Self::LDateAndTime(_) => Softdatatype::LDateAndTime,
            Self::Dtl(_) => Softdatatype::Dtl,
            Self::Pointer(_) => Softdatatype::Pointer,
            Self::Any(_) => Softdatatype::Any,
        }
    }

    /// Wire value used to write this variable.
    pub fn to_wire(&self) -> Result<Value> {
        let value = match self {
            Self::Bool(v) => Value::Bool(*v),
            Self::Byte(v) => Value::Byte(*v),
            Self::Word(v) => Value::Word(*v),
            Self::DWord(v) => Value::DWord(*v),
            Self::LWord(v) => Value::LWord(*v),
            Self::USInt(v) | Self::Char(v) => Value::USInt(*v),
            Self::SInt(v) => Value::SInt(*v),
            Self::UInt(v) | Self::WChar(v) => Value::UInt(*v),
            Self::Int(v) => Value::Int(*v),
            Self::UDInt(v) => Value::UDInt(*v),
            Self::DInt(v) | Self::Time(v) => Value::DInt(*v),
            Self::ULInt(v) => Value::ULInt(*v),
            Self::LInt(v) => Value::LInt(*v),
            Self::Real(v) => Value::Real(*v),
            Self::LReal(v) => Value::LReal(*v),
            Self::LTime(v) => Value::Timespan(*v),
            Self::S5Time(v) => Value::Word(v.to_word()),
            Self::Date(date) => {
                let days = date.signed_duration_since(NaiveDate::default()).num_days()
                    - DAYS_1970_TO_1990;
                let days = u16::try_from(days).map_err(|_| {
                    S7Error::invalid_value(format!("DATE {date} out of range"))
                })?;
                Value::UInt(days)
            }
            Self::TimeOfDay(time) => {
                Value::UDInt(
                    time.num_seconds_from_midnight() * 1000 + time.nanosecond() / 1_000_000,
                )
            }
            Self::LTimeOfDay(time) => Value::ULInt(
                u64::from(time.num_seconds_from_midnight()) * 1_000_000_000
                    + u64::from(time.nanosecond()),
            ),
            Self::LDateAndTime(dt) => {
                let nanos = dt
                    .signed_duration_since(NaiveDateTime::default())
                    .num_nanoseconds()
                    .and_then(|n| u64::try_from(n).ok())
                    .ok_or_else(|| S7Error::invalid_value(format!("LDT {dt} out of range")))?;
                Value::Timestamp(nanos)
            }
            Self::DateAndTime(dt) => Value::usint_array(&encode_date_and_time(dt)?),
            Self::Dtl(v) => Value::usint_array(&v.to_bytes()?),
            Self::String(v) => Value::usint_array(&v.to_bytes()?),
            Self::WString(v) => Value::uint_array(&v.to_words()?),
            Self::Pointer(v) => Value::usint_array(&v.to_bytes()),
            Self::Any(v) => Value::usint_array(&v.to_bytes()),
        };
        Ok(value)
    }

    /// Interpret a wire value received for a variable of type `softdatatype`.
    pub fn from_wire(softdatatype: Softdatatype, value: &Value) -> Result<Self> {
        let mismatch =
            || S7Error::decode(format!("{value:?} is not a valid {softdatatype} value"));

        let plc = match (softdatatype, value) {
            (Softdatatype::Bool, Value::Bool(v)) => Self::Bool(*v),
            (Softdatatype::Byte, Value::Byte(v)) => Self::Byte(*v),
            (Softdatatype::Word, Value::Word(v)) => Self::Word(*v),
            (Softdatatype::DWord, Value::DWord(v)) => Self::DWord(*v),
            (Softdatatype::LWord, Value::LWord(v)) => Self::LWord(*v),
            (Softdatatype::USInt, Value::USInt(v)) => Self::USInt(*v),
            (Softdatatype::SInt, Value::SInt(v)) => Self::SInt(*v),
            (Softdatatype::UInt, Value::UInt(v)) => Self::UInt(*v),
            (Softdatatype::Int, Value::Int(v)) => Self::Int(*v),
            (Softdatatype::UDInt, Value::UDInt(v)) => Self::UDInt(*v),
            (Softdatatype::DInt, Value::DInt(v)) => Self::DInt(*v),
            (Softdatatype::ULInt, Value::ULInt(v)) => Self::ULInt(*v),
            (Softdatatype::LInt, Value::LInt(v)) => Self::LInt(*v),
            (Softdatatype::Real, Value::Real(v)) => Self::Real(*v),
            (Softdatatype::LReal, Value::LReal(v)) => Self::LReal(*v),
            (Softdatatype::Char, Value::USInt(v)) => Self::Char(*v),
            (Softdatatype::WChar, Value::UInt(v)) => Self::WChar(*v),
            (Softdatatype::Time, Value::DInt(v)) => Self::Time(*v),
            (Softdatatype::LTime, Value::Timespan(v)) => Self::LTime(*v),
            (Softdatatype::S5Time, Value::Word(v)) => Self::S5Time(S5Time::from_word(*v)?),
            (Softdatatype::Date, Value::UInt(days)) => {
                let date = NaiveDate::default()
                    .checked_add_signed(Duration::days(DAYS_1970_TO_1990 + i64::from(*days)))
                    .ok_or_else(mismatch)?;
                Self::Date(date)
            }
            (Softdatatype::TimeOfDay, Value::UDInt(ms)) => {
                let time =
                    NaiveTime::from_num_seconds_from_midnight_opt(
                        ms / 1000,
                        (ms % 1000) * 1_000_000,
                    )
                        .ok_or_else(mismatch)?;
                Self::TimeOfDay(time)
            }
            (Softdatatype::LTimeOfDay, Value::ULInt(ns)) => {
                let secs = u32::try_from(ns / 1_000_000_000).map_err(|_| mismatch())?;
                let time = NaiveTime::from_num_seconds_from_midnight_opt(
                    secs,
                    (ns % 1_000_000_000) as u32,
                )
                .ok_or_else(mismatch)?;
                Self::LTimeOfDay(time)
            }
            (Softdatatype::LDateAndTime, Value::Timestamp(ns)) => {
                let nanos = i64::try_from(*ns).map_err(|_| mismatch())?;
                let dt = NaiveDateTime::default()
                    .checked_add_signed(Duration::nanoseconds(nanos))
                    .ok_or_else(mismatch)?;
                Self::LDateAndTime(dt)
            }
            (Softdatatype::DateAndTime, _) => {
                let bytes = value.as_byte_array().ok_or_else(mismatch)?;
                Self::DateAndTime(decode_date_and_time(&bytes)?)
            }
            (Softdatatype::Dtl, _) => {
                let bytes = value.as_byte_array().ok_or_else(mismatch)?;
                Self::Dtl(Dtl::from_bytes(&bytes)?)
            }
            (Softdatatype::String, _) => {
                let bytes = value.as_byte_array().ok_or_else(mismatch)?;
                Self::String(S7String::from_bytes(&bytes)?)
            }
            (Softdatatype::WString, _) => {
                let words = value.as_word_array().ok_or_else(mismatch)?;
                Self::WString(S7WString::from_words(&words)?)
            }
            (Softdatatype::Pointer, _) => {
                let bytes = value.as_byte_array().ok_or_else(mismatch)?;
                Self::Pointer(Pointer::from_bytes(&bytes)?)
            }
            (Softdatatype::Any, _) => {
                let bytes = value.as_byte_array().ok_or_else(mismatch)?;
                Self::Any(AnyPointer::from_bytes(&bytes)?)
            }
            _ => return Err(mismatch()),
        };
        Ok(plc)
    }
}
