//! Alarm text library walk.
//!
//! The text library object carries an offset area and a string area. The
//! offset area holds three levels of count-prefixed tables, all little-endian,
//! with offsets relative to the start of the offset area:
//!
//! ```text
//! table 1: count:u16 (relation_id:u32 table2:u32)*
//! table 2: count:u16 (alid:u16 table3:u32)*
//! table 3: count:u16 (kind:u8 string:u32)*
//! string:  len:u16 utf8[len]
//! ```
//!
//! Kind 0 is the info text, 1 the alarm text and 2..=10 the additional
//! texts 1 to 9. Kind 255 stores two raw words in place of the offset.

use std::collections::BTreeMap;

use tracing::warn;

use super::records::cpu_alarm_id;
use crate::error::{Result, S7Error};
use crate::types::wire::{self, le};

pub const TEXT_KIND_INFOTEXT: u8 = 0;
pub const TEXT_KIND_ALARM_TEXT: u8 = 1;
pub const TEXT_KIND_ADDITIONAL_FIRST: u8 = 2;
pub const TEXT_KIND_ADDITIONAL_LAST: u8 = 10;
pub const TEXT_KIND_RAW: u8 = 255;

const TABLE1_ENTRY: usize = 8;
const TABLE2_ENTRY: usize = 6;
const TABLE3_ENTRY: usize = 5;

/// Texts of one alarm.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AlarmTexts {
    pub infotext: Option<String>,
    pub alarm_text: Option<String>,
    pub additional_texts: [Option<String>; 9],
    pub raw: Option<(u16, u16)>,
}

fn table_count(area: &[u8], offset: usize) -> Option<u16> {
    le::read_u16(&mut area.get(offset..)?).ok()
}

fn read_string(strings: &[u8], offset: usize) -> Option<String> {
    let mut data = strings.get(offset..)?;
    let len = le::read_u16(&mut data).ok()?;
    let bytes = wire::read_bytes(&mut data, usize::from(len)).ok()?;
    String::from_utf8(bytes.to_vec()).ok()
}

fn resolve_texts(offsets: &[u8], strings: &[u8], table3: usize) -> Option<AlarmTexts> {
    let count = table_count(offsets, table3)?;
    let mut texts = AlarmTexts::default();
    for i in 0..usize::from(count) {
        let mut entry = offsets.get(table3 + 2 + i * TABLE3_ENTRY..)?;
        let kind = wire::read_u8(&mut entry).ok()?;
        if kind == TEXT_KIND_RAW {
            let first = le::read_u16(&mut entry).ok()?;
            let second = le::read_u16(&mut entry).ok()?;
            texts.raw = Some((first, second));
            continue;
        }
        let offset = le::read_u32(&mut entry).ok()? as usize;
        let Some(text) = read_string(strings, offset) else {
            warn!(kind, offset, "alarm text string unresolved");
            continue;
        };
        match kind {
            TEXT_KIND_INFOTEXT => texts.infotext = Some(text),
            TEXT_KIND_ALARM_TEXT => texts.alarm_text = Some(text),
            TEXT_KIND_ADDITIONAL_FIRST..=TEXT_KIND_ADDITIONAL_LAST => {
                texts.additional_texts[usize::from(kind - TEXT_KIND_ADDITIONAL_FIRST)] = Some(text);
            }
            _ => warn!(kind, "unknown alarm text kind"),
        }
    }
    Some(texts)
}

/// Walk the text library tables.
///
/// Returns the texts keyed by CPU alarm id. Only an unreadable first table is
/// an error; entries whose offsets do not resolve are skipped.
pub fn resolve(offsets: &[u8], strings: &[u8]) -> Result<BTreeMap<u64, AlarmTexts>> {
    let count = table_count(offsets, 0)
        .ok_or_else(|| S7Error::decode("text library offset area too short"))?;
    let mut texts = BTreeMap::new();

    for i in 0..usize::from(count) {
        let Some(mut entry) = offsets.get(2 + i * TABLE1_ENTRY..) else {
            warn!(index = i, "text library table truncated");
            break;
        };
        let (Ok(relation_id), Ok(table2)) = (le::read_u32(&mut entry), le::read_u32(&mut entry))
        else {
            warn!(index = i, "text library table truncated");
            break;
        };
        let table2 = table2 as usize;
        let Some(alarms) = table_count(offsets, table2) else {
            warn!(relation_id, table2, "alarm table unresolved");
            continue;
        };

        for j in 0..usize::from(alarms) {
            let entry = offsets
                .get(table2 + 2 + j * TABLE2_ENTRY..)
                .and_then(|mut entry| {
                    let alid = le::read_u16(&mut entry).ok()?;
                    let table3 = le::read_u32(&mut entry).ok()?;
                    Some((alid, table3 as usize))
                });
            let Some((alid, table3)) = entry else {
                warn!(relation_id, index = j, "alarm table truncated");
                break;
            };
            match resolve_texts(offsets, strings, table3) {
                Some(alarm_texts) => {
                    texts.insert(cpu_alarm_id(relation_id, alid), alarm_texts);
                }
                None => warn!(relation_id, alid, table3, "alarm texts unresolved"),
            }
        }
    }
    Ok(texts)
}
