//! Variable addresses.

use bytes::{Buf, BytesMut};

use super::ids;
use super::vlq;
use crate::error::{Result, S7Error};

/// Address of a variable: access area, sub-area and LID chain.
///
/// `symbol_crc` is 0 for absolute addressing. LID order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ItemAddress {
    pub access_area: u32,
    pub symbol_crc: u32,
    pub access_sub_area: u32,
    pub lids: Vec<u32>,
}

impl ItemAddress {
    /// Create an address without LIDs.
    pub fn new(access_area: u32, access_sub_area: u32) -> Self {
        Self {
            access_area,
            access_sub_area,
            ..Default::default()
        }
    }

    /// Address of a variable inside data block `db_number`.
    pub fn data_block(db_number: u16, lids: &[u32]) -> Self {
        Self {
            access_area: ids::DB_ACCESS_AREA_BASE + u32::from(db_number),
            access_sub_area: ids::DB_VALUE_ACTUAL,
            lids: lids.to_vec(),
            ..Default::default()
        }
    }

    /// Address inside a controller area such as
    /// [`NATIVE_OBJECTS_THE_M_AREA_RID`](ids::NATIVE_OBJECTS_THE_M_AREA_RID).
    pub fn controller_area(area_rid: u32, lids: &[u32]) -> Self {
        Self {
            access_area: area_rid,
            access_sub_area: ids::CONTROLLER_AREA_VALUE_ACTUAL,
            lids: lids.to_vec(),
            ..Default::default()
        }
    }

    /// Append a LID.
    pub fn with_lid(mut self, lid: u32) -> Self {
        self.lids.push(lid);
        self
    }

    /// Set the symbol CRC.
    pub fn with_symbol_crc(mut self, crc: u32) -> Self {
        self.symbol_crc = crc;
        self
    }

    /// Number of VLQ fields [`encode`](Self::encode) writes.
    pub fn field_count(&self) -> u32 {
        4 + self.lids.len() as u32
    }

    /// Encode as `crc, area, lid_count + 1, sub_area, lids...`, all VLQ.
    pub fn encode(&self, buf: &mut BytesMut) {
        vlq::encode_u32(buf, self.symbol_crc);
        vlq::encode_u32(buf, self.access_area);
        vlq::encode_u32(buf, self.lids.len() as u32 + 1);
        vlq::encode_u32(buf, self.access_sub_area);
        for lid in &self.lids {
            vlq::encode_u32(buf, *lid);
        }
    }

    /// Decode the layout written by [`encode`](Self::encode).
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        let symbol_crc = vlq::decode_u32(buf)?;
        let access_area = vlq::decode_u32(buf)?;
        let count = vlq::decode_u32(buf)?;
        if count == 0 {
            return Err(S7Error::decode("item address without sub-area"));
        }
        let access_sub_area = vlq::decode_u32(buf)?;
        let mut lids = Vec::with_capacity((count as usize - 1).min(buf.remaining()));
        for _ in 1..count {
            lids.push(vlq::decode_u32(buf)?);
        }
        Ok(Self {
            access_area,
            symbol_crc,
            access_sub_area,
            lids,
        })
    }
}

impl std::fmt::Display for ItemAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:X}.{:X}", self.access_area, self.access_sub_area)?;
        for lid in &self.lids {
            write!(f, ".{lid:X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_block_address() {
        let address = ItemAddress::data_block(1, &[0xA, 0x1]);
        assert_eq!(address.access_area, 0x8A0E_0001);
        assert_eq!(address.access_sub_area, ids::DB_VALUE_ACTUAL);
        assert_eq!(address.field_count(), 6);
        assert_eq!(address.to_string(), "8A0E0001.9F6.A.1");
    }

    #[test]
    fn test_encode_layout() {
        let address = ItemAddress::new(0x52, 0x9F7).with_lid(3).with_symbol_crc(0);
        let mut buf = BytesMut::new();
        address.encode(&mut buf);
        assert_eq!(&buf[..], &[0x00, 0x52, 0x02, 0xF7, 0x13, 0x03]);

        let decoded = ItemAddress::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, address);
    }

    #[test]
    fn test_lid_order_is_kept() {
        let address = ItemAddress::data_block(5, &[3, 1, 2]);
        let mut buf = BytesMut::new();
        address.encode(&mut buf);
        let decoded = ItemAddress::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded.lids, vec![3, 1, 2]);
    }

    #[test]
    fn test_decode_rejects_zero_count() {
        assert!(ItemAddress::decode(&mut &[0x00, 0x01, 0x00][..]).is_err());
    }
}
