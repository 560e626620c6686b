use std::fmt;

use crate::binlog::BinlogError;

/// Fixed part of a record before the payload: size, id, type, flags, extra.
pub const HEADER_SIZE: usize = 28;
/// CRC32 trailer.
pub const TAIL_SIZE: usize = 4;
pub const MIN_SIZE: usize = HEADER_SIZE + TAIL_SIZE;
pub const MAX_SIZE: usize = 1 << 20;

/// Reserved service record types; user records are non-negative.
pub const TYPE_HEADER: i32 = -1;
/// Tombstone: a rewrite of this type erases the target record.
pub const TYPE_EMPTY: i32 = -2;
pub const TYPE_AES_CTR_ENCRYPTION: i32 = -3;

/// The record replaces the earlier record with the same id.
pub const FLAG_REWRITE: i32 = 1;
/// The record is buffered and commits together with the next
/// non-partial record.
pub const FLAG_PARTIAL: i32 = 2;

/// One self-delimited log record. `raw` always holds the complete encoded
/// form, checksum included; the struct fields mirror its header.
#[derive(Clone)]
pub struct BinlogEvent {
    pub id: u64,
    pub type_: i32,
    pub flags: i32,
    pub extra: u64,
    raw: Vec<u8>,
    /// File offset one past this record, assigned during replay.
    pub offset: i64,
}

impl BinlogEvent {
    pub fn new(id: u64, type_: i32, flags: i32, extra: u64, data: &[u8]) -> BinlogEvent {
        let size = HEADER_SIZE + data.len() + TAIL_SIZE;
        assert!(
            data.len() % 4 == 0 && size <= MAX_SIZE,
            "bad binlog event payload size {}",
            data.len()
        );

        let mut raw = Vec::with_capacity(size);
        raw.extend_from_slice(&(size as u32).to_le_bytes());
        raw.extend_from_slice(&id.to_le_bytes());
        raw.extend_from_slice(&type_.to_le_bytes());
        raw.extend_from_slice(&flags.to_le_bytes());
        raw.extend_from_slice(&extra.to_le_bytes());
        raw.extend_from_slice(data);
        let crc = crc32fast::hash(&raw);
        raw.extend_from_slice(&crc.to_le_bytes());

        BinlogEvent {
            id,
            type_,
            flags,
            extra,
            raw,
            offset: 0,
        }
    }

    /// Parse and validate a complete encoded record.
    pub fn from_raw(raw: Vec<u8>) -> Result<BinlogEvent, BinlogError> {
        if raw.len() < MIN_SIZE || raw.len() > MAX_SIZE || raw.len() % 4 != 0 {
            return Err(BinlogError::Corruption(format!(
                "bad event size {}",
                raw.len()
            )));
        }
        let size = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        if size != raw.len() {
            return Err(BinlogError::Corruption(format!(
                "size field {} does not match record length {}",
                size,
                raw.len()
            )));
        }

        let crc_offset = raw.len() - TAIL_SIZE;
        let stored_crc = u32::from_le_bytes([
            raw[crc_offset],
            raw[crc_offset + 1],
            raw[crc_offset + 2],
            raw[crc_offset + 3],
        ]);
        let crc = crc32fast::hash(&raw[..crc_offset]);
        if crc != stored_crc {
            return Err(BinlogError::Corruption(format!(
                "crc mismatch: stored {:08x}, computed {:08x}",
                stored_crc, crc
            )));
        }

        let id = u64::from_le_bytes([
            raw[4], raw[5], raw[6], raw[7], raw[8], raw[9], raw[10], raw[11],
        ]);
        let type_ = i32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]);
        let flags = i32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]);
        let extra = u64::from_le_bytes([
            raw[20], raw[21], raw[22], raw[23], raw[24], raw[25], raw[26], raw[27],
        ]);

        Ok(BinlogEvent {
            id,
            type_,
            flags,
            extra,
            raw,
            offset: 0,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.raw[HEADER_SIZE..self.raw.len() - TAIL_SIZE]
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn is_rewrite(&self) -> bool {
        self.flags & FLAG_REWRITE != 0
    }

    pub fn is_partial(&self) -> bool {
        self.flags & FLAG_PARTIAL != 0
    }

    pub fn is_service(&self) -> bool {
        self.type_ < 0
    }

    /// Patch a flag bit out of the encoded form, fixing the checksum.
    pub(crate) fn clear_flag(&mut self, flag: i32) {
        if self.flags & flag == 0 {
            return;
        }
        self.flags &= !flag;
        self.raw[16..20].copy_from_slice(&self.flags.to_le_bytes());
        let crc_offset = self.raw.len() - TAIL_SIZE;
        let crc = crc32fast::hash(&self.raw[..crc_offset]);
        self.raw[crc_offset..].copy_from_slice(&crc.to_le_bytes());
    }
}

impl fmt::Debug for BinlogEvent {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("BinlogEvent")
            .field("id", &self.id)
            .field("type", &self.type_)
            .field("flags", &self.flags)
            .field("extra", &self.extra)
            .field("data_len", &self.data().len())
            .field("offset", &self.offset)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let event = BinlogEvent::new(7, 1, 0, 99, b"abcd");
        assert_eq!(event.size(), MIN_SIZE + 4);

        let parsed = BinlogEvent::from_raw(event.raw().to_vec()).unwrap();
        assert_eq!(parsed.id, 7);
        assert_eq!(parsed.type_, 1);
        assert_eq!(parsed.extra, 99);
        assert_eq!(parsed.data(), b"abcd");
    }

    #[test]
    fn minimum_record() {
        let event = BinlogEvent::new(1, 0, 0, 0, b"");
        assert_eq!(event.size(), MIN_SIZE);
        assert!(BinlogEvent::from_raw(event.raw().to_vec()).is_ok());
    }

    #[test]
    fn crc_mismatch() {
        let event = BinlogEvent::new(1, 0, 0, 0, b"abcd");
        let mut raw = event.raw().to_vec();
        raw[HEADER_SIZE] ^= 0xff;
        assert!(matches!(
            BinlogEvent::from_raw(raw),
            Err(BinlogError::Corruption(_))
        ));
    }

    #[test]
    fn clear_rewrite_keeps_record_valid() {
        let mut event = BinlogEvent::new(3, 5, FLAG_REWRITE, 0, b"12345678");
        event.clear_flag(FLAG_REWRITE);
        assert!(!event.is_rewrite());
        let parsed = BinlogEvent::from_raw(event.raw().to_vec()).unwrap();
        assert_eq!(parsed.flags, 0);
    }
}
