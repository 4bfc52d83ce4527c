//! Cluster hash slots.
//!
//! Keys map to one of 16384 slots via CRC16 (XMODEM) of the key, or of the
//! hash tag when the key contains a non-empty `{...}` section.

/// Number of hash slots in a cluster.
pub const SLOT_COUNT: u16 = 16384;

/// Slot index in `0..SLOT_COUNT`.
pub type SlotId = u16;

const CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut idx = 0;
    while idx < 256 {
        let mut crc = (idx as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
            bit += 1;
        }
        table[idx] = crc;
        idx += 1;
    }
    table
}

/// CRC16/XMODEM as used by the server for slot assignment.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        let index = ((crc >> 8) ^ byte as u16) as usize & 0xff;
        (crc << 8) ^ CRC16_TABLE[index]
    })
}

/// Portion of the key that is hashed.
///
/// Only the first `{` and the first `}` after it count; an empty tag means
/// the whole key is hashed.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// Slot owning `key`.
pub fn hash_slot(key: &[u8]) -> SlotId {
    crc16(hash_tag(key)) % SLOT_COUNT
}
