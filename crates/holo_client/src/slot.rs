//! Key to hash-slot mapping.
//!
//! A key's slot is CRC16/XMODEM of the key modulo `SLOT_COUNT`. When the key
//! contains a non-empty `{tag}`, only the tag is hashed, which lets callers
//! force related keys onto one node (needed for MULTI/EXEC blocks).

pub const SLOT_COUNT: u16 = 16384;

/// CRC16 with polynomial 0x1021, initial value 0, no reflection.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// The part of `key` that is hashed: the first non-empty `{...}` section, or
/// the whole key.
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

pub fn key_slot(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % SLOT_COUNT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(b""), 0);
    }

    #[test]
    fn known_slots() {
        assert_eq!(key_slot(b"foo"), 12182);
        assert_eq!(key_slot(b"bar"), 5061);
    }

    #[test]
    fn hash_tags_group_keys() {
        assert_eq!(hash_tag(b"{user1000}.following"), b"user1000");
        assert_eq!(
            key_slot(b"{user1000}.following"),
            key_slot(b"{user1000}.followers")
        );
        assert_eq!(key_slot(b"x{foo}y"), key_slot(b"foo"));
    }

    #[test]
    fn degenerate_tags_hash_the_whole_key() {
        assert_eq!(hash_tag(b"{}.key"), b"{}.key");
        assert_eq!(hash_tag(b"{unclosed"), b"{unclosed");
        // Only the first opening brace counts.
        assert_eq!(hash_tag(b"a{}{b}"), b"a{}{b}");
        assert_eq!(hash_tag(b"{{bar}}"), b"{bar");
    }
}
