//! Frame and data checksums.
//!
//! The proxy firmware protects each reply with what it calls a CRC8, which is
//! really an additive byte sum. The CRC16 is the plain MSB-first variant used
//! for SPD block integrity.

/// Running sum of `bytes` modulo 256.
pub fn sum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// MSB-first, non-reflected CRC16 seeded at zero with no final XOR.
pub fn crc16(bytes: &[u8], polynomial: u16) -> u16 {
    let mut crc = 0u16;
    for &byte in bytes {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ polynomial
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// CRC16 with the CCITT polynomial used by SPD base configuration blocks.
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    const POLYNOMIAL: u16 = 0x1021;
    crc16(bytes, POLYNOMIAL)
}
