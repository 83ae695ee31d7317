//! Checksum calculation for Modbus RTU frames
//!
//! CRC-16/Modbus: polynomial 0x8005 (reflected 0xA001), init 0xFFFF,
//! RefIn/RefOut true, XorOut 0x0000. Transmitted low byte first.

/// Size of the CRC trailer on the wire
pub const CRC_LEN: usize = 2;

/// CRC-16/Modbus
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Append the CRC of `frame` to itself (low byte first)
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16_modbus(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// CRC carried in the last two bytes of `frame`
pub fn trailing_crc(frame: &[u8]) -> Option<u16> {
    match frame {
        [.., lo, hi] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

/// Verify a frame whose last two bytes are its CRC
pub fn verify_crc(frame: &[u8]) -> bool {
    match trailing_crc(frame) {
        Some(received) => crc16_modbus(&frame[..frame.len() - CRC_LEN]) == received,
        None => false,
    }
}
