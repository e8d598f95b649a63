//! Modbus RTU CRC-16 (polynomial 0xA001, reflected, init 0xFFFF)

/// Calculate CRC16 checksum (Modbus RTU standard)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Append the CRC of `frame` low byte first
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check a frame whose last two bytes are its CRC
pub fn verify_crc(frame: &[u8]) -> bool {
    frame.len() > 2 && crc16(frame) == 0
}
