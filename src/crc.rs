/// CRC-7 calculation, polynomial x^7 + x^3 + 1, MSB first.
///
/// Returns the bare 7 bit checksum in the low bits. Command frames place it
/// in the upper 7 bits of their last byte, next to
/// [`CommandFrame::END_BIT`](crate::CommandFrame::END_BIT).
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0;
    for mut byte in data.iter().cloned() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((byte & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            byte <<= 1;
        }
    }
    crc & 0x7F
}
