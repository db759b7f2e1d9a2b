use crate::{
    consts::{Command, FRAME_SIZE},
    crc::crc7,
};

/// Command frame as it goes on the wire: command byte, big-endian argument
/// and CRC7 with the end bit.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; FRAME_SIZE]);

impl CommandFrame {
    /// End bit closing every frame.
    pub const END_BIT: u8 = 0x01;

    /// Builds the frame for `command` with `argument` in host order.
    pub fn new(command: Command, argument: u32) -> Self {
        let mut buf = [0; FRAME_SIZE];
        let crc_index = buf.len() - 1;

        buf[0] = command.frame_byte();
        buf[1..crc_index].copy_from_slice(&argument.to_be_bytes());
        buf[crc_index] = (crc7(&buf[..crc_index]) << 1) | Self::END_BIT;

        CommandFrame(buf)
    }

    /// Argument in host order.
    pub fn argument(&self) -> u32 {
        u32::from_be_bytes([self.0[1], self.0[2], self.0[3], self.0[4]])
    }

    /// Last byte: CRC7 shifted left with the end bit.
    pub fn crc(&self) -> u8 {
        self.0[FRAME_SIZE - 1]
    }

    /// Raw frame bytes.
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }
}
