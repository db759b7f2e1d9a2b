/// Size of a data block in bytes.
pub const BLOCK_SIZE: usize = 512;

/// A single data block.
pub type Block = [u8; BLOCK_SIZE];

/// Filler byte clocked out while the host only listens.
pub const FILLER: u8 = 0xFF;

/// Size of a command frame in bytes.
pub const FRAME_SIZE: usize = 6;

/// Size of the CRC16 trailer following every data block.
pub const BLOCK_CRC_SIZE: usize = 2;

/// Voltage range 2.7-3.6V plus check pattern for SEND_IF_COND.
pub const IF_COND_PATTERN: u32 = 0x0000_01AA;

/// Host capacity support bit for SD_SEND_OP_COND.
pub const HOST_CAPACITY_SUPPORT: u32 = 0x4000_0000;

/// Card capacity status bit of the OCR.
pub const OCR_CAPACITY_STATUS: u32 = 1 << 30;

/// SPI mode commands issued by the driver.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// CMD0 GO_IDLE_STATE - reset the card, enters SPI mode if CS is asserted.
    GoIdleState = 0,
    /// CMD8 SEND_IF_COND - verify SD Memory Card interface operating condition.
    SendIfCond = 8,
    /// CMD17 READ_SINGLE_BLOCK - read a single data block from the card.
    ReadSingleBlock = 17,
    /// CMD24 WRITE_BLOCK - write a single data block to the card.
    WriteBlock = 24,
    /// CMD25 WRITE_MULTIPLE_BLOCK - write blocks of data until a stop token.
    WriteMultipleBlock = 25,
    /// ACMD41 SD_SEND_OP_COND - sends host capacity support information and
    /// activates the card's initialization process. Must follow [`Command::AppCmd`].
    SendOpCond = 41,
    /// CMD55 APP_CMD - escape for application specific command.
    AppCmd = 55,
    /// CMD58 READ_OCR - read the OCR register of a card.
    ReadOcr = 58,
}

impl Command {
    /// Transmission bit that every command byte carries.
    pub const TRANSMISSION_BIT: u8 = 0x40;

    /// Command index (0..=63).
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// First byte of the command frame.
    pub const fn frame_byte(self) -> u8 {
        Self::TRANSMISSION_BIT | self.index()
    }
}

/// Data tokens framing a data block.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Token {
    /// Start of block for single block read/write and multiple block read.
    StartBlock = 0xFE,
    /// Start of block for multiple block write.
    StartMultipleWrite = 0xFC,
    /// Stop transmission of multiple block write.
    StopTransmission = 0xFD,
}

impl Token {
    /// Raw token value.
    pub const fn value(self) -> u8 {
        self as u8
    }
}
