use crate::consts::OCR_CAPACITY_STATUS;

use bitfield::bitfield;

bitfield! {
    /// R1 response bitset.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct R1Response(u8);
    impl Debug;
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illegal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
    pub busy, _: 7;
}

/// Single cause decoded from an R1 response.
///
/// Ordered by priority, the greatest variant wins when several flags are set.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum R1Status {
    /// No flags set, card is ready.
    Ready,
    /// Card is in idle state and running the initializing process.
    IdleState,
    /// Erase sequence was cleared before executing.
    EraseReset,
    /// Illegal command code was detected.
    IllegalCommand,
    /// CRC check of the last command failed.
    CommandCrcError,
    /// Error in the sequence of erase commands.
    EraseSequenceError,
    /// Misaligned address that did not match the block length.
    AddressError,
    /// Command argument was outside the allowed range.
    ParameterError,
    /// Start bit not cleared.
    Busy,
}

impl R1Response {
    /// Highest priority flag of the response.
    pub fn status(&self) -> R1Status {
        if self.busy() {
            R1Status::Busy
        } else if self.parameter_error() {
            R1Status::ParameterError
        } else if self.address_error() {
            R1Status::AddressError
        } else if self.erase_sequence_error() {
            R1Status::EraseSequenceError
        } else if self.command_crc_error() {
            R1Status::CommandCrcError
        } else if self.illegal_command() {
            R1Status::IllegalCommand
        } else if self.erase_reset() {
            R1Status::EraseReset
        } else if self.in_idle_state() {
            R1Status::IdleState
        } else {
            R1Status::Ready
        }
    }
}

impl From<u8> for R1Status {
    fn from(value: u8) -> Self {
        R1Response(value).status()
    }
}

impl R1Status {
    /// Whether a real error flag is set, idle state is not an error.
    pub fn is_error(self) -> bool {
        self > R1Status::IdleState
    }
}

bitfield! {
    /// Data error token sent by the card instead of a start block token.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct DataErrorToken(u8);
    impl Debug;
    pub error, _: 0;
    pub cc_error, _: 1;
    pub ecc_failed, _: 2;
    pub out_of_range, _: 3;
    pub card_locked, _: 4;
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for DataErrorToken {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "DataErrorToken({:#x})", self.0)
    }
}

impl DataErrorToken {
    /// Mask of the bits that must be clear in an error token.
    const HEADER_MASK: u8 = 0xE0;

    /// Decodes `byte` as an error token, `None` if it isn't one.
    pub fn parse(byte: u8) -> Option<Self> {
        if byte != 0 && byte & Self::HEADER_MASK == 0 {
            Some(DataErrorToken(byte))
        } else {
            None
        }
    }

    /// Raw token value.
    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Data response returned by the card after a written block.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataResponse {
    /// Data accepted.
    Accepted,
    /// Data rejected due to a CRC error.
    CrcError,
    /// Data rejected due to a write error.
    WriteError,
    /// Anything else, raw status nibble.
    Unknown(u8),
}

impl DataResponse {
    /// Mask for data response tokens after a write block operation.
    pub const MASK: u8 = 0x0F;
    /// Write data accepted token.
    pub const ACCEPTED: u8 = 0x05;
    /// Write data rejected, CRC error.
    pub const CRC_ERROR: u8 = 0x0B;
    /// Write data rejected, write error.
    pub const WRITE_ERROR: u8 = 0x0D;
}

impl From<u8> for DataResponse {
    fn from(value: u8) -> Self {
        match value & Self::MASK {
            Self::ACCEPTED => DataResponse::Accepted,
            Self::CRC_ERROR => DataResponse::CrcError,
            Self::WRITE_ERROR => DataResponse::WriteError,
            other => DataResponse::Unknown(other),
        }
    }
}

/// Card version detected by SEND_IF_COND.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardVersion {
    /// Card echoed the check pattern: SD version 2 or later.
    SdV2,
    /// MMC, SD version 1 or unknown.
    SdV1OrUnknown,
}

/// Capacity class reported by the OCR.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardCapacity {
    /// Standard capacity (SDSC).
    Standard,
    /// High or extended capacity (SDHC/SDXC).
    Extended,
}

impl CardCapacity {
    /// Classifies the OCR register value in host order.
    pub fn from_ocr(ocr: u32) -> Self {
        if ocr & OCR_CAPACITY_STATUS != 0 {
            CardCapacity::Extended
        } else {
            CardCapacity::Standard
        }
    }
}
