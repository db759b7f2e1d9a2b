use crate::{
    consts::{Command, FILLER, HOST_CAPACITY_SUPPORT, IF_COND_PATTERN},
    error, info, warn, CardCapacity, CardVersion, Clock, Error, ErrorFor, R1Status, SdCardSpi,
    SdCardSpiConfig,
};

use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Card properties found by [`SdCardSpi::init`].
///
/// The driver doesn't keep them, track them if block addressing matters to you.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardInfo {
    /// Version detected by SEND_IF_COND, advisory only.
    pub version: CardVersion,
    /// Capacity class from the OCR.
    pub capacity: CardCapacity,
}

impl<Spi, Cs, Clk, Config> SdCardSpi<Spi, Cs, Clk, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Clk: Clock,
    Config: SdCardSpiConfig,
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Init sequence size, at least 74 clock cycles.
    const INIT_SET_SIZE: usize = 10;

    /// Initialize SD.
    ///
    /// Runs the power-up script once: reset to idle, interface condition,
    /// SD_SEND_OP_COND polling and OCR readout. Nothing is retried, the
    /// first failing step aborts the sequence with its error.
    pub fn init(&self) -> Result<CardInfo, ErrorFor<Self>> {
        info!("SD initialize started");

        self.unselect()?;

        for _ in 0..Self::INIT_SET_SIZE {
            self.send(FILLER)?;
        }

        let result = self.cs_scope(|s| {
            s.go_idle_state()?;
            let version = s.send_if_cond()?;
            s.send_op_cond()?;
            let capacity = s.read_ocr()?;

            Ok(CardInfo { version, capacity })
        });

        match &result {
            Ok(_info) => {
                info!(
                    "SD successfully initialized, version: {:?}, capacity: {:?}",
                    _info.version, _info.capacity
                );
            }
            Err(_err) => {
                error!("Failed to initialize SD: {:?}", _err.kind());
            }
        }

        result
    }

    /// Enter SD to SPI mode.
    fn go_idle_state(&self) -> Result<(), ErrorFor<Self>> {
        info!("Enter to SPI mode for SD");

        let r1 = self.send_command(
            Command::GoIdleState,
            0x0000_0000,
            Config::INIT_WAIT_READY_TIMEOUT_MS,
        )?;

        Self::check_r1(Command::GoIdleState, r1, R1Status::IdleState)
    }

    /// Verify SD Memory Card interface operating condition.
    ///
    /// The result doesn't change the rest of the sequence.
    fn send_if_cond(&self) -> Result<CardVersion, ErrorFor<Self>> {
        info!("Verifying SD Memory Card interface operating condition");

        self.send_frame(
            Command::SendIfCond,
            IF_COND_PATTERN,
            Config::INIT_WAIT_READY_TIMEOUT_MS,
        )?;

        match self.read_r7(Command::SendIfCond, Config::COMMAND_TIMEOUT_MS) {
            Ok(IF_COND_PATTERN) => {
                info!("SD card type: SD v2");
                Ok(CardVersion::SdV2)
            }
            Ok(_) | Err(Error::ErrorCommand(..)) => {
                warn!("SD card type: MMC, SD v1 or unknown");
                Ok(CardVersion::SdV1OrUnknown)
            }
            Err(err) => Err(err),
        }
    }

    /// Sends host capacity support information and activates, until the card
    /// leaves idle state or the init budget runs out.
    fn send_op_cond(&self) -> Result<(), ErrorFor<Self>> {
        info!("Sending host capacity support information and activates");

        let start = self.clock.now_ms();

        loop {
            let r1 = self.send_command(
                Command::AppCmd,
                0x0000_0000,
                Config::INIT_WAIT_READY_TIMEOUT_MS,
            )?;
            Self::check_r1(Command::AppCmd, r1, R1Status::IdleState)?;

            match self.send_command(
                Command::SendOpCond,
                HOST_CAPACITY_SUPPORT,
                Config::INIT_WAIT_READY_TIMEOUT_MS,
            )? {
                R1Status::Ready => return Ok(()),
                R1Status::IdleState => {}
                _r1 => {
                    warn!("Unexpected response from ACMD41: {:?}", _r1);
                }
            }

            if self.clock.elapsed_ms(start) > Config::INIT_TIMEOUT_MS {
                return Err(Error::TimeoutInitialization);
            }
        }
    }

    /// Read OCR and classify the card capacity.
    ///
    /// SET_BLOCKLEN is never sent, blocks are 512 bytes for every class.
    fn read_ocr(&self) -> Result<CardCapacity, ErrorFor<Self>> {
        self.send_frame(
            Command::ReadOcr,
            0x0000_0000,
            Config::INIT_WAIT_READY_TIMEOUT_MS,
        )?;

        let ocr = self.read_r7(Command::ReadOcr, Config::COMMAND_TIMEOUT_MS)?;
        let capacity = CardCapacity::from_ocr(ocr);

        match capacity {
            CardCapacity::Standard => {
                info!("SD card standard capacity");
            }
            CardCapacity::Extended => {
                info!("SD card extended capacity");
            }
        }

        Ok(capacity)
    }
}
