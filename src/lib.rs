//! SD Memory Card block driver written in Embedded Rust, that inspired by [embedded-sdmmc](https://crates.io/crates/embedded-sdmmc).
//!
//! This crate brings a card out of reset over the SPI bus and then reads and
//! writes its 512 byte blocks.
//!
//! ```no_run
//! use sdcard_spi::{Block, DefaultSdCardSpiConfig, SdCardSpi};
//! # use core::convert::Infallible;
//! # struct Spi;
//! # impl embedded_hal::blocking::spi::Transfer<u8> for Spi {
//! #     type Error = Infallible;
//! #     fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Infallible> { Ok(words) }
//! # }
//! # struct Cs;
//! # impl switch_hal::OutputSwitch for Cs {
//! #     type Error = Infallible;
//! #     fn on(&mut self) -> Result<(), Infallible> { Ok(()) }
//! #     fn off(&mut self) -> Result<(), Infallible> { Ok(()) }
//! # }
//! # fn ticks() -> u32 { 0 }
//! let card: SdCardSpi<_, _, _, DefaultSdCardSpiConfig> = SdCardSpi::new(Spi, Cs, ticks);
//! let info = card.init().unwrap();
//!
//! let mut block: Block = [0; 512];
//! card.read_block(&mut block, 0).unwrap();
//! card.write_block(&block, 1).unwrap();
//! ```
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log` crate.
//! * `defmt-log`: By turning off the default features and enabling the
//!   `defmt-log` feature you can configure this crate to log messages over defmt
//!   instead.
//!
//! You cannot enable both the `log` feature and the `defmt-log` feature.

#![cfg_attr(not(test), no_std)]

#[cfg(test)]
#[macro_use]
extern crate hex_literal;

mod block;
mod clock;
mod config;
mod consts;
mod crc;
mod frame;
mod init;
mod response;

pub use crate::{
    clock::Clock,
    config::{DefaultSdCardSpiConfig, SdCardSpiConfig},
    consts::{Block, Command, Token, BLOCK_SIZE},
    crc::crc7,
    frame::CommandFrame,
    init::CardInfo,
    response::{CardCapacity, CardVersion, DataErrorToken, DataResponse, R1Status},
};
pub use diskio::{
    BlockSize, DiskioDevice, Error as DiskioError, IoctlCmd, Lba, Status, StatusFlag,
};

use crate::consts::FILLER;

use core::{
    cell::{Cell, RefCell},
    marker::PhantomData,
};
use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, error, info, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, info, trace, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but does nothing at all
macro_rules! debug {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::error! but does nothing at all
macro_rules! error {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::info! but does nothing at all
macro_rules! info {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::trace! but does nothing at all
macro_rules! trace {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but does nothing at all
macro_rules! warn {
    ($($arg:tt)+) => {};
}

/// [`SdCardSpi`] result error.
///
/// `T` - transport error type.
/// `S` - select switch type.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<T, S> {
    /// Transport failed while sending to the card.
    Transmit(T),
    /// Transport failed while clocking in from the card.
    Receive(T),
    /// Couldn't set a select.
    SelectError(S),
    /// Card stayed busy for the whole wait window.
    TimeoutWaitReady,
    /// No response when executing this command.
    TimeoutCommand(Command),
    /// No data token in time.
    TimeoutToken(Token),
    /// Card didn't leave idle state within the initialization budget.
    TimeoutInitialization,
    /// Card answered the command with an unexpected status.
    ErrorCommand(Command, R1Status),
    /// Card sent a data error token instead of a data block.
    DataError(DataErrorToken),
    /// Card sent a byte that is neither the expected token nor an error token.
    UnexpectedToken(u8),
    /// Card rejected a written block.
    WriteRejected(DataResponse),
    /// Buffer length or block range is unusable.
    InvalidArgument,
    /// Can't perform this operation in the current state.
    BadState,
}

/// Classification of [`Error`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A bounded poll exceeded its window.
    Timeout,
    /// Transport failure while transmitting.
    Transmit,
    /// Transport failure while receiving.
    Receive,
    /// Card replied with an error token or an unexpected byte.
    Protocol,
    /// Card reported a failure flag in a response.
    Card,
    /// Chip select failure.
    Select,
    /// Invalid call from the caller.
    Usage,
}

impl<T, S> Error<T, S> {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transmit(_) => ErrorKind::Transmit,
            Error::Receive(_) => ErrorKind::Receive,
            Error::SelectError(_) => ErrorKind::Select,
            Error::TimeoutWaitReady
            | Error::TimeoutCommand(_)
            | Error::TimeoutToken(_)
            | Error::TimeoutInitialization => ErrorKind::Timeout,
            Error::ErrorCommand(..) | Error::WriteRejected(_) => ErrorKind::Card,
            Error::DataError(_) | Error::UnexpectedToken(_) => ErrorKind::Protocol,
            Error::InvalidArgument | Error::BadState => ErrorKind::Usage,
        }
    }

    /// Whether a poll window ran out.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

/// Error type alias.
type ErrorFor<T> = <T as DiskioDevice>::HardwareError;

/// SD Card SPI driver.
///
/// `Spi` - SPI.
/// `Cs` - Chip select output switch, `on` asserts the card.
/// `Clk` - Millisecond tick source.
/// `Config` - Config implementation of driver config trait.
///
/// The driver owns the bus and takes `&self` everywhere, mutability is
/// handled with inner `RefCell`s, so it can't be shared between threads.
pub struct SdCardSpi<Spi, Cs, Clk, Config = DefaultSdCardSpiConfig>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Clk: Clock,
    Config: SdCardSpiConfig,
{
    spi: RefCell<Spi>,
    cs: RefCell<Cs>,
    clock: Clk,
    status: Status,
    multi_block_write: Cell<bool>,
    config: PhantomData<Config>,
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
    /// Creates a new [`SdCardSpi<Spi, Cs, Clk, Config>`].
    ///
    /// `spi` - SPI instance.
    /// `cs` - chip select output switch.
    /// `clock` - millisecond tick source.
    pub fn new(spi: Spi, cs: Cs, clock: Clk) -> Self {
        SdCardSpi {
            spi: RefCell::new(spi),
            cs: RefCell::new(cs),
            clock,
            status: StatusFlag::NotInitialized.into(),
            multi_block_write: Cell::new(false),
            config: PhantomData::<Config>,
        }
    }

    /// Releases the bus, chip select and clock.
    pub fn free(self) -> (Spi, Cs, Clk) {
        (self.spi.into_inner(), self.cs.into_inner(), self.clock)
    }

    /// Validate buffer for read/write.
    fn validate_buffer_len(buf_len: usize) -> Result<(), DiskioError<ErrorFor<Self>>> {
        if buf_len == 0 || buf_len % BLOCK_SIZE != 0 {
            error!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, BLOCK_SIZE
            );
            Err(DiskioError::InvalidArgument)
        } else {
            Ok(())
        }
    }

    /// Validate initialized.
    fn validate_initialized(&self) -> Result<(), DiskioError<ErrorFor<Self>>> {
        if self.status.contains(StatusFlag::NotInitialized) {
            Err(DiskioError::NotInitialized)
        } else {
            Ok(())
        }
    }

    /// Activate chip select.
    fn select(&self) -> Result<(), ErrorFor<Self>> {
        self.cs.borrow_mut().on().map_err(Error::SelectError)
    }

    /// Deactivate chip select.
    fn unselect(&self) -> Result<(), ErrorFor<Self>> {
        self.cs.borrow_mut().off().map_err(Error::SelectError)
    }

    /// CS scope. Chip select is released whatever `f` returns, the first
    /// failure wins.
    fn cs_scope<T, F>(&self, f: F) -> Result<T, ErrorFor<Self>>
    where
        F: FnOnce(&Self) -> Result<T, ErrorFor<Self>>,
    {
        self.select()?;
        let result = f(self);
        let released = self.unselect();
        let value = result?;
        released?;

        Ok(value)
    }

    /// Send one byte and receive one byte.
    fn transfer(&self, data: u8) -> Result<u8, Spi::Error> {
        self.spi.borrow_mut().transfer(&mut [data]).map(|b| b[0])
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    fn receive(&self) -> Result<u8, ErrorFor<Self>> {
        self.transfer(FILLER).map_err(Error::Receive)
    }

    /// Send a byte to the SD card.
    fn send(&self, data: u8) -> Result<(), ErrorFor<Self>> {
        self.transfer(data).map(|_| ()).map_err(Error::Transmit)
    }

    /// Receive a slice from the SD card in one transfer.
    fn receive_slice(&self, data: &mut [u8]) -> Result<(), ErrorFor<Self>> {
        data.fill(FILLER);
        self.spi
            .borrow_mut()
            .transfer(data)
            .map(|_| ())
            .map_err(Error::Receive)
    }

    /// Send a slice to the SD card.
    fn send_slice(&self, data: &[u8]) -> Result<(), ErrorFor<Self>> {
        for byte in data.iter() {
            self.send(*byte)?;
        }

        Ok(())
    }

    /// Clocks in bytes until `token_validator` accepts one or `timeout_ms`
    /// elapses. The bus is sampled at least once.
    fn wait_for_token<F: Fn(u8) -> bool>(
        &self,
        timeout_ms: u32,
        token_validator: F,
        error: ErrorFor<Self>,
    ) -> Result<u8, ErrorFor<Self>> {
        let start = self.clock.now_ms();

        loop {
            let token = self.receive()?;

            if token_validator(token) {
                return Ok(token);
            }

            if self.clock.elapsed_ms(start) >= timeout_ms {
                return Err(error);
            }
        }
    }

    /// Wait until the card stops holding the bus busy.
    ///
    /// Any byte other than 0xFF means busy, never an error.
    fn wait_ready(&self, timeout_ms: u32) -> Result<(), ErrorFor<Self>> {
        self.wait_for_token(timeout_ms, |token| token == FILLER, Error::TimeoutWaitReady)
            .map(|_| ())
    }

    /// Wait for `token` to start a data block.
    fn wait_token(&self, token: Token, timeout_ms: u32) -> Result<(), ErrorFor<Self>> {
        let received =
            self.wait_for_token(timeout_ms, |byte| byte != FILLER, Error::TimeoutToken(token))?;

        if received == token.value() {
            Ok(())
        } else {
            warn!("Expected token 0x{:02x}, got 0x{:02x}", token.value(), received);
            Err(DataErrorToken::parse(received)
                .map_or(Error::UnexpectedToken(received), Error::DataError))
        }
    }

    /// Read R1 response of `command`.
    fn read_r1(&self, command: Command, timeout_ms: u32) -> Result<R1Status, ErrorFor<Self>> {
        self.wait_for_token(
            timeout_ms,
            |byte| byte != FILLER,
            Error::TimeoutCommand(command),
        )
        .map(R1Status::from)
    }

    /// Read R7/R3 response of `command`, returns the argument in host order.
    ///
    /// The argument bytes are always clocked in once a status arrived, even
    /// when the status carries an error, to keep the stream aligned.
    fn read_r7(&self, command: Command, timeout_ms: u32) -> Result<u32, ErrorFor<Self>> {
        let r1 = self.read_r1(command, timeout_ms)?;

        let mut argument = [FILLER; 4];
        self.receive_slice(&mut argument)?;

        if r1.is_error() {
            return Err(Error::ErrorCommand(command, r1));
        }

        Ok(u32::from_be_bytes(argument))
    }

    /// Wait for the card and send the command frame.
    fn send_frame(
        &self,
        command: Command,
        argument: u32,
        ready_timeout_ms: u32,
    ) -> Result<(), ErrorFor<Self>> {
        let frame = CommandFrame::new(command, argument);
        trace!("CMD{} 0x{:08x}", command.index(), argument);

        self.wait_ready(ready_timeout_ms)?;
        self.send_slice(frame.as_bytes())
    }

    /// Send command and read its R1 response.
    fn send_command(
        &self,
        command: Command,
        argument: u32,
        ready_timeout_ms: u32,
    ) -> Result<R1Status, ErrorFor<Self>> {
        self.send_frame(command, argument, ready_timeout_ms)?;
        self.read_r1(command, Config::COMMAND_TIMEOUT_MS)
    }

    /// Require `r1` to be `expected`.
    fn check_r1(
        command: Command,
        r1: R1Status,
        expected: R1Status,
    ) -> Result<(), ErrorFor<Self>> {
        if r1 == expected {
            Ok(())
        } else {
            warn!("Wrong response from CMD{}: {:?}", command.index(), r1);
            Err(Error::ErrorCommand(command, r1))
        }
    }
}

impl<Spi, Cs, Clk, Config> DiskioDevice for SdCardSpi<Spi, Cs, Clk, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Clk: Clock,
    Config: SdCardSpiConfig,
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    type HardwareError = Error<Spi::Error, Cs::Error>;

    fn status(&self) -> Status {
        self.status
    }

    fn reset(&mut self) {
        info!("SD reset invoked");
        self.status = StatusFlag::NotInitialized.into();
        self.multi_block_write.set(false);
    }

    fn initialize(&mut self) -> Result<(), DiskioError<Self::HardwareError>> {
        if !self.status.contains(StatusFlag::NotInitialized) {
            warn!("SD already is initialized");
            return Err(DiskioError::AlreadyInitialized);
        }

        match self.init() {
            Ok(_) => {
                self.status = Status::default();
                Ok(())
            }
            Err(err) => {
                self.status = StatusFlag::ErrorOccured | StatusFlag::NotInitialized;
                Err(DiskioError::Hardware(err))
            }
        }
    }

    fn read(&self, buf: &mut [u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Self::validate_buffer_len(buf.len())?;
        self.validate_initialized()?;

        let address = u32::try_from(lba).map_err(|_| DiskioError::InvalidArgument)?;
        self.read_blocks(buf, address).map_err(DiskioError::Hardware)
    }

    fn write(&self, buf: &[u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Self::validate_buffer_len(buf.len())?;
        self.validate_initialized()?;

        let address = u32::try_from(lba).map_err(|_| DiskioError::InvalidArgument)?;
        self.write_blocks(buf, address).map_err(DiskioError::Hardware)
    }

    fn ioctl(&self, cmd: IoctlCmd) -> Result<(), DiskioError<Self::HardwareError>> {
        match cmd {
            IoctlCmd::CtrlSync => self.sync().map_err(DiskioError::Hardware),
            IoctlCmd::GetBlockSize(block_size) => {
                *block_size = BLOCK_SIZE;
                Ok(())
            }
            _ => Err(DiskioError::NotSupported),
        }
    }
}
