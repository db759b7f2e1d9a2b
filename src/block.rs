use crate::{
    consts::{Block, Command, Token, BLOCK_CRC_SIZE, BLOCK_SIZE, FILLER},
    debug, error, trace, Clock, DataResponse, Error, ErrorFor, R1Status, SdCardSpi,
    SdCardSpiConfig,
};

use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

impl<Spi, Cs, Clk, Config> SdCardSpi<Spi, Cs, Clk, Config>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Clk: Clock,
    Config: SdCardSpiConfig,
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Read the block at `address` into `block`.
    pub fn read_block(&self, block: &mut Block, address: u32) -> Result<(), ErrorFor<Self>> {
        self.validate_no_multi_block_write()?;
        self.read_block_data(block, address)
    }

    /// Write `block` to `address`, returns once the card finished programming.
    pub fn write_block(&self, block: &Block, address: u32) -> Result<(), ErrorFor<Self>> {
        self.validate_no_multi_block_write()?;
        self.write_block_data(block, address)
    }

    /// Read consecutive blocks starting at `start_address`, one block per
    /// read command. `buf` length must be a multiple of [`BLOCK_SIZE`].
    ///
    /// Stops at the first failing block, blocks before it are already in `buf`.
    pub fn read_blocks(&self, buf: &mut [u8], start_address: u32) -> Result<(), ErrorFor<Self>> {
        self.validate_no_multi_block_write()?;
        let _count = Self::block_count(buf.len(), start_address)?;
        debug!("Read {} blocks @ {}", _count, start_address);

        for (chunk, address) in buf.chunks_exact_mut(BLOCK_SIZE).zip(start_address..) {
            self.read_block_data(chunk, address)?;
        }

        Ok(())
    }

    /// Write consecutive blocks starting at `start_address`, one block per
    /// write command. `buf` length must be a multiple of [`BLOCK_SIZE`].
    ///
    /// Stops at the first failing block, blocks before it stay written.
    pub fn write_blocks(&self, buf: &[u8], start_address: u32) -> Result<(), ErrorFor<Self>> {
        self.validate_no_multi_block_write()?;
        let _count = Self::block_count(buf.len(), start_address)?;
        debug!("Write {} blocks @ {}", _count, start_address);

        for (chunk, address) in buf.chunks_exact(BLOCK_SIZE).zip(start_address..) {
            self.write_block_data(chunk, address)?;
        }

        Ok(())
    }

    /// Open a multiple block write session at `start_address`.
    ///
    /// Chip select is released between the calls of the session.
    pub fn start_multi_block_write(&self, start_address: u32) -> Result<(), ErrorFor<Self>> {
        self.validate_no_multi_block_write()?;
        debug!("Start multiple block write @ {}", start_address);

        self.cs_scope(|s| {
            let r1 = s.send_command(
                Command::WriteMultipleBlock,
                start_address,
                Config::WAIT_READY_TIMEOUT_MS,
            )?;
            Self::check_r1(Command::WriteMultipleBlock, r1, R1Status::Ready)?;
            s.wait_ready(Config::WAIT_READY_TIMEOUT_MS)
        })?;

        self.multi_block_write.set(true);

        Ok(())
    }

    /// Write the next block of the open session.
    pub fn push_block(&self, block: &Block) -> Result<(), ErrorFor<Self>> {
        self.validate_multi_block_write()?;
        trace!("Push block");

        self.cs_scope(|s| {
            s.wait_ready(Config::WAIT_READY_TIMEOUT_MS)?;
            s.write_data(Token::StartMultipleWrite, block)?;
            s.wait_ready(Config::WAIT_READY_TIMEOUT_MS)
        })
    }

    /// Close the open session.
    pub fn stop_multi_block_write(&self) -> Result<(), ErrorFor<Self>> {
        self.validate_multi_block_write()?;
        debug!("Stop multiple block write");

        self.cs_scope(|s| {
            s.send(Token::StopTransmission.value())?;
            s.receive()?;
            s.wait_ready(Config::WAIT_READY_TIMEOUT_MS)
        })?;

        self.multi_block_write.set(false);

        Ok(())
    }

    /// Wait until the card is not busy.
    pub fn sync(&self) -> Result<(), ErrorFor<Self>> {
        self.cs_scope(|s| s.wait_ready(Config::WAIT_READY_TIMEOUT_MS))
    }

    /// Count of blocks in `buf_len` bytes from `start_address`, the range must
    /// fit the 32 bit address space.
    fn block_count(buf_len: usize, start_address: u32) -> Result<u32, ErrorFor<Self>> {
        if buf_len % BLOCK_SIZE != 0 {
            error!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, BLOCK_SIZE
            );
            return Err(Error::InvalidArgument);
        }

        let count = u32::try_from(buf_len / BLOCK_SIZE).map_err(|_| Error::InvalidArgument)?;

        start_address
            .checked_add(count)
            .map(|_| count)
            .ok_or(Error::InvalidArgument)
    }

    fn validate_multi_block_write(&self) -> Result<(), ErrorFor<Self>> {
        if self.multi_block_write.get() {
            Ok(())
        } else {
            Err(Error::BadState)
        }
    }

    fn validate_no_multi_block_write(&self) -> Result<(), ErrorFor<Self>> {
        if self.multi_block_write.get() {
            Err(Error::BadState)
        } else {
            Ok(())
        }
    }

    /// Read a single block.
    fn read_block_data(&self, buf: &mut [u8], address: u32) -> Result<(), ErrorFor<Self>> {
        trace!("Read block @ {}", address);

        self.cs_scope(|s| {
            let r1 = s.send_command(
                Command::ReadSingleBlock,
                address,
                Config::WAIT_READY_TIMEOUT_MS,
            )?;
            Self::check_r1(Command::ReadSingleBlock, r1, R1Status::Ready)?;

            s.wait_token(Token::StartBlock, Config::TOKEN_TIMEOUT_MS)?;
            s.receive_slice(buf)?;

            // CRC checking is off, the trailer is dropped.
            let mut crc = [FILLER; BLOCK_CRC_SIZE];
            s.receive_slice(&mut crc)
        })
    }

    /// Write a single block.
    fn write_block_data(&self, buf: &[u8], address: u32) -> Result<(), ErrorFor<Self>> {
        trace!("Write block @ {}", address);

        self.cs_scope(|s| {
            let r1 = s.send_command(Command::WriteBlock, address, Config::WAIT_READY_TIMEOUT_MS)?;
            Self::check_r1(Command::WriteBlock, r1, R1Status::Ready)?;

            s.write_data(Token::StartBlock, buf)?;
            s.wait_ready(Config::WAIT_READY_TIMEOUT_MS)
        })
    }

    /// Write data.
    fn write_data(&self, token: Token, data: &[u8]) -> Result<(), ErrorFor<Self>> {
        self.send(token.value())?;
        self.send_slice(data)?;
        self.send_slice(&[FILLER; BLOCK_CRC_SIZE])?;

        match DataResponse::from(self.receive()?) {
            DataResponse::Accepted => Ok(()),
            response => {
                error!("SD rejected block: {:?}", response);
                Err(Error::WriteRejected(response))
            }
        }
    }
}
