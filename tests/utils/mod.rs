//! Useful library code for tests

#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    convert::Infallible,
    rc::Rc,
};

use embedded_hal::blocking::spi::Transfer;
use sdcard_spi::{Block, Clock, DefaultSdCardSpiConfig, SdCardSpi, BLOCK_SIZE};
use switch_hal::OutputSwitch;

/// OCR of a powered up card, capacity status cleared.
pub const OCR_READY: u32 = 0x80FF_8000;
/// OCR capacity status bit.
pub const OCR_CCS: u32 = 0x4000_0000;

/// Driver over the fake card.
pub type Card = SdCardSpi<FakeSpi, FakeCs, FakeClock, DefaultSdCardSpiConfig>;

/// Error injected by [`FakeSpi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeSpiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Collecting a command frame.
    Command,
    /// Single block write, waiting for the start token.
    WriteToken { address: u32 },
    /// Multiple block write session, waiting for a token.
    MultiWrite { address: u32 },
    /// Collecting a data block and its CRC.
    WriteData { address: u32, multiple: bool },
}

/// Behaviour and recorded traffic of the emulated card.
#[derive(Debug)]
pub struct CardState {
    /// R1 sent to GO_IDLE_STATE.
    pub go_idle_response: u8,
    /// Card rejects SEND_IF_COND as illegal.
    pub v1: bool,
    /// Card reports capacity status in the OCR.
    pub high_capacity: bool,
    /// SD_SEND_OP_COND polls until the card leaves idle, `None` never.
    pub ready_after: Option<usize>,
    /// Commands answered before the card goes silent, `None` answers all.
    pub answer_limit: Option<usize>,
    /// Bytes following the illegal command R1 of a v1 card to SEND_IF_COND.
    pub v1_if_cond_trailer: Vec<u8>,
    /// R1 sent to APP_CMD in place of the card's state.
    pub app_command_response: Option<u8>,
    /// Card holds the bus low whenever selected.
    pub always_busy: bool,
    /// Byte sent in place of the start block token on reads.
    pub read_token: u8,
    /// Data response sent after a written block.
    pub data_response: u8,
    /// Busy bytes after a written block or a stop token.
    pub write_busy: usize,
    /// Transfers fail once this many bytes were exchanged.
    pub fail_after: Option<usize>,

    pub selected: bool,
    /// Bytes exchanged so far, selected or not.
    pub exchanges: usize,
    /// Exchange that carried the last data response.
    pub data_response_at: Option<usize>,
    /// Commands seen as (index, argument).
    pub commands: Vec<(u8, u32)>,
    /// Driver clock reading when each command frame completed.
    pub command_ticks: Vec<u32>,
    pub blocks: HashMap<u32, Block>,

    pub(crate) wire: Wire,
}

/// Internal protocol state of the emulated card.
#[derive(Debug)]
pub struct Wire {
    clock: FakeClock,
    idle: bool,
    app_command: bool,
    op_cond_polls: usize,
    phase: Phase,
    frame: Vec<u8>,
    data: Vec<u8>,
    pending_data_response: bool,
    out: VecDeque<u8>,
}

impl Default for Wire {
    fn default() -> Self {
        Wire {
            clock: FakeClock::default(),
            idle: true,
            app_command: false,
            op_cond_polls: 0,
            phase: Phase::Command,
            frame: Vec::new(),
            data: Vec::new(),
            pending_data_response: false,
            out: VecDeque::new(),
        }
    }
}

impl Default for CardState {
    fn default() -> Self {
        CardState {
            go_idle_response: 0x01,
            v1: false,
            high_capacity: true,
            ready_after: Some(3),
            answer_limit: None,
            v1_if_cond_trailer: Vec::new(),
            app_command_response: None,
            always_busy: false,
            read_token: 0xFE,
            data_response: 0xE5,
            write_busy: 2,
            fail_after: None,
            selected: false,
            exchanges: 0,
            data_response_at: None,
            commands: Vec::new(),
            command_ticks: Vec::new(),
            blocks: HashMap::new(),
            wire: Wire::default(),
        }
    }
}

impl CardState {
    /// Command indices in the order they were received.
    pub fn command_indices(&self) -> Vec<u8> {
        self.commands.iter().map(|(index, _)| *index).collect()
    }

    fn exchange(&mut self, mosi: u8) -> u8 {
        if !self.selected {
            return 0xFF;
        }

        if self.always_busy {
            return 0x00;
        }

        let miso = if self.wire.pending_data_response {
            self.wire.pending_data_response = false;
            self.data_response_at = Some(self.exchanges);
            self.wire
                .out
                .extend(std::iter::repeat(0x00).take(self.write_busy));
            self.data_response
        } else {
            self.wire.out.pop_front().unwrap_or(0xFF)
        };

        self.accept(mosi);

        miso
    }

    fn accept(&mut self, mosi: u8) {
        match self.wire.phase {
            Phase::Command => {
                if self.wire.frame.is_empty() && mosi & 0xC0 != 0x40 {
                    return;
                }

                self.wire.frame.push(mosi);

                if self.wire.frame.len() == 6 {
                    let frame = std::mem::take(&mut self.wire.frame);
                    let argument = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
                    self.command(frame[0] & 0x3F, argument);
                }
            }
            Phase::WriteToken { address } => {
                if mosi == 0xFE {
                    self.wire.phase = Phase::WriteData {
                        address,
                        multiple: false,
                    };
                }
            }
            Phase::MultiWrite { address } => match mosi {
                0xFC => {
                    self.wire.phase = Phase::WriteData {
                        address,
                        multiple: true,
                    };
                }
                0xFD => {
                    self.wire.out.push_back(0xFF);
                    self.wire
                        .out
                        .extend(std::iter::repeat(0x00).take(self.write_busy));
                    self.wire.phase = Phase::Command;
                }
                _ => {}
            },
            Phase::WriteData { address, multiple } => {
                self.wire.data.push(mosi);

                if self.wire.data.len() == BLOCK_SIZE + 2 {
                    let data = std::mem::take(&mut self.wire.data);

                    if self.data_response & 0x1F == 0x05 {
                        let mut block = [0; BLOCK_SIZE];
                        block.copy_from_slice(&data[..BLOCK_SIZE]);
                        self.blocks.insert(address, block);
                    }

                    self.wire.pending_data_response = true;
                    self.wire.phase = if multiple {
                        Phase::MultiWrite {
                            address: address + 1,
                        }
                    } else {
                        Phase::Command
                    };
                }
            }
        }
    }

    fn command(&mut self, index: u8, argument: u32) {
        self.commands.push((index, argument));
        self.command_ticks.push(self.wire.clock.ticks());

        if self
            .answer_limit
            .map_or(false, |limit| self.commands.len() > limit)
        {
            return;
        }

        let app_command = std::mem::replace(&mut self.wire.app_command, false);
        let r1 = if self.wire.idle { 0x01 } else { 0x00 };

        match index {
            0 => {
                self.wire.idle = true;
                self.wire.op_cond_polls = 0;
                self.wire.out.extend([0xFF, self.go_idle_response]);
            }
            8 if self.v1 => {
                self.wire.out.push_back(0x05);
                self.wire.out.extend(self.v1_if_cond_trailer.iter().copied());
            }
            8 => {
                self.wire.out.push_back(r1);
                self.wire.out.extend(argument.to_be_bytes());
            }
            55 => {
                self.wire.app_command = true;
                self.wire
                    .out
                    .push_back(self.app_command_response.unwrap_or(r1));
            }
            41 if app_command => {
                self.wire.op_cond_polls += 1;
                if self
                    .ready_after
                    .map_or(false, |polls| self.wire.op_cond_polls >= polls)
                {
                    self.wire.idle = false;
                }
                let r1 = if self.wire.idle { 0x01 } else { 0x00 };
                self.wire.out.push_back(r1);
            }
            58 => {
                let ocr = if self.high_capacity {
                    OCR_READY | OCR_CCS
                } else {
                    OCR_READY
                };
                self.wire.out.push_back(r1);
                self.wire.out.extend(ocr.to_be_bytes());
            }
            17 => {
                self.wire.out.extend([0x00, 0xFF, 0xFF, self.read_token]);
                if self.read_token == 0xFE {
                    let block = self
                        .blocks
                        .get(&argument)
                        .copied()
                        .unwrap_or([0; BLOCK_SIZE]);
                    self.wire.out.extend(block);
                    self.wire.out.extend([0xA5, 0x5A]);
                }
            }
            24 => {
                self.wire.out.push_back(0x00);
                self.wire.phase = Phase::WriteToken { address: argument };
            }
            25 => {
                self.wire.out.push_back(0x00);
                self.wire.phase = Phase::MultiWrite { address: argument };
            }
            _ => self.wire.out.push_back(r1 | 0x04),
        }
    }
}

/// SPI bus wired to the emulated card.
pub struct FakeSpi {
    state: Rc<RefCell<CardState>>,
}

impl Transfer<u8> for FakeSpi {
    type Error = FakeSpiError;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        let mut state = self.state.borrow_mut();

        for word in words.iter_mut() {
            if state.fail_after.map_or(false, |n| state.exchanges >= n) {
                return Err(FakeSpiError);
            }

            *word = state.exchange(*word);
            state.exchanges += 1;
        }

        Ok(words)
    }
}

/// Chip select of the emulated card, `on` selects.
pub struct FakeCs {
    state: Rc<RefCell<CardState>>,
}

impl OutputSwitch for FakeCs {
    type Error = Infallible;

    fn on(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().selected = true;
        Ok(())
    }

    fn off(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().selected = false;
        Ok(())
    }
}

/// Clock that advances one millisecond each time it is read.
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    ticks: Rc<Cell<u32>>,
}

impl FakeClock {
    /// Current tick, without advancing.
    pub fn ticks(&self) -> u32 {
        self.ticks.get()
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u32 {
        let now = self.ticks.get();
        self.ticks.set(now.wrapping_add(1));
        now
    }
}

/// Handles to inspect the emulated card while the driver owns it.
pub struct Harness {
    pub state: Rc<RefCell<CardState>>,
    pub clock: FakeClock,
}

impl Harness {
    pub fn exchanges(&self) -> usize {
        self.state.borrow().exchanges
    }

    pub fn selected(&self) -> bool {
        self.state.borrow().selected
    }

    pub fn block(&self, address: u32) -> Option<Block> {
        self.state.borrow().blocks.get(&address).copied()
    }
}

/// Builds a driver over a card configured by `state`.
pub fn make_card(mut state: CardState) -> (Card, Harness) {
    let _ = env_logger::builder().is_test(true).try_init();

    let clock = FakeClock::default();
    state.wire.clock = clock.clone();
    let state = Rc::new(RefCell::new(state));
    let card = SdCardSpi::new(
        FakeSpi {
            state: state.clone(),
        },
        FakeCs {
            state: state.clone(),
        },
        clock.clone(),
    );

    (card, Harness { state, clock })
}

/// Builds a driver over an SDHC card that is already initialized.
pub fn make_initialized_card() -> (Card, Harness) {
    let (card, harness) = make_card(CardState::default());
    card.init().expect("init card");
    harness.state.borrow_mut().commands.clear();

    (card, harness)
}

/// Deterministic block contents.
pub fn pattern_block(seed: u32) -> Block {
    let mut block = [0; BLOCK_SIZE];
    let mut x = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    for byte in block.iter_mut() {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        *byte = x as u8;
    }
    block
}
