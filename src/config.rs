/// Represents config for [`SdCardSpi`](crate::SdCardSpi).
///
/// All timeouts are in milliseconds of the driver [`Clock`](crate::Clock).
pub trait SdCardSpiConfig {
    /// Window for the card to become ready before each initialization command.
    const INIT_WAIT_READY_TIMEOUT_MS: u32;
    /// Budget for the card to leave idle state under SD_SEND_OP_COND polling.
    const INIT_TIMEOUT_MS: u32;
    /// Window for the card to become ready during transfers.
    const WAIT_READY_TIMEOUT_MS: u32;
    /// Window for a command response.
    const COMMAND_TIMEOUT_MS: u32;
    /// Window for the start block token of a read.
    const TOKEN_TIMEOUT_MS: u32;
}

/// Default implementation of [`SdCardSpiConfig`](crate::SdCardSpiConfig).
#[derive(Debug)]
pub struct DefaultSdCardSpiConfig;

impl SdCardSpiConfig for DefaultSdCardSpiConfig {
    const INIT_WAIT_READY_TIMEOUT_MS: u32 = 65;
    const INIT_TIMEOUT_MS: u32 = 5_000;
    const WAIT_READY_TIMEOUT_MS: u32 = 1_000;
    const COMMAND_TIMEOUT_MS: u32 = 1_000;
    const TOKEN_TIMEOUT_MS: u32 = 1_000;
}
