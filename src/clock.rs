/// Monotonic millisecond tick source used to bound polling.
///
/// The counter may wrap, elapsed time is computed with wrapping arithmetic.
/// Any `Fn() -> u32` closure is a clock, so a HAL tick getter can be passed
/// directly.
pub trait Clock {
    /// Current tick in milliseconds.
    fn now_ms(&self) -> u32;

    /// Milliseconds elapsed since `start`.
    fn elapsed_ms(&self, start: u32) -> u32 {
        self.now_ms().wrapping_sub(start)
    }
}

impl<F> Clock for F
where
    F: Fn() -> u32,
{
    fn now_ms(&self) -> u32 {
        self()
    }
}
