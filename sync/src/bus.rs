//! The hart's view of the bus.

/// Interrupt lines a hart exposes upward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HartInterrupts {
    /// Machine timer interrupt (`mtime >= mtimecmp[hart]`).
    pub timer: bool,
    /// Machine software interrupt (`msip[hart]`).
    pub software: bool,
    /// External interrupt, driven from outside the fabric.
    pub external: bool,
}

impl HartInterrupts {
    #[inline]
    pub fn any(&self) -> bool {
        self.timer || self.software || self.external
    }
}

/// Bus operations available to software running on one hart.
///
/// Each call is one instruction on the hart: it blocks the calling hart's
/// instruction stream until the transaction ends with an ack or an error.
/// Errors are returned as-is and never retried.
pub trait HartBus {
    type Error;

    /// Hart id (`mhartid`).
    fn hart_id(&self) -> u32;

    /// Plain 32-bit load.
    fn load(&mut self, addr: u32) -> Result<u32, Self::Error>;

    /// Plain 32-bit store.
    fn store(&mut self, addr: u32, value: u32) -> Result<(), Self::Error>;

    /// Reserved load (first half of a reserve / conditional-store pair).
    ///
    /// Sets the atomic-hold on this hart's bus gateway until the next request.
    fn load_reserved(&mut self, addr: u32) -> Result<u32, Self::Error>;

    /// Conditional store (second half of the pair). Bypasses any local cache.
    ///
    /// Returns `true` when the store was performed.
    fn store_conditional(&mut self, addr: u32, value: u32) -> Result<bool, Self::Error>;

    /// One no-op instruction, used to relax bus utilization while spinning.
    fn relax(&mut self) -> Result<(), Self::Error>;

    /// Sample the hart's interrupt lines.
    fn interrupts(&mut self) -> Result<HartInterrupts, Self::Error>;

    /// Stall until any interrupt line is asserted, then return the lines.
    fn wait_for_interrupt(&mut self) -> Result<HartInterrupts, Self::Error>;

    /// Atomic swap built from a reserve / conditional-store pair.
    ///
    /// Stores `value` unconditionally and returns the previous contents.
    fn amo_swap(&mut self, addr: u32, value: u32) -> Result<u32, Self::Error> {
        loop {
            let old = self.load_reserved(addr)?;
            if self.store_conditional(addr, value)? {
                return Ok(old);
            }
        }
    }
}
