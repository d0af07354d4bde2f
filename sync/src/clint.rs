//! Software access to the CLINT: inter-processor interrupts and the machine
//! timer.

use crate::bus::HartBus;

pub const MSIP_OFFSET: u32 = 0x0000;
pub const MTIMECMP_OFFSET: u32 = 0x4000;
pub const MTIME_OFFSET: u32 = 0xbff8;

/// CLINT register block as seen from a hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clint {
    base: u32,
}

impl Clint {
    pub const fn at(base: u32) -> Self {
        Self { base }
    }

    fn msip(&self, hart: u32) -> u32 {
        self.base + MSIP_OFFSET + hart * 4
    }

    fn mtimecmp(&self, hart: u32) -> u32 {
        self.base + MTIMECMP_OFFSET + hart * 8
    }

    /// Raise the software interrupt of `hart`.
    pub fn send_ipi<B: HartBus + ?Sized>(&self, bus: &mut B, hart: u32) -> Result<(), B::Error> {
        log::trace!("hart {}: ipi -> hart {}", bus.hart_id(), hart);
        bus.store(self.msip(hart), 1)
    }

    /// Lower the software interrupt of `hart`. The flag is a level, it stays
    /// up until this is called.
    pub fn clear_ipi<B: HartBus + ?Sized>(&self, bus: &mut B, hart: u32) -> Result<(), B::Error> {
        bus.store(self.msip(hart), 0)
    }

    pub fn ipi_pending<B: HartBus + ?Sized>(&self, bus: &mut B, hart: u32) -> Result<bool, B::Error> {
        Ok(bus.load(self.msip(hart))? & 1 != 0)
    }

    /// Read the 64-bit timer with 32-bit loads.
    ///
    /// Retries until the high word is stable across the low word read.
    pub fn read_mtime<B: HartBus + ?Sized>(&self, bus: &mut B) -> Result<u64, B::Error> {
        let lo_addr = self.base + MTIME_OFFSET;
        let hi_addr = lo_addr + 4;
        loop {
            let hi = bus.load(hi_addr)?;
            let lo = bus.load(lo_addr)?;
            if bus.load(hi_addr)? == hi {
                return Ok(((hi as u64) << 32) | lo as u64);
            }
        }
    }

    /// Program the timer compare of `hart`.
    ///
    /// The low word is parked at all-ones first so no intermediate value can
    /// fire the interrupt early.
    pub fn set_timer<B: HartBus + ?Sized>(
        &self,
        bus: &mut B,
        hart: u32,
        deadline: u64,
    ) -> Result<(), B::Error> {
        let lo_addr = self.mtimecmp(hart);
        bus.store(lo_addr, u32::MAX)?;
        bus.store(lo_addr + 4, (deadline >> 32) as u32)?;
        bus.store(lo_addr, deadline as u32)
    }

    pub fn timer<B: HartBus + ?Sized>(&self, bus: &mut B, hart: u32) -> Result<u64, B::Error> {
        let lo = bus.load(self.mtimecmp(hart))?;
        let hi = bus.load(self.mtimecmp(hart) + 4)?;
        Ok(((hi as u64) << 32) | lo as u64)
    }
}
