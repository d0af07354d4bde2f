//! Core Local Interruptor (CLINT): software interrupts, timer compares and the
//! shared machine timer.
//!
//! Register map (byte offsets from the CLINT base):
//!
//! | Offset | Register |
//! |---|---|
//! | `0x0000..=0x3ffc` | `msip[h]`, one word per hart, bit 0 used |
//! | `0x4000..=0xbff0` | `mtimecmp[h]`, 64 bit, low word at +0, high at +4 |
//! | `0xbff8` | `mtime`, 64 bit, low word at +0, high at +4 |
//!
//! Harts beyond the configured count and offsets that decode to nothing read
//! as zero and swallow writes; no error is raised for them.

use crate::bus::{merge_lanes, Device};
use crate::error::DeviceFault;
use crate::snapshot::ClintSnapshot;

pub const CLINT_SIZE: u32 = 0x1_0000;

pub const MSIP_OFFSET: u32 = 0x0000;
pub const MTIMECMP_OFFSET: u32 = 0x4000;
pub const MTIME_OFFSET: u32 = 0xbff8;

/// Maximum number of harts the register map has room for.
pub const MAX_HARTS: u32 = 4095;

/// Decoded register for an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Register {
    Msip(u32),
    Mtime { high: bool },
    Mtimecmp { hart: u32, high: bool },
}

impl Register {
    /// MSIP is matched first, then the fixed `mtime` pattern, and anything
    /// left is a timer compare.
    fn decode(offset: u32) -> Register {
        let offset = offset & !3;
        if offset < MTIMECMP_OFFSET {
            Register::Msip((offset - MSIP_OFFSET) / 4)
        } else if offset & !4 == MTIME_OFFSET {
            Register::Mtime {
                high: offset & 4 != 0,
            }
        } else {
            Register::Mtimecmp {
                hart: (offset - MTIMECMP_OFFSET) / 8,
                high: offset & 4 != 0,
            }
        }
    }
}

fn word(value: u64, high: bool) -> u32 {
    if high {
        (value >> 32) as u32
    } else {
        value as u32
    }
}

fn with_word(value: u64, high: bool, word: u32) -> u64 {
    if high {
        (value & 0x0000_0000_ffff_ffff) | ((word as u64) << 32)
    } else {
        (value & 0xffff_ffff_0000_0000) | word as u64
    }
}

pub struct Clint {
    /// Per-hart software interrupt flag.
    msip: Vec<bool>,
    /// Per-hart timer compare. Reset to 0, so every timer interrupt is
    /// pending right after reset.
    mtimecmp: Vec<u64>,
    mtime: u64,
    /// `mtime` was written on the current edge and must not increment.
    mtime_written: bool,
}

impl Clint {
    /// Create a CLINT for `num_harts` harts, clamped to [`MAX_HARTS`].
    pub fn with_harts(num_harts: u32) -> Self {
        let n = num_harts.min(MAX_HARTS) as usize;
        Self {
            msip: vec![false; n],
            mtimecmp: vec![0; n],
            mtime: 0,
            mtime_written: false,
        }
    }

    pub fn num_harts(&self) -> u32 {
        self.msip.len() as u32
    }

    /// Returns the current mtime value.
    #[inline]
    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    pub fn mtimecmp(&self, hart: u32) -> Option<u64> {
        self.mtimecmp.get(hart as usize).copied()
    }

    /// Software interrupt line of `hart` (`msip[h]`).
    #[inline]
    pub fn msw_irq(&self, hart: u32) -> bool {
        self.msip.get(hart as usize).copied().unwrap_or(false)
    }

    /// Timer interrupt line of `hart`: `mtime >= mtimecmp[h]`.
    #[inline]
    pub fn mtime_irq(&self, hart: u32) -> bool {
        self.mtimecmp
            .get(hart as usize)
            .is_some_and(|&cmp| self.mtime >= cmp)
    }

    /// Clock edge: advance `mtime` unless it was written on this edge.
    pub fn clock(&mut self) {
        if std::mem::take(&mut self.mtime_written) {
            return;
        }
        self.mtime = self.mtime.wrapping_add(1);
    }

    pub fn snapshot(&self) -> ClintSnapshot {
        ClintSnapshot {
            msip: self.msip.clone(),
            mtimecmp: self.mtimecmp.clone(),
            mtime: self.mtime,
        }
    }

    /// Restore register state. Harts missing from the snapshot keep their
    /// reset values; extra ones are dropped.
    pub fn restore(&mut self, snapshot: &ClintSnapshot) {
        for (dst, src) in self.msip.iter_mut().zip(&snapshot.msip) {
            *dst = *src;
        }
        for (dst, src) in self.mtimecmp.iter_mut().zip(&snapshot.mtimecmp) {
            *dst = *src;
        }
        self.mtime = snapshot.mtime;
        self.mtime_written = false;
    }
}

impl Device for Clint {
    fn load(&self, offset: u32) -> Result<u32, DeviceFault> {
        Ok(match Register::decode(offset) {
            Register::Msip(hart) => self.msw_irq(hart) as u32,
            Register::Mtime { high } => word(self.mtime, high),
            Register::Mtimecmp { hart, high } => self
                .mtimecmp
                .get(hart as usize)
                .map_or(0, |&cmp| word(cmp, high)),
        })
    }

    fn store(&mut self, offset: u32, value: u32, sel: u8) -> Result<(), DeviceFault> {
        match Register::decode(offset) {
            Register::Msip(hart) => {
                if let Some(flag) = self.msip.get_mut(hart as usize) {
                    let merged = merge_lanes(*flag as u32, value, sel);
                    *flag = merged & 1 != 0;
                    log::trace!("clint: msip[{}] = {}", hart, *flag);
                }
            }
            Register::Mtime { high } => {
                let merged = merge_lanes(word(self.mtime, high), value, sel);
                self.mtime = with_word(self.mtime, high, merged);
                self.mtime_written = true;
                log::trace!("clint: mtime = {:#x}", self.mtime);
            }
            Register::Mtimecmp { hart, high } => {
                if let Some(cmp) = self.mtimecmp.get_mut(hart as usize) {
                    let merged = merge_lanes(word(*cmp, high), value, sel);
                    *cmp = with_word(*cmp, high, merged);
                    log::trace!("clint: mtimecmp[{}] = {:#x}", hart, *cmp);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SEL_WORD;

    fn write(clint: &mut Clint, offset: u32, value: u32) {
        clint.store(offset, value, SEL_WORD).unwrap();
    }

    #[test]
    fn timer_pending_for_every_hart_after_reset() {
        for n in 1..=4 {
            let clint = Clint::with_harts(n);
            for h in 0..n {
                assert!(clint.mtime_irq(h));
                assert!(!clint.msw_irq(h));
            }
        }
    }

    #[test]
    fn test_store_msip() {
        let mut clint = Clint::with_harts(4);

        write(&mut clint, MSIP_OFFSET + 4, 1);
        assert!(clint.msw_irq(1));
        assert!(!clint.msw_irq(0));
        assert!(!clint.msw_irq(2));
        assert_eq!(clint.load(MSIP_OFFSET + 4).unwrap(), 1);

        // Level, not a pulse.
        clint.clock();
        clint.clock();
        assert!(clint.msw_irq(1));

        // Only bit 0 matters
        write(&mut clint, MSIP_OFFSET + 4, 0xfe);
        assert!(!clint.msw_irq(1));
        assert_eq!(clint.load(MSIP_OFFSET + 4).unwrap(), 0);
    }

    #[test]
    fn msip_lane_zero_disabled_is_ignored() {
        let mut clint = Clint::with_harts(1);
        clint.store(MSIP_OFFSET, 1, 0b1110).unwrap();
        assert!(!clint.msw_irq(0));
    }

    #[test]
    fn mtime_increments_once_per_tick() {
        let mut clint = Clint::with_harts(1);
        for expected in 1..=10 {
            clint.clock();
            assert_eq!(clint.mtime(), expected);
        }
    }

    #[test]
    fn mtime_write_replaces_increment() {
        let mut clint = Clint::with_harts(1);
        clint.clock();
        clint.clock();

        write(&mut clint, MTIME_OFFSET, 0x1000);
        clint.clock();
        assert_eq!(clint.mtime(), 0x1000);
        assert_eq!(clint.load(MTIME_OFFSET).unwrap(), 0x1000);

        clint.clock();
        assert_eq!(clint.mtime(), 0x1001);

        write(&mut clint, MTIME_OFFSET + 4, 0x2);
        clint.clock();
        assert_eq!(clint.mtime(), 0x2_0000_1001);
        assert_eq!(clint.load(MTIME_OFFSET + 4).unwrap(), 0x2);
    }

    #[test]
    fn test_store_mtimecmp_32bit_split() {
        let mut clint = Clint::with_harts(2);

        write(&mut clint, MTIMECMP_OFFSET + 8, 0xdead_beef);
        assert_eq!(clint.mtimecmp(1), Some(0x0000_0000_dead_beef));

        write(&mut clint, MTIMECMP_OFFSET + 12, 0xcafe_babe);
        assert_eq!(clint.mtimecmp(1), Some(0xcafe_babe_dead_beef));
        assert_eq!(clint.load(MTIMECMP_OFFSET + 8).unwrap(), 0xdead_beef);
        assert_eq!(clint.load(MTIMECMP_OFFSET + 12).unwrap(), 0xcafe_babe);
        assert_eq!(clint.mtimecmp(0), Some(0));
    }

    #[test]
    fn mtimecmp_write_lowers_and_reraises_timer_irq() {
        let mut clint = Clint::with_harts(2);
        for _ in 0..5 {
            clint.clock();
        }
        assert!(clint.mtime_irq(0));

        write(&mut clint, MTIMECMP_OFFSET, 10);
        assert!(!clint.mtime_irq(0));
        assert!(clint.mtime_irq(1));

        while clint.mtime() < 9 {
            clint.clock();
            assert!(!clint.mtime_irq(0));
        }
        clint.clock();
        assert_eq!(clint.mtime(), 10);
        assert!(clint.mtime_irq(0));
    }

    #[test]
    fn mtime_pattern_wins_over_mtimecmp() {
        assert_eq!(Register::decode(0xbff8), Register::Mtime { high: false });
        assert_eq!(Register::decode(0xbffc), Register::Mtime { high: true });
        assert_eq!(
            Register::decode(0xbff0),
            Register::Mtimecmp {
                hart: 4094,
                high: false
            }
        );
        assert_eq!(Register::decode(0x3ffc), Register::Msip(4095));
    }

    #[test]
    fn unimplemented_harts_read_zero_and_ignore_writes() {
        let mut clint = Clint::with_harts(2);

        write(&mut clint, MSIP_OFFSET + 8, 1);
        assert_eq!(clint.load(MSIP_OFFSET + 8).unwrap(), 0);
        assert!(!clint.msw_irq(2));

        write(&mut clint, MTIMECMP_OFFSET + 16, 7);
        assert_eq!(clint.load(MTIMECMP_OFFSET + 16).unwrap(), 0);
        assert_eq!(clint.mtimecmp(2), None);

        // Above the map: decodes as a timer compare of a missing hart.
        assert_eq!(clint.load(0xc000).unwrap(), 0);
        assert!(clint.store(0xfffc, 1, SEL_WORD).is_ok());
    }

    #[test]
    fn two_harts_timer_fires_once_at_tick_32() {
        let mut clint = Clint::with_harts(2);

        // Tick 1 carries the write.
        write(&mut clint, MTIMECMP_OFFSET, 32);
        clint.clock();
        let mut last = clint.mtime_irq(0);
        assert!(!last);

        let mut rises = Vec::new();
        for tick in 2..=32u64 {
            clint.clock();
            let now = clint.mtime_irq(0);
            if now && !last {
                rises.push(tick);
            }
            last = now;
        }
        assert_eq!(rises, vec![32]);
        assert!(!clint.msw_irq(0));
    }

    #[test]
    fn test_clint_snapshot_roundtrip() {
        let mut clint1 = Clint::with_harts(4);
        write(&mut clint1, MSIP_OFFSET, 1);
        write(&mut clint1, MSIP_OFFSET + 8, 1);
        write(&mut clint1, MTIMECMP_OFFSET + 8, 2000);
        for _ in 0..12 {
            clint1.clock();
        }

        let mut clint2 = Clint::with_harts(4);
        clint2.restore(&clint1.snapshot());

        assert_eq!(clint2.mtime(), 12);
        assert!(clint2.msw_irq(0));
        assert!(!clint2.msw_irq(1));
        assert!(clint2.msw_irq(2));
        assert_eq!(clint2.mtimecmp(1), Some(2000));
    }
}
