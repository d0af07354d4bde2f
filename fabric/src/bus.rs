//! Bus signals and the shared system bus.
//!
//! Cores talk to their gateways with [`BusRequest`]s that are strobed for a
//! single tick. Gateways drive [`BusSignals`] towards the shared bus, which
//! hands the bus to one core port at a time and answers with a registered
//! [`BusResponse`] one or more ticks later.

use crate::clint::{Clint, CLINT_SIZE};
use crate::config::FabricConfig;
use crate::dram::Dram;
use crate::error::DeviceFault;
use crate::gpio::{Gpio, GPIO_SIZE};
use serde::{Deserialize, Serialize};

/// Base of the instruction memory window.
pub const IMEM_BASE: u32 = 0x0000_0000;
pub const IMEM_SIZE: u32 = 0x1000;
/// Default RAM base.
pub const RAM_BASE: u32 = 0x8000_0000;
pub const RAM_SIZE: u32 = 0x1_0000;
/// Default CLINT base (same as the `virt` platform).
pub const CLINT_BASE: u32 = 0x0200_0000;
pub const GPIO_BASE: u32 = 0x1000_0000;

/// All four byte lanes.
pub const SEL_WORD: u8 = 0b1111;

/// A core's request, as issued towards its gateway.
///
/// `stb` is high for exactly one tick per logical transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusRequest {
    pub addr: u32,
    pub data: u32,
    pub we: bool,
    pub sel: u8,
    pub stb: bool,
    /// Reserve marker: reserved load or conditional store.
    pub rvso: bool,
}

impl BusRequest {
    pub const IDLE: BusRequest = BusRequest {
        addr: 0,
        data: 0,
        we: false,
        sel: 0,
        stb: false,
        rvso: false,
    };

    pub fn read(addr: u32) -> Self {
        Self {
            addr,
            sel: SEL_WORD,
            stb: true,
            ..Self::IDLE
        }
    }

    pub fn write(addr: u32, data: u32) -> Self {
        Self {
            addr,
            data,
            we: true,
            sel: SEL_WORD,
            stb: true,
            rvso: false,
        }
    }

    pub fn reserved_read(addr: u32) -> Self {
        Self {
            rvso: true,
            ..Self::read(addr)
        }
    }

    pub fn conditional_write(addr: u32, data: u32) -> Self {
        Self {
            rvso: true,
            ..Self::write(addr, data)
        }
    }

    /// First half of a reserve / conditional-write pair.
    #[inline]
    pub fn is_reserved_read(&self) -> bool {
        self.rvso && !self.we
    }
}

/// Response to a transaction. Both flags low means still pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusResponse {
    pub ack: bool,
    pub err: bool,
    pub data: u32,
}

impl BusResponse {
    pub const IDLE: BusResponse = BusResponse {
        ack: false,
        err: false,
        data: 0,
    };

    pub fn ack(data: u32) -> Self {
        Self {
            ack: true,
            err: false,
            data,
        }
    }

    pub fn error() -> Self {
        Self {
            ack: false,
            err: true,
            data: 0,
        }
    }

    /// The transaction ended this tick.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.ack || self.err
    }
}

/// Signals a master drives onto the shared bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusSignals {
    /// Bus cycle: the master wants (or keeps) the bus.
    pub cyc: bool,
    /// Transfer strobe: a transaction is presented this tick.
    pub stb: bool,
    pub we: bool,
    pub sel: u8,
    pub addr: u32,
    pub data: u32,
    pub rvso: bool,
    /// Atomic-hold: keep the bus after the current transaction ends.
    pub lock: bool,
}

impl BusSignals {
    pub const IDLE: BusSignals = BusSignals {
        cyc: false,
        stb: false,
        we: false,
        sel: 0,
        addr: 0,
        data: 0,
        rvso: false,
        lock: false,
    };
}

/// Merge `new` into `old` on the byte lanes enabled in `sel`.
#[inline]
pub fn merge_lanes(old: u32, new: u32, sel: u8) -> u32 {
    let mut mask = 0u32;
    for lane in 0..4 {
        if sel & (1 << lane) != 0 {
            mask |= 0xff << (lane * 8);
        }
    }
    (old & !mask) | (new & mask)
}

/// A 32-bit register-mapped target on the shared bus.
///
/// Offsets are relative to the target's base. Accesses are applied at the
/// clock edge on which the bus services them.
pub trait Device: Send {
    fn load(&self, offset: u32) -> Result<u32, DeviceFault>;
    fn store(&mut self, offset: u32, value: u32, sel: u8) -> Result<(), DeviceFault>;
}

/// Targets on the shared bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Imem,
    Ram,
    Clint,
    Gpio,
}

/// Address map of the shared bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryMap {
    pub imem_base: u32,
    pub imem_size: u32,
    pub ram_base: u32,
    pub ram_size: u32,
    pub clint_base: u32,
    pub gpio_base: u32,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self {
            imem_base: IMEM_BASE,
            imem_size: IMEM_SIZE,
            ram_base: RAM_BASE,
            ram_size: RAM_SIZE,
            clint_base: CLINT_BASE,
            gpio_base: GPIO_BASE,
        }
    }
}

impl MemoryMap {
    fn regions(&self) -> [(Target, u32, u32); 4] {
        [
            (Target::Imem, self.imem_base, self.imem_size),
            (Target::Ram, self.ram_base, self.ram_size),
            (Target::Clint, self.clint_base, CLINT_SIZE),
            (Target::Gpio, self.gpio_base, GPIO_SIZE),
        ]
    }

    /// Target and offset for `addr`, `None` if nothing is mapped there.
    pub fn decode(&self, addr: u32) -> Option<(Target, u32)> {
        self.regions()
            .into_iter()
            .find(|&(_, base, size)| addr >= base && (addr - base) < size)
            .map(|(target, base, _)| (target, addr - base))
    }

    pub fn validate(&self) -> Result<(), String> {
        let regions = self.regions();
        for &(target, base, size) in &regions {
            if size == 0 || size % 4 != 0 || base % 4 != 0 {
                return Err(format!("{:?} region {:#x}+{:#x} is empty or unaligned", target, base, size));
            }
            if base.checked_add(size - 1).is_none() {
                return Err(format!("{:?} region {:#x}+{:#x} wraps the address space", target, base, size));
            }
        }
        for (i, &(a, a_base, a_size)) in regions.iter().enumerate() {
            for &(b, b_base, b_size) in &regions[i + 1..] {
                let a_end = a_base as u64 + a_size as u64;
                let b_end = b_base as u64 + b_size as u64;
                if (a_base as u64) < b_end && (b_base as u64) < a_end {
                    return Err(format!("{:?} and {:?} regions overlap", a, b));
                }
            }
        }
        Ok(())
    }
}

/// Shared bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub transactions: u64,
    pub errors: u64,
    /// Ticks the bus stayed owned by an idle master holding it atomically.
    pub held_ticks: u64,
}

/// The shared bus: one owner per tick, registered responses.
///
/// Ownership is kept while the owner's `cyc` is asserted and a transaction
/// is still in flight. When a transaction ends the bus is re-arbitrated,
/// unless the owner has `lock` (atomic-hold) asserted, in which case it keeps
/// the bus until it drops the hold.
pub struct SystemBus {
    map: MemoryMap,
    pub imem: Dram,
    pub ram: Dram,
    pub clint: Clint,
    pub gpio: Gpio,
    ram_wait_states: u32,
    owner: Option<usize>,
    next_port: usize,
    countdown: Option<u32>,
    out: BusResponse,
    stats: BusStats,
}

impl SystemBus {
    pub fn new(config: &FabricConfig) -> Self {
        let map = config.memory_map;
        Self {
            map,
            imem: Dram::rom(map.imem_base, map.imem_size),
            ram: Dram::new(map.ram_base, map.ram_size),
            clint: Clint::with_harts(config.num_harts),
            gpio: Gpio::new(),
            ram_wait_states: config.ram_wait_states,
            owner: None,
            next_port: 0,
            countdown: None,
            out: BusResponse::IDLE,
            stats: BusStats::default(),
        }
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.map
    }

    /// Registered response visible this tick. Belongs to the current owner.
    #[inline]
    pub fn response(&self) -> BusResponse {
        self.out
    }

    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    /// Pick the port that owns the bus this tick.
    ///
    /// The current owner keeps it while `cyc` is up; otherwise ports with a
    /// strobe are served round-robin.
    pub fn select(&self, ports: &[BusSignals]) -> Option<usize> {
        if let Some(owner) = self.owner {
            if ports.get(owner).is_some_and(|p| p.cyc) {
                return Some(owner);
            }
        }
        let n = ports.len();
        (0..n)
            .map(|i| (self.next_port + i) % n)
            .find(|&p| ports[p].cyc && ports[p].stb)
    }

    /// Clock edge.
    pub fn clock(&mut self, ports: &[BusSignals], selected: Option<usize>) {
        let completed = self.out.is_done();
        self.out = BusResponse::IDLE;

        match selected.map(|p| (p, ports[p])) {
            // The strobe that is still up on a completion tick belongs to the
            // transaction that just ended.
            Some((_, sig)) if sig.stb && !completed => {
                let remaining = match self.countdown {
                    Some(n) => n,
                    None => self.wait_states(sig.addr),
                };
                if remaining == 0 {
                    self.countdown = None;
                    self.out = self.perform(&sig);
                } else {
                    self.countdown = Some(remaining - 1);
                }
            }
            Some((_, sig)) if sig.cyc && !sig.stb && sig.lock => {
                self.stats.held_ticks += 1;
                self.countdown = None;
            }
            _ => self.countdown = None,
        }

        let previous = self.owner;
        self.owner = match selected {
            Some(p) => {
                let sig = &ports[p];
                if !sig.cyc || (completed && !sig.lock) {
                    None
                } else {
                    Some(p)
                }
            }
            None => None,
        };
        if let Some(p) = selected {
            self.next_port = (p + 1) % ports.len();
        }
        if self.owner != previous {
            log::trace!("bus: owner {:?} -> {:?}", previous, self.owner);
        }

        self.clint.clock();
    }

    fn wait_states(&self, addr: u32) -> u32 {
        match self.map.decode(addr) {
            Some((Target::Ram, _)) => self.ram_wait_states,
            _ => 0,
        }
    }

    fn device(&mut self, target: Target) -> &mut dyn Device {
        match target {
            Target::Imem => &mut self.imem,
            Target::Ram => &mut self.ram,
            Target::Clint => &mut self.clint,
            Target::Gpio => &mut self.gpio,
        }
    }

    fn perform(&mut self, sig: &BusSignals) -> BusResponse {
        self.stats.transactions += 1;

        let result = match self.map.decode(sig.addr) {
            Some((target, offset)) => {
                let device = self.device(target);
                if sig.we {
                    device.store(offset, sig.data, sig.sel).map(|_| 0)
                } else {
                    device.load(offset)
                }
            }
            None => Err(DeviceFault::Unmapped(sig.addr)),
        };

        match result {
            Ok(data) => {
                log::trace!(
                    "bus: {} {:#010x} = {:#010x}",
                    if sig.we { "write" } else { "read" },
                    sig.addr,
                    if sig.we { sig.data } else { data }
                );
                BusResponse::ack(data)
            }
            Err(fault) => {
                self.stats.errors += 1;
                log::debug!("bus: error response at {:#010x}: {}", sig.addr, fault);
                BusResponse::error()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> SystemBus {
        SystemBus::new(&FabricConfig::default())
    }

    fn strobe(req: BusRequest, lock: bool) -> BusSignals {
        BusSignals {
            cyc: true,
            stb: req.stb,
            we: req.we,
            sel: req.sel,
            addr: req.addr,
            data: req.data,
            rvso: req.rvso,
            lock,
        }
    }

    #[test]
    fn merge_lanes_respects_byte_enables() {
        assert_eq!(merge_lanes(0x1122_3344, 0xaabb_ccdd, 0b0000), 0x1122_3344);
        assert_eq!(merge_lanes(0x1122_3344, 0xaabb_ccdd, 0b0001), 0x1122_33dd);
        assert_eq!(merge_lanes(0x1122_3344, 0xaabb_ccdd, 0b1010), 0xaa22_cc44);
        assert_eq!(merge_lanes(0x1122_3344, 0xaabb_ccdd, SEL_WORD), 0xaabb_ccdd);
    }

    #[test]
    fn default_map_is_valid_and_decodes() {
        let map = MemoryMap::default();
        assert!(map.validate().is_ok());
        assert_eq!(map.decode(RAM_BASE + 8), Some((Target::Ram, 8)));
        assert_eq!(map.decode(CLINT_BASE + 0xbff8), Some((Target::Clint, 0xbff8)));
        assert_eq!(map.decode(GPIO_BASE), Some((Target::Gpio, 0)));
        assert_eq!(map.decode(0x4000_0000), None);
    }

    #[test]
    fn overlapping_map_is_rejected() {
        let map = MemoryMap {
            gpio_base: RAM_BASE + 0x100,
            ..MemoryMap::default()
        };
        assert!(map.validate().is_err());
    }

    #[test]
    fn response_is_registered_and_one_tick_wide() {
        let mut bus = bus();
        let ports = [strobe(BusRequest::write(RAM_BASE, 42), false)];

        let sel = bus.select(&ports);
        assert_eq!(sel, Some(0));
        assert_eq!(bus.response(), BusResponse::IDLE);
        bus.clock(&ports, sel);

        // Ack shows up on the next tick while the strobe is still held.
        assert_eq!(bus.response(), BusResponse::ack(0));
        let sel = bus.select(&ports);
        bus.clock(&ports, sel);

        // The held strobe is not serviced a second time.
        assert_eq!(bus.response(), BusResponse::IDLE);
        assert_eq!(bus.stats().transactions, 1);
        assert_eq!(bus.ram.load(0).unwrap(), 42);
    }

    #[test]
    fn unmapped_address_answers_error() {
        let mut bus = bus();
        let ports = [strobe(BusRequest::read(0x4000_0000), false)];
        let sel = bus.select(&ports);
        bus.clock(&ports, sel);
        assert_eq!(bus.response(), BusResponse::error());
        assert_eq!(bus.stats().errors, 1);
    }

    #[test]
    fn round_robin_between_ports() {
        let mut bus = bus();
        let ports = [
            strobe(BusRequest::read(RAM_BASE), false),
            strobe(BusRequest::read(RAM_BASE + 4), false),
        ];

        let first = bus.select(&ports);
        bus.clock(&ports, first);
        // Owner keeps the bus until its ack.
        assert_eq!(bus.select(&ports), first);
        bus.clock(&ports, first);
        // Re-arbitrated: the other port wins.
        let second = bus.select(&ports);
        assert_ne!(first, second);
        assert!(second.is_some());
    }

    #[test]
    fn lock_keeps_bus_between_transactions() {
        let mut bus = bus();
        let held = strobe(BusRequest::reserved_read(RAM_BASE), true);
        let idle_hold = BusSignals {
            stb: false,
            ..held
        };
        let other = strobe(BusRequest::write(RAM_BASE, 5), false);

        let ports = [held, other];
        let sel = bus.select(&ports);
        assert_eq!(sel, Some(0));
        bus.clock(&ports, sel);
        bus.clock(&ports, bus.select(&ports));

        // Port 0 idles with the hold up: port 1 must keep waiting.
        let ports = [idle_hold, other];
        for _ in 0..4 {
            let sel = bus.select(&ports);
            assert_eq!(sel, Some(0));
            bus.clock(&ports, sel);
        }
        assert_eq!(bus.stats().held_ticks, 4);
        assert_eq!(bus.ram.load(0).unwrap(), 0);

        // Hold dropped: port 1 gets through.
        let ports = [BusSignals::IDLE, other];
        assert_eq!(bus.select(&ports), Some(1));
    }

    #[test]
    fn ram_wait_states_delay_the_ack() {
        let config = FabricConfig {
            ram_wait_states: 2,
            ..FabricConfig::default()
        };
        let mut bus = SystemBus::new(&config);
        let ports = [strobe(BusRequest::read(RAM_BASE), false)];

        let mut ticks = 0;
        while !bus.response().is_done() {
            let sel = bus.select(&ports);
            bus.clock(&ports, sel);
            ticks += 1;
        }
        assert_eq!(ticks, 3);
    }
}
