//! Demo programs. Every hart runs the same function and branches on its
//! hart id.

use crate::bus::MemoryMap;
use crate::complex::{CoreComplex, RunReport};
use crate::error::FabricError;
use crate::gpio::GPIO_OUT;
use smp_sync::{Clint, HartBus, Mutex, SpinLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// Hart 0 releases the others by IPI; every hart toggles its GPIO pin
    /// under a shared mutex.
    Blinky,
    /// Every hart increments a shared RAM counter under a spinlock.
    Counter,
    /// Every hart programs its timer compare and sleeps until it fires.
    Timer,
}

/// Where the demo programs keep their shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub num_harts: u32,
    pub mutex: Mutex,
    pub counter_lock: SpinLock,
    pub counter: u32,
    wake_records: u32,
    pub clint: Clint,
    pub gpio_out: u32,
}

impl Layout {
    pub fn new(map: &MemoryMap, num_harts: u32) -> Self {
        let ram = map.ram_base;
        Self {
            num_harts,
            mutex: Mutex::at(ram),
            counter_lock: SpinLock::at(ram + 0x10),
            counter: ram + 0x14,
            wake_records: ram + 0x40,
            clint: Clint::at(map.clint_base),
            gpio_out: map.gpio_base + GPIO_OUT,
        }
    }

    /// Two words per hart: timer deadline and observed wake-up time (low
    /// halves).
    pub fn wake_record(&self, hart: u32) -> u32 {
        self.wake_records + 8 * hart
    }
}

/// Spin for `n` instructions.
pub fn delay<B: HartBus + ?Sized>(bus: &mut B, n: u32) -> Result<(), B::Error> {
    for _ in 0..n {
        bus.relax()?;
    }
    Ok(())
}

/// Sleep until this hart's software interrupt, then acknowledge it.
///
/// The timer compare is parked at its maximum first; it is pending from
/// reset and would otherwise end every WFI at once.
pub fn wait_for_ipi<B: HartBus + ?Sized>(bus: &mut B, clint: &Clint) -> Result<(), B::Error> {
    let me = bus.hart_id();
    clint.set_timer(bus, me, u64::MAX)?;
    loop {
        if bus.wait_for_interrupt()?.software {
            return clint.clear_ipi(bus, me);
        }
    }
}

pub fn blinky<B: HartBus + ?Sized>(bus: &mut B, layout: &Layout, toggles: u32) -> Result<(), B::Error> {
    let me = bus.hart_id();

    if me == 0 {
        layout.mutex.init(bus)?;
        delay(bus, 32)?;
        for hart in 1..layout.num_harts {
            layout.clint.send_ipi(bus, hart)?;
        }
    } else {
        wait_for_ipi(bus, &layout.clint)?;
    }

    let pin = 1u32 << (me % 32);
    let pause = 4u32 << me.min(8);
    for _ in 0..toggles {
        layout.mutex.acquire(bus)?;
        let out = bus.load(layout.gpio_out)?;
        bus.store(layout.gpio_out, out ^ pin)?;
        layout.mutex.release(bus)?;
        delay(bus, pause)?;
    }
    Ok(())
}

pub fn counter<B: HartBus + ?Sized>(bus: &mut B, layout: &Layout, increments: u32) -> Result<(), B::Error> {
    for _ in 0..increments {
        layout.counter_lock.with(bus, |bus| {
            let value = bus.load(layout.counter)?;
            // Widen the read-modify-write window.
            bus.relax()?;
            bus.store(layout.counter, value.wrapping_add(1))
        })?;
    }
    Ok(())
}

/// Hart `h` sleeps `interval * (h + 1)` ticks of `mtime`.
pub fn timer<B: HartBus + ?Sized>(bus: &mut B, layout: &Layout, interval: u32) -> Result<(), B::Error> {
    let me = bus.hart_id();
    let clint = &layout.clint;

    let deadline = clint.read_mtime(bus)? + interval as u64 * (me as u64 + 1);
    clint.set_timer(bus, me, deadline)?;
    while !bus.wait_for_interrupt()?.timer {}
    let woke = clint.read_mtime(bus)?;

    let record = layout.wake_record(me);
    bus.store(record, deadline as u32)?;
    bus.store(record + 4, woke as u32)?;
    clint.set_timer(bus, me, u64::MAX)
}

/// Run `scenario` on every hart of `complex`.
pub fn run(complex: &mut CoreComplex, scenario: Scenario, iterations: u32) -> Result<RunReport, FabricError> {
    let layout = Layout::new(&complex.config().memory_map, complex.num_harts());
    log::info!("running {:?} with {} iterations", scenario, iterations);
    match scenario {
        Scenario::Blinky => complex.run(|ctx| blinky(ctx, &layout, iterations)),
        Scenario::Counter => complex.run(|ctx| counter(ctx, &layout, iterations)),
        Scenario::Timer => complex.run(|ctx| timer(ctx, &layout, iterations.max(1) * 16)),
    }
}
