//! The core complex: every core with its two gateways and arbiter, wired to
//! the shared system bus, advanced one tick at a time.
//!
//! Per tick:
//!
//! 1. cores take their program's next action and present requests,
//! 2. gateways and arbiters drive the core ports,
//! 3. the shared bus picks an owner and its registered response is routed
//!    back to the owner's granted stream,
//! 4. everything is clocked.

use crate::arbiter::{Arbiter, Stream};
use crate::bus::{BusRequest, BusResponse, BusSignals, BusStats, SystemBus};
use crate::clint::Clint;
use crate::config::FabricConfig;
use crate::error::{FabricError, HartError};
use crate::gateway::Gateway;
use crate::gpio::Gpio;
use crate::hart::{Core, CoreExit, CoreStats, HartContext, HartLink};
use crate::snapshot::{FabricSnapshot, GpioSnapshot, MemRegionSnapshot, SNAPSHOT_VERSION};
use smp_sync::HartInterrupts;
use std::sync::mpsc;
use std::thread;

struct Tile {
    core: Core,
    data: Gateway,
    instr: Gateway,
    arbiter: Arbiter,
    external_irq: bool,
}

/// Signals of one tile captured during the combinational phase.
struct Lane {
    data_req: BusRequest,
    instr_req: BusRequest,
    instr: BusSignals,
    selected: Option<Stream>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HartReport {
    pub hart: u32,
    pub core: CoreStats,
    /// Ticks a fetch waited because the data stream had the port.
    pub deferred_fetch_ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Ticks the run took.
    pub ticks: u64,
    pub harts: Vec<HartReport>,
    pub bus: BusStats,
}

pub struct CoreComplex {
    config: FabricConfig,
    tiles: Vec<Tile>,
    bus: SystemBus,
    tick: u64,
}

impl CoreComplex {
    pub fn new(config: FabricConfig) -> Result<Self, FabricError> {
        config.validate()?;
        let map = config.memory_map;
        let tiles = (0..config.num_harts)
            .map(|hart| Tile {
                core: Core::new(hart, config.prefetch_depth, map.imem_base, map.imem_size),
                data: Gateway::new(),
                instr: Gateway::new(),
                arbiter: Arbiter::new(),
                external_irq: false,
            })
            .collect();
        let bus = SystemBus::new(&config);
        log::info!(
            "core complex: {} harts, ram {:#010x}+{:#x}, {} wait states, prefetch depth {}",
            config.num_harts,
            map.ram_base,
            map.ram_size,
            config.ram_wait_states,
            config.prefetch_depth
        );
        Ok(Self {
            config,
            tiles,
            bus,
            tick: 0,
        })
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn num_harts(&self) -> u32 {
        self.tiles.len() as u32
    }

    /// Ticks elapsed since construction (or the restored snapshot).
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn bus(&self) -> &SystemBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut SystemBus {
        &mut self.bus
    }

    pub fn clint(&self) -> &Clint {
        &self.bus.clint
    }

    pub fn gpio(&self) -> &Gpio {
        &self.bus.gpio
    }

    /// Drive the external interrupt input of `hart`. Unknown harts are ignored.
    pub fn set_external_irq(&mut self, hart: u32, level: bool) {
        if let Some(tile) = self.tiles.get_mut(hart as usize) {
            tile.external_irq = level;
        }
    }

    /// Interrupt lines currently seen by `hart`.
    pub fn interrupts(&self, hart: u32) -> HartInterrupts {
        HartInterrupts {
            timer: self.bus.clint.mtime_irq(hart),
            software: self.bus.clint.msw_irq(hart),
            external: self.tiles.get(hart as usize).is_some_and(|t| t.external_irq),
        }
    }

    pub fn hart_reports(&self) -> Vec<HartReport> {
        self.tiles
            .iter()
            .map(|tile| HartReport {
                hart: tile.core.hart_id(),
                core: tile.core.stats(),
                deferred_fetch_ticks: tile.arbiter.deferred_ticks(),
            })
            .collect()
    }

    /// Advance the whole complex by one tick.
    ///
    /// Blocks while an attached program computes its next action.
    pub fn step(&mut self) {
        for tile in &mut self.tiles {
            tile.core.poll();
        }

        let irqs: Vec<HartInterrupts> = (0..self.num_harts()).map(|h| self.interrupts(h)).collect();

        let mut lanes = Vec::with_capacity(self.tiles.len());
        let mut ports = Vec::with_capacity(self.tiles.len());
        for tile in &self.tiles {
            let (data_req, instr_req) = tile.core.requests();
            let data = tile.data.signals(&data_req);
            let instr = tile.instr.signals(&instr_req);
            let selected = tile.arbiter.select(&data, &instr);
            ports.push(tile.arbiter.port(selected, &data, &instr));
            lanes.push(Lane {
                data_req,
                instr_req,
                instr,
                selected,
            });
        }

        let owner = self.bus.select(&ports);
        let bus_resp = self.bus.response();
        self.bus.clock(&ports, owner);

        for (i, (tile, lane)) in self.tiles.iter_mut().zip(&lanes).enumerate() {
            let port_resp = if owner == Some(i) { bus_resp } else { BusResponse::IDLE };
            let (data_resp, instr_resp) = tile.arbiter.route(lane.selected, &port_resp);
            let core_data = tile.data.core_response(&data_resp);
            let core_instr = tile.instr.core_response(&instr_resp);

            tile.arbiter.clock(lane.selected, &lane.instr, &port_resp);
            tile.data.clock(&lane.data_req, &data_resp);
            tile.instr.clock(&lane.instr_req, &instr_resp);
            tile.core.clock(
                self.tick,
                &lane.data_req,
                &lane.instr_req,
                &core_data,
                &core_instr,
                irqs[i],
            );
        }

        self.tick += 1;
    }

    /// Run `program` on every hart until all of them return.
    ///
    /// Each hart gets its own host thread and a [`HartContext`]. The program
    /// must only make progress through the context: anything it waits on
    /// outside the fabric stalls the whole simulation.
    pub fn run<F>(&mut self, program: F) -> Result<RunReport, FabricError>
    where
        F: Fn(&mut HartContext) -> Result<(), HartError> + Sync,
    {
        let start = self.tick;
        let map = self.config.memory_map;
        let program = &program;

        let outcome = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.tiles.len());
            let mut spawned = Ok(());

            for tile in &mut self.tiles {
                let hart = tile.core.hart_id();
                let (msg_tx, msg_rx) = mpsc::channel();
                let (reply_tx, reply_rx) = mpsc::channel();
                let mut ctx = HartContext::new(hart, map, msg_tx, reply_rx);

                let handle = thread::Builder::new()
                    .name(format!("hart{}", hart))
                    .spawn_scoped(scope, move || {
                        let result = program(&mut ctx);
                        ctx.finish(result);
                    });
                match handle {
                    Ok(handle) => {
                        tile.core.attach(HartLink::new(msg_rx, reply_tx));
                        handles.push(handle);
                    }
                    Err(e) => {
                        spawned = Err(FabricError::Io(e));
                        break;
                    }
                }
            }

            let outcome = spawned.and_then(|_| self.drive(start));

            for tile in &mut self.tiles {
                tile.core.detach();
            }
            // Joined by hand so a panicking program is reported, not re-raised.
            for handle in handles {
                let _ = handle.join();
            }
            outcome
        });
        outcome?;

        for tile in &self.tiles {
            let hart = tile.core.hart_id();
            match tile.core.exit() {
                Some(CoreExit::Returned(Err(source))) => {
                    return Err(FabricError::Hart {
                        hart,
                        source: source.clone(),
                    })
                }
                Some(CoreExit::Panicked) => return Err(FabricError::HartPanicked(hart)),
                Some(CoreExit::FetchFault(addr)) => return Err(FabricError::FetchFault { hart, addr: *addr }),
                Some(CoreExit::Returned(Ok(()))) | None => {}
            }
        }

        let report = RunReport {
            ticks: self.tick - start,
            harts: self.hart_reports(),
            bus: self.bus.stats(),
        };
        log::info!("run finished after {} ticks", report.ticks);
        Ok(report)
    }

    fn drive(&mut self, start: u64) -> Result<(), FabricError> {
        let limit = self.config.max_ticks;
        while !self.tiles.iter().all(|t| t.core.is_done()) {
            if self.tick - start >= limit {
                log::warn!("tick limit {} reached", limit);
                return Err(FabricError::TickLimit(limit));
            }
            self.step();
        }
        Ok(())
    }

    pub fn snapshot(&self) -> FabricSnapshot {
        FabricSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            tick: self.tick,
            num_harts: self.num_harts(),
            clint: self.bus.clint.snapshot(),
            gpio: GpioSnapshot {
                output: self.bus.gpio.output(),
                input: self.bus.gpio.input(),
            },
            ram: MemRegionSnapshot {
                base: self.bus.ram.base,
                words: self.bus.ram.words().to_vec(),
            },
        }
    }

    /// Restore architectural state into a complex built with the same shape.
    pub fn restore(&mut self, snapshot: &FabricSnapshot) -> Result<(), FabricError> {
        if snapshot.num_harts != self.num_harts() {
            return Err(FabricError::SnapshotMismatch(format!(
                "has {} harts, fabric has {}",
                snapshot.num_harts,
                self.num_harts()
            )));
        }
        if snapshot.ram.base != self.bus.ram.base || snapshot.ram.words.len() != self.bus.ram.words().len() {
            return Err(FabricError::SnapshotMismatch("RAM region does not match the memory map".into()));
        }
        self.bus
            .ram
            .load_words(0, &snapshot.ram.words)
            .map_err(|e| FabricError::SnapshotMismatch(e.to_string()))?;
        self.bus.clint.restore(&snapshot.clint);
        self.bus.gpio.restore(snapshot.gpio.output, snapshot.gpio.input);
        self.tick = snapshot.tick;
        Ok(())
    }
}
