//! Hart (hardware thread) model.
//!
//! The instruction-level core is outside the fabric; what is modelled here is
//! how a core loads the fabric:
//!
//! - an instruction prefetch unit on the instruction stream,
//! - one software action per executed instruction on the data stream.
//!
//! Software is an ordinary Rust closure running on its own host thread. It
//! drives the core through a [`HartContext`], which implements
//! [`smp_sync::HartBus`]: every call sends one action to the simulator and
//! blocks until the core reports the outcome. The simulator takes at most one
//! action per hart per tick, so the run is lock-step and deterministic.

use crate::bus::{BusRequest, BusResponse, MemoryMap};
use crate::error::{BusError, HartError};
use smp_sync::{HartBus, HartInterrupts};
use std::sync::mpsc::{Receiver, Sender};

/// One instruction's worth of work requested by a hart program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HartAction {
    Load(u32),
    Store(u32, u32),
    LoadReserved(u32),
    StoreConditional(u32, u32),
    Relax,
    Interrupts,
    WaitForInterrupt,
}

impl HartAction {
    /// Data-stream request this action issues, if any.
    pub fn request(&self) -> Option<BusRequest> {
        match *self {
            HartAction::Load(addr) => Some(BusRequest::read(addr)),
            HartAction::Store(addr, data) => Some(BusRequest::write(addr, data)),
            HartAction::LoadReserved(addr) => Some(BusRequest::reserved_read(addr)),
            HartAction::StoreConditional(addr, data) => Some(BusRequest::conditional_write(addr, data)),
            HartAction::Relax | HartAction::Interrupts | HartAction::WaitForInterrupt => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Value(u32),
    Interrupts(HartInterrupts),
    Fault(BusError),
}

/// Simulator to program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HartReply {
    /// Tick on whose edge the action completed.
    pub tick: u64,
    pub outcome: Outcome,
}

/// Program to simulator.
#[derive(Debug)]
pub enum HartMessage {
    Action(HartAction),
    Finished(Result<(), HartError>),
}

/// Simulator end of a hart program's channels.
pub struct HartLink {
    messages: Receiver<HartMessage>,
    replies: Sender<HartReply>,
}

impl HartLink {
    pub fn new(messages: Receiver<HartMessage>, replies: Sender<HartReply>) -> Self {
        Self { messages, replies }
    }
}

/// Program end: what software running on a hart holds.
pub struct HartContext {
    hart_id: u32,
    map: MemoryMap,
    messages: Sender<HartMessage>,
    replies: Receiver<HartReply>,
    last_tick: u64,
}

impl HartContext {
    pub fn new(hart_id: u32, map: MemoryMap, messages: Sender<HartMessage>, replies: Receiver<HartReply>) -> Self {
        Self {
            hart_id,
            map,
            messages,
            replies,
            last_tick: 0,
        }
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.map
    }

    /// Tick on which the previous action completed.
    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    /// Report the program's result. Consumes the context.
    pub fn finish(self, result: Result<(), HartError>) {
        // Nobody listening any more means the run is already over.
        let _ = self.messages.send(HartMessage::Finished(result));
    }

    fn call(&mut self, action: HartAction) -> Result<Outcome, HartError> {
        self.messages
            .send(HartMessage::Action(action))
            .map_err(|_| HartError::Detached)?;
        let reply = self.replies.recv().map_err(|_| HartError::Detached)?;
        self.last_tick = reply.tick;
        match reply.outcome {
            Outcome::Fault(err) => Err(err.into()),
            outcome => Ok(outcome),
        }
    }

    fn value(&mut self, action: HartAction) -> Result<u32, HartError> {
        match self.call(action)? {
            Outcome::Value(v) => Ok(v),
            other => unreachable!("{:?} answered with {:?}", action, other),
        }
    }

    fn lines(&mut self, action: HartAction) -> Result<HartInterrupts, HartError> {
        match self.call(action)? {
            Outcome::Interrupts(irq) => Ok(irq),
            other => unreachable!("{:?} answered with {:?}", action, other),
        }
    }
}

impl HartBus for HartContext {
    type Error = HartError;

    fn hart_id(&self) -> u32 {
        self.hart_id
    }

    fn load(&mut self, addr: u32) -> Result<u32, HartError> {
        self.value(HartAction::Load(addr))
    }

    fn store(&mut self, addr: u32, value: u32) -> Result<(), HartError> {
        self.value(HartAction::Store(addr, value)).map(|_| ())
    }

    fn load_reserved(&mut self, addr: u32) -> Result<u32, HartError> {
        self.value(HartAction::LoadReserved(addr))
    }

    fn store_conditional(&mut self, addr: u32, value: u32) -> Result<bool, HartError> {
        Ok(self.value(HartAction::StoreConditional(addr, value))? != 0)
    }

    fn relax(&mut self) -> Result<(), HartError> {
        self.value(HartAction::Relax).map(|_| ())
    }

    fn interrupts(&mut self) -> Result<HartInterrupts, HartError> {
        self.lines(HartAction::Interrupts)
    }

    fn wait_for_interrupt(&mut self) -> Result<HartInterrupts, HartError> {
        self.lines(HartAction::WaitForInterrupt)
    }
}

/// Execution state of a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    /// No program attached.
    Halted,
    /// Waiting for the program's next action.
    Fetching,
    /// Action known, waiting for an instruction to execute it with.
    Ready(HartAction),
    /// Data transaction in flight.
    Waiting(HartAction),
    /// Stalled in WFI.
    Sleeping,
    /// Program ended (or the core faulted).
    Finished,
}

/// How a core's program ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreExit {
    Returned(Result<(), HartError>),
    Panicked,
    FetchFault(u32),
}

/// Per-core counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreStats {
    pub instructions: u64,
    pub data_requests: u64,
    pub fetches: u64,
    /// Ticks an action waited for the data stream (bus contention, latency).
    pub stall_ticks: u64,
    /// Ticks an action waited for a prefetched instruction.
    pub starved_ticks: u64,
    pub sleep_ticks: u64,
    pub bus_errors: u64,
}

pub struct Core {
    hart_id: u32,
    state: CoreState,
    link: Option<HartLink>,
    exit: Option<CoreExit>,

    prefetch_depth: u32,
    window_base: u32,
    window_size: u32,
    fetch_pc: u32,
    fetch_addr: u32,
    fetch_pending: bool,
    prefetched: u32,

    stats: CoreStats,
}

impl Core {
    /// `prefetch_depth == 0` turns instruction-fetch modelling off.
    pub fn new(hart_id: u32, prefetch_depth: u32, window_base: u32, window_size: u32) -> Self {
        Self {
            hart_id,
            state: CoreState::Halted,
            link: None,
            exit: None,
            prefetch_depth,
            window_base,
            window_size: window_size.max(4),
            fetch_pc: window_base,
            fetch_addr: window_base,
            fetch_pending: false,
            prefetched: 0,
            stats: CoreStats::default(),
        }
    }

    pub fn hart_id(&self) -> u32 {
        self.hart_id
    }

    pub fn state(&self) -> CoreState {
        self.state
    }

    pub fn stats(&self) -> CoreStats {
        self.stats
    }

    pub fn exit(&self) -> Option<&CoreExit> {
        self.exit.as_ref()
    }

    /// Attach a program and reset the execution state.
    pub fn attach(&mut self, link: HartLink) {
        self.link = Some(link);
        self.state = CoreState::Fetching;
        self.exit = None;
        self.fetch_pc = self.window_base;
        self.fetch_pending = false;
        self.prefetched = 0;
    }

    /// Drop the program's channels; a blocked program sees `Detached`.
    pub fn detach(&mut self) {
        self.link = None;
        if self.state != CoreState::Finished {
            self.state = CoreState::Halted;
        }
    }

    /// Nothing left to run: no program, or the program is over.
    pub fn is_done(&self) -> bool {
        matches!(self.state, CoreState::Halted | CoreState::Finished)
    }

    /// Start-of-tick: take the program's next action if the core needs one.
    ///
    /// Blocks until the program produces it.
    pub fn poll(&mut self) {
        if self.state != CoreState::Fetching {
            return;
        }
        let Some(link) = self.link.as_ref() else {
            self.state = CoreState::Halted;
            return;
        };
        match link.messages.recv() {
            Ok(HartMessage::Action(action)) => self.state = CoreState::Ready(action),
            Ok(HartMessage::Finished(result)) => {
                log::info!("hart {}: program returned {:?}", self.hart_id, result);
                self.finish(CoreExit::Returned(result));
            }
            Err(_) => {
                log::warn!("hart {}: program went away without finishing", self.hart_id);
                self.finish(CoreExit::Panicked);
            }
        }
    }

    fn finish(&mut self, exit: CoreExit) {
        self.state = CoreState::Finished;
        self.exit = Some(exit);
        self.link = None;
    }

    fn has_instruction(&self) -> bool {
        self.prefetch_depth == 0 || self.prefetched > 0
    }

    fn consume_instruction(&mut self) {
        if self.prefetch_depth > 0 {
            self.prefetched -= 1;
        }
        self.stats.instructions += 1;
    }

    /// Requests for this tick: `(data, instruction)`.
    pub fn requests(&self) -> (BusRequest, BusRequest) {
        let running = !self.is_done();

        let instr = if running
            && self.prefetch_depth > 0
            && !self.fetch_pending
            && self.prefetched < self.prefetch_depth
        {
            BusRequest::read(self.fetch_pc)
        } else {
            BusRequest::IDLE
        };

        let data = match self.state {
            CoreState::Ready(action) if self.has_instruction() => action.request().unwrap_or(BusRequest::IDLE),
            _ => BusRequest::IDLE,
        };

        (data, instr)
    }

    fn reply(&mut self, tick: u64, outcome: Outcome) {
        if let Some(link) = self.link.as_ref() {
            // A send failure shows up as a disconnect on the next poll.
            let _ = link.replies.send(HartReply { tick, outcome });
        }
        self.state = CoreState::Fetching;
    }

    /// Clock edge.
    pub fn clock(
        &mut self,
        tick: u64,
        data_req: &BusRequest,
        instr_req: &BusRequest,
        data_resp: &BusResponse,
        instr_resp: &BusResponse,
        irq: HartInterrupts,
    ) {
        self.clock_fetch(instr_req, instr_resp);
        if let Some(addr) = self.fault_pending() {
            log::warn!("hart {}: instruction fetch fault at {:#010x}", self.hart_id, addr);
            self.finish(CoreExit::FetchFault(addr));
            return;
        }

        match self.state {
            CoreState::Ready(action) => {
                if !self.has_instruction() {
                    self.stats.starved_ticks += 1;
                    return;
                }
                match action {
                    HartAction::Relax => {
                        self.consume_instruction();
                        self.reply(tick, Outcome::Value(0));
                    }
                    HartAction::Interrupts => {
                        self.consume_instruction();
                        self.reply(tick, Outcome::Interrupts(irq));
                    }
                    HartAction::WaitForInterrupt => {
                        self.consume_instruction();
                        if irq.any() {
                            self.reply(tick, Outcome::Interrupts(irq));
                        } else {
                            self.state = CoreState::Sleeping;
                        }
                    }
                    _ => {
                        if data_req.stb {
                            self.consume_instruction();
                            self.stats.data_requests += 1;
                            self.state = CoreState::Waiting(action);
                        }
                    }
                }
            }
            CoreState::Waiting(action) => {
                if data_resp.ack {
                    let value = match action {
                        HartAction::StoreConditional(..) => 1,
                        HartAction::Store(..) => 0,
                        _ => data_resp.data,
                    };
                    self.reply(tick, Outcome::Value(value));
                } else if data_resp.err {
                    self.stats.bus_errors += 1;
                    let (addr, write) = match action {
                        HartAction::Store(addr, _) | HartAction::StoreConditional(addr, _) => (addr, true),
                        HartAction::Load(addr) | HartAction::LoadReserved(addr) => (addr, false),
                        _ => (0, false),
                    };
                    self.reply(tick, Outcome::Fault(BusError { addr, write }));
                } else {
                    self.stats.stall_ticks += 1;
                }
            }
            CoreState::Sleeping => {
                if irq.any() {
                    self.reply(tick, Outcome::Interrupts(irq));
                } else {
                    self.stats.sleep_ticks += 1;
                }
            }
            CoreState::Halted | CoreState::Fetching | CoreState::Finished => {}
        }
    }

    fn clock_fetch(&mut self, req: &BusRequest, resp: &BusResponse) {
        if self.fetch_pending && resp.is_done() {
            self.fetch_pending = false;
            if resp.ack {
                self.prefetched += 1;
            } else if !self.is_done() {
                self.stats.bus_errors += 1;
                self.exit = Some(CoreExit::FetchFault(self.fetch_addr));
            }
        }
        if req.stb {
            self.stats.fetches += 1;
            self.fetch_pending = true;
            self.fetch_addr = req.addr;
            let next = (self.fetch_pc - self.window_base + 4) % self.window_size;
            self.fetch_pc = self.window_base + next;
        }
    }

    fn fault_pending(&self) -> Option<u32> {
        match self.exit {
            Some(CoreExit::FetchFault(addr)) if self.state != CoreState::Finished => Some(addr),
            _ => None,
        }
    }
}
