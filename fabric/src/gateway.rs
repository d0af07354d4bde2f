//! Bus gateway: one per core request stream.
//!
//! A core strobes a request for a single tick, but the shared bus needs the
//! transaction held until it answers. The gateway forwards the strobe
//! immediately, latches the request and keeps presenting it until an `ack`
//! or `err` comes back.
//!
//! Orthogonal to that it carries the atomic-hold: a reserved read sets it,
//! the core's next request clears it, and while it is set `cyc` (and `lock`)
//! stay asserted between transactions so no other master gets the bus.

use crate::bus::{BusRequest, BusResponse, BusSignals};

/// Transaction state of a gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GatewayState {
    #[default]
    Idle,
    /// A transaction is in flight.
    Pending,
}

impl GatewayState {
    /// Transition for one clock edge.
    pub fn next(self, req: &BusRequest, resp: &BusResponse) -> GatewayState {
        match self {
            GatewayState::Idle if req.stb => GatewayState::Pending,
            GatewayState::Idle => GatewayState::Idle,
            GatewayState::Pending if resp.is_done() => GatewayState::Idle,
            GatewayState::Pending => GatewayState::Pending,
        }
    }
}

#[derive(Debug, Default)]
pub struct Gateway {
    state: GatewayState,
    atomic_held: bool,
    latched: BusRequest,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == GatewayState::Pending
    }

    pub fn atomic_held(&self) -> bool {
        self.atomic_held
    }

    /// Signals towards the bus for this tick.
    ///
    /// A fresh strobe goes out in the tick it is issued; after that the
    /// latched copy is presented.
    pub fn signals(&self, req: &BusRequest) -> BusSignals {
        let presented = match self.state {
            GatewayState::Idle if req.stb => Some(req),
            GatewayState::Idle => None,
            GatewayState::Pending => Some(&self.latched),
        };
        match presented {
            Some(r) => BusSignals {
                cyc: true,
                stb: true,
                we: r.we,
                sel: r.sel,
                addr: r.addr,
                data: r.data,
                rvso: r.rvso,
                lock: self.atomic_held,
            },
            None => BusSignals {
                cyc: self.atomic_held,
                lock: self.atomic_held,
                ..BusSignals::IDLE
            },
        }
    }

    /// Response passed through to the core. Only meaningful while pending.
    pub fn core_response(&self, resp: &BusResponse) -> BusResponse {
        match self.state {
            GatewayState::Pending => *resp,
            GatewayState::Idle => BusResponse::IDLE,
        }
    }

    /// Clock edge.
    ///
    /// A core must not strobe while the gateway is pending: such a request
    /// is not latched and never reaches the bus.
    pub fn clock(&mut self, req: &BusRequest, resp: &BusResponse) {
        if req.stb {
            if self.state == GatewayState::Pending {
                log::warn!("gateway: strobe at {:#010x} while pending, dropped", req.addr);
            } else {
                self.latched = *req;
                let hold = req.is_reserved_read();
                if hold != self.atomic_held {
                    log::trace!(
                        "gateway: atomic-hold {} at {:#010x}",
                        if hold { "set" } else { "cleared" },
                        req.addr
                    );
                }
                self.atomic_held = hold;
            }
        }
        self.state = self.state.next(req, resp);
    }
}
