//! Per-core arbiter: merges the data and instruction gateways of one core
//! onto the core's single port on the shared bus.
//!
//! Data wins when both streams strobe in the same tick. A granted stream
//! keeps the port until its transaction ends, so neither stream is reordered
//! and a losing request simply stays latched in its gateway until the next
//! arbitration. The instruction stream is read-only.

use crate::bus::{BusResponse, BusSignals};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Data,
    Instruction,
}

#[derive(Debug, Default)]
pub struct Arbiter {
    /// Stream whose transaction is in flight on the port.
    grant: Option<Stream>,
    /// Ticks an instruction strobe waited behind the data stream.
    deferred_ticks: u64,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self) -> Option<Stream> {
        self.grant
    }

    pub fn deferred_ticks(&self) -> u64 {
        self.deferred_ticks
    }

    /// Stream that drives the port this tick.
    pub fn select(&self, data: &BusSignals, instr: &BusSignals) -> Option<Stream> {
        if self.grant.is_some() {
            return self.grant;
        }
        if data.stb {
            Some(Stream::Data)
        } else if instr.stb {
            Some(Stream::Instruction)
        } else {
            None
        }
    }

    /// Port signals for this tick.
    ///
    /// The data gateway's atomic-hold is a property of the whole port: while
    /// it is up the port keeps `cyc` and `lock` asserted whichever stream is
    /// being served.
    pub fn port(&self, selected: Option<Stream>, data: &BusSignals, instr: &BusSignals) -> BusSignals {
        match selected {
            Some(Stream::Data) => *data,
            Some(Stream::Instruction) => BusSignals {
                we: false,
                lock: data.lock,
                ..*instr
            },
            None => BusSignals {
                cyc: data.cyc,
                lock: data.lock,
                ..BusSignals::IDLE
            },
        }
    }

    /// Split the port response between the two gateways `(data, instruction)`.
    pub fn route(&self, selected: Option<Stream>, resp: &BusResponse) -> (BusResponse, BusResponse) {
        match selected {
            Some(Stream::Data) => (*resp, BusResponse::IDLE),
            Some(Stream::Instruction) => (BusResponse::IDLE, *resp),
            None => (BusResponse::IDLE, BusResponse::IDLE),
        }
    }

    /// Clock edge.
    pub fn clock(&mut self, selected: Option<Stream>, instr: &BusSignals, resp: &BusResponse) {
        if selected == Some(Stream::Data) && instr.stb {
            self.deferred_ticks += 1;
        }
        self.grant = match selected {
            Some(stream) if !resp.is_done() => Some(stream),
            _ => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusRequest;
    use crate::gateway::Gateway;

    fn strobed(req: BusRequest) -> BusSignals {
        Gateway::new().signals(&req)
    }

    #[test]
    fn data_first_when_both_strobe() {
        let mut arb = Arbiter::new();
        let data = strobed(BusRequest::read(0x8000_0000));
        let instr = strobed(BusRequest::read(0x0000_0010));

        let sel = arb.select(&data, &instr);
        assert_eq!(sel, Some(Stream::Data));
        assert_eq!(arb.port(sel, &data, &instr).addr, 0x8000_0000);
        arb.clock(sel, &instr, &BusResponse::IDLE);

        // Data transaction in flight: still data.
        assert_eq!(arb.select(&data, &instr), Some(Stream::Data));
        let resp = BusResponse::ack(3);
        assert_eq!(arb.route(Some(Stream::Data), &resp), (resp, BusResponse::IDLE));
        arb.clock(Some(Stream::Data), &instr, &resp);

        // Data done, the deferred fetch goes next.
        assert_eq!(arb.select(&BusSignals::IDLE, &instr), Some(Stream::Instruction));
        assert_eq!(arb.deferred_ticks(), 2);
    }

    #[test]
    fn granted_instruction_is_not_preempted() {
        let mut arb = Arbiter::new();
        let instr = strobed(BusRequest::read(0x20));
        let sel = arb.select(&BusSignals::IDLE, &instr);
        arb.clock(sel, &instr, &BusResponse::IDLE);

        let data = strobed(BusRequest::write(0x8000_0000, 1));
        assert_eq!(arb.select(&data, &instr), Some(Stream::Instruction));
    }

    #[test]
    fn instruction_stream_is_read_only() {
        let arb = Arbiter::new();
        let instr = strobed(BusRequest::write(0x20, 0xdead));
        let port = arb.port(Some(Stream::Instruction), &BusSignals::IDLE, &instr);
        assert!(!port.we);
        assert!(port.stb);
    }

    #[test]
    fn data_hold_is_kept_on_the_port() {
        let arb = Arbiter::new();
        let hold = BusSignals {
            cyc: true,
            lock: true,
            ..BusSignals::IDLE
        };
        let port = arb.port(None, &hold, &BusSignals::IDLE);
        assert!(port.cyc && port.lock && !port.stb);

        let instr = strobed(BusRequest::read(0x20));
        let port = arb.port(Some(Stream::Instruction), &hold, &instr);
        assert!(port.cyc && port.lock && port.stb);
    }
}
