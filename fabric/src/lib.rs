//! Cycle-level model of a small multi-hart SoC fabric.
//!
//! Each core has a data and an instruction request stream. Every stream goes
//! through a [`gateway::Gateway`] (transaction latch plus atomic-hold), the
//! two gateways of a core meet in an [`arbiter::Arbiter`], and all cores
//! share one [`bus::SystemBus`] with RAM, GPIO and a [`clint::Clint`].
//! [`complex::CoreComplex`] wires it together and runs hart programs written
//! against [`smp_sync::HartBus`].

pub mod arbiter;
pub mod bus;
pub mod clint;
pub mod complex;
pub mod config;
pub mod dram;
pub mod error;
pub mod gateway;
pub mod gpio;
pub mod hart;
pub mod scenarios;
pub mod snapshot;

pub use bus::{BusRequest, BusResponse, BusSignals, MemoryMap, SystemBus};
pub use complex::{CoreComplex, HartReport, RunReport};
pub use config::FabricConfig;
pub use error::{BusError, FabricError, HartError};
pub use hart::HartContext;
pub use snapshot::FabricSnapshot;
