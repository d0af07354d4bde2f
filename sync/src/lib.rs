//! Synchronization primitives for harts that share memory over a bus without
//! cache coherency.
//!
//! Everything here is software that runs *on* a hart. The only cross-hart
//! ordering guarantee it relies on is the bus atomic-hold: a reserved load
//! keeps the bus owned by the issuing hart until its next request, so a
//! reserved-load / conditional-store pair behaves as one atomic swap.
//!
//! The hart is abstracted by [`HartBus`], which the simulator implements for
//! its hart contexts and tests implement with plain memory.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod bus;
pub mod clint;
pub mod lock;

pub use bus::{HartBus, HartInterrupts};
pub use clint::Clint;
pub use lock::{Mutex, SpinLock, MUTEX_FREE, SPINLOCK_LOCKED, SPINLOCK_UNLOCKED};

#[cfg(test)]
pub(crate) mod testing;
