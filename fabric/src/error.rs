use thiserror::Error;

/// Device-local access failures.
///
/// The shared bus turns these into an `err` response; they never reach a
/// hart directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceFault {
    #[error("Out-of-bounds access at offset {0:#x}")]
    OutOfBounds(u32),

    #[error("Write to read-only memory at offset {0:#x}")]
    ReadOnly(u32),

    #[error("No target mapped at {0:#010x}")]
    Unmapped(u32),
}

/// A bus transaction that ended with `err` instead of `ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Bus error at {addr:#010x} (write: {write})")]
pub struct BusError {
    pub addr: u32,
    pub write: bool,
}

/// What software running on a hart can see go wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HartError {
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The simulator stopped driving this hart (tick limit, fetch fault or
    /// shutdown).
    #[error("Hart detached from the simulator")]
    Detached,
}

/// Simulator-level errors.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tick limit of {0} reached before all harts finished")]
    TickLimit(u64),

    #[error("Hart {hart} failed: {source}")]
    Hart {
        hart: u32,
        #[source]
        source: HartError,
    },

    #[error("Hart {0} program panicked")]
    HartPanicked(u32),

    #[error("Hart {hart} instruction fetch fault at {addr:#010x}")]
    FetchFault { hart: u32, addr: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration format error: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("Snapshot {0}")]
    SnapshotMismatch(String),
}
