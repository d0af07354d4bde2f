use crate::error::FabricError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Version identifier for snapshot compatibility checks.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Architectural state of the fabric between runs.
///
/// Only state that survives a quiescent bus is captured: in-flight
/// transactions, gateway latches and hart programs are not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricSnapshot {
    pub version: String,
    pub tick: u64,
    pub num_harts: u32,
    pub clint: ClintSnapshot,
    pub gpio: GpioSnapshot,
    pub ram: MemRegionSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClintSnapshot {
    pub msip: Vec<bool>,
    pub mtimecmp: Vec<u64>,
    pub mtime: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioSnapshot {
    pub output: u32,
    pub input: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemRegionSnapshot {
    pub base: u32,
    pub words: Vec<u32>,
}

impl FabricSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, FabricError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FabricError> {
        let snapshot: FabricSnapshot = bincode::deserialize(bytes)?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    /// Save a snapshot to disk using bincode.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FabricError> {
        let mut file = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut file, self)?;
        file.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FabricError> {
        let file = BufReader::new(File::open(path)?);
        let snapshot: FabricSnapshot = bincode::deserialize_from(file)?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    fn check_version(&self) -> Result<(), FabricError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(FabricError::SnapshotMismatch(format!(
                "version {} is not supported (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FabricSnapshot {
        FabricSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            tick: 77,
            num_harts: 2,
            clint: ClintSnapshot {
                msip: vec![false, true],
                mtimecmp: vec![100, u64::MAX],
                mtime: 77,
            },
            gpio: GpioSnapshot { output: 0b10, input: 0 },
            ram: MemRegionSnapshot {
                base: 0x8000_0000,
                words: vec![1, 2, 3, 4],
            },
        }
    }

    #[test]
    fn bytes_roundtrip() {
        let snap = sample();
        let bytes = snap.to_bytes().unwrap();
        assert_eq!(FabricSnapshot::from_bytes(&bytes).unwrap(), snap);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let snap = FabricSnapshot {
            version: "0.1".to_string(),
            ..sample()
        };
        let bytes = bincode::serialize(&snap).unwrap();
        assert!(matches!(
            FabricSnapshot::from_bytes(&bytes),
            Err(FabricError::SnapshotMismatch(_))
        ));
    }

    #[test]
    fn file_roundtrip() {
        let path = std::env::temp_dir().join(format!("smp-fabric-snap-{}.bin", std::process::id()));
        let snap = sample();
        snap.save(&path).unwrap();
        let loaded = FabricSnapshot::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, snap);
    }
}
