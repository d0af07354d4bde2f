use crate::bus::MemoryMap;
use crate::clint::MAX_HARTS;
use crate::error::FabricError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Fabric build parameters.
///
/// Every field has a default, so a JSON config file only needs the keys it
/// changes:
///
/// ```json
/// { "num_harts": 4, "ram_wait_states": 1 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    pub num_harts: u32,
    pub memory_map: MemoryMap,
    /// Extra ticks a RAM access takes before its ack.
    pub ram_wait_states: u32,
    /// Instruction prefetch depth per core; 0 disables fetch modelling.
    pub prefetch_depth: u32,
    /// Upper bound on the ticks a single run may take.
    pub max_ticks: u64,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            num_harts: 2,
            memory_map: MemoryMap::default(),
            ram_wait_states: 0,
            prefetch_depth: 2,
            max_ticks: 5_000_000,
        }
    }
}

impl FabricConfig {
    pub fn validate(&self) -> Result<(), FabricError> {
        if self.num_harts == 0 || self.num_harts > MAX_HARTS {
            return Err(FabricError::InvalidConfig(format!(
                "num_harts must be in 1..={}, got {}",
                MAX_HARTS, self.num_harts
            )));
        }
        if self.max_ticks == 0 {
            return Err(FabricError::InvalidConfig("max_ticks must be non-zero".into()));
        }
        self.memory_map.validate().map_err(FabricError::InvalidConfig)
    }

    pub fn from_json_str(text: &str) -> Result<Self, FabricError> {
        let config: FabricConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, FabricError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
