use crate::bus::{merge_lanes, Device};
use crate::error::DeviceFault;

/// Encoding of `addi x0, x0, 0`, used to fill instruction memory.
pub const NOP: u32 = 0x0000_0013;

/// Word-organised memory behind the shared bus.
///
/// Offsets handed to `load`/`store` are byte offsets from `base`; the low two
/// bits are ignored (word access), sub-word writes use the byte enables.
pub struct Dram {
    pub base: u32,
    words: Vec<u32>,
    read_only: bool,
}

impl Dram {
    /// Zero-initialised RAM of `size` bytes.
    pub fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            words: vec![0; (size / 4) as usize],
            read_only: false,
        }
    }

    /// Read-only instruction memory filled with no-ops.
    pub fn rom(base: u32, size: u32) -> Self {
        Self {
            base,
            words: vec![NOP; (size / 4) as usize],
            read_only: true,
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> u32 {
        (self.words.len() * 4) as u32
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Backdoor load of a word image at byte offset `offset`.
    pub fn load_words(&mut self, offset: u32, image: &[u32]) -> Result<(), DeviceFault> {
        let start = (offset / 4) as usize;
        let end = start + image.len();
        if end > self.words.len() {
            return Err(DeviceFault::OutOfBounds(offset));
        }
        self.words[start..end].copy_from_slice(image);
        Ok(())
    }

    fn index(&self, offset: u32) -> Result<usize, DeviceFault> {
        let idx = (offset / 4) as usize;
        if idx < self.words.len() {
            Ok(idx)
        } else {
            Err(DeviceFault::OutOfBounds(offset))
        }
    }
}

impl Device for Dram {
    fn load(&self, offset: u32) -> Result<u32, DeviceFault> {
        Ok(self.words[self.index(offset)?])
    }

    fn store(&mut self, offset: u32, value: u32, sel: u8) -> Result<(), DeviceFault> {
        if self.read_only {
            return Err(DeviceFault::ReadOnly(offset));
        }
        let idx = self.index(offset)?;
        self.words[idx] = merge_lanes(self.words[idx], value, sel);
        Ok(())
    }
}
