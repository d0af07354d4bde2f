use crate::bus::{merge_lanes, Device};
use crate::error::DeviceFault;

pub const GPIO_SIZE: u32 = 0x100;

/// Output port register (read/write).
pub const GPIO_OUT: u32 = 0x00;
/// Input port register (read-only).
pub const GPIO_IN: u32 = 0x04;

/// 32-pin general purpose I/O port.
///
/// There is no atomic toggle; software toggles a pin with a read-modify-write
/// of [`GPIO_OUT`], so concurrent togglers must serialize themselves.
#[derive(Debug, Default)]
pub struct Gpio {
    output: u32,
    input: u32,
    /// Output writes that changed at least one pin.
    edges: u64,
}

impl Gpio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> u32 {
        self.output
    }

    pub fn set_input(&mut self, value: u32) {
        self.input = value;
    }

    pub fn edges(&self) -> u64 {
        self.edges
    }

    pub(crate) fn restore(&mut self, output: u32, input: u32) {
        self.output = output;
        self.input = input;
    }

    pub(crate) fn input(&self) -> u32 {
        self.input
    }
}

impl Device for Gpio {
    fn load(&self, offset: u32) -> Result<u32, DeviceFault> {
        Ok(match offset & !3 {
            GPIO_OUT => self.output,
            GPIO_IN => self.input,
            _ => 0,
        })
    }

    fn store(&mut self, offset: u32, value: u32, sel: u8) -> Result<(), DeviceFault> {
        if offset & !3 == GPIO_OUT {
            let next = merge_lanes(self.output, value, sel);
            if next != self.output {
                self.edges += 1;
                log::trace!("gpio: out {:#010x} -> {:#010x}", self.output, next);
            }
            self.output = next;
        }
        Ok(())
    }
}
