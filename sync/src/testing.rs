//! In-memory `HartBus` double shared by the unit tests.

use crate::bus::{HartBus, HartInterrupts};
use std::boxed::Box;
use std::cell::RefCell;
use std::collections::HashMap;

pub type Memory = RefCell<HashMap<u32, u32>>;

pub struct MemBus<'a> {
    pub hart: u32,
    pub mem: &'a Memory,
    pub relaxes: usize,
    pub irq: HartInterrupts,
    pub on_relax: Option<Box<dyn FnMut(&mut HashMap<u32, u32>, usize) + 'a>>,
    pub log: std::vec::Vec<(char, u32, u32)>,
}

impl<'a> MemBus<'a> {
    pub fn new(hart: u32, mem: &'a Memory) -> Self {
        Self {
            hart,
            mem,
            relaxes: 0,
            irq: HartInterrupts::default(),
            on_relax: None,
            log: std::vec::Vec::new(),
        }
    }

    pub fn peek(&self, addr: u32) -> u32 {
        self.mem.borrow().get(&addr).copied().unwrap_or(0)
    }
}

impl HartBus for MemBus<'_> {
    type Error = ();

    fn hart_id(&self) -> u32 {
        self.hart
    }

    fn load(&mut self, addr: u32) -> Result<u32, ()> {
        let v = self.peek(addr);
        self.log.push(('r', addr, v));
        Ok(v)
    }

    fn store(&mut self, addr: u32, value: u32) -> Result<(), ()> {
        self.log.push(('w', addr, value));
        self.mem.borrow_mut().insert(addr, value);
        Ok(())
    }

    fn load_reserved(&mut self, addr: u32) -> Result<u32, ()> {
        let v = self.peek(addr);
        self.log.push(('l', addr, v));
        Ok(v)
    }

    fn store_conditional(&mut self, addr: u32, value: u32) -> Result<bool, ()> {
        self.log.push(('s', addr, value));
        self.mem.borrow_mut().insert(addr, value);
        Ok(true)
    }

    fn relax(&mut self) -> Result<(), ()> {
        self.relaxes += 1;
        if let Some(hook) = self.on_relax.as_mut() {
            hook(&mut self.mem.borrow_mut(), self.relaxes);
        }
        Ok(())
    }

    fn interrupts(&mut self) -> Result<HartInterrupts, ()> {
        Ok(self.irq)
    }

    fn wait_for_interrupt(&mut self) -> Result<HartInterrupts, ()> {
        Ok(self.irq)
    }
}
