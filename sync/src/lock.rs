//! Spinlock and recursive mutex for SMP synchronization.
//!
//! Both live in ordinary shared memory and are driven purely through
//! [`HartBus`] operations. Harts may have incoherent caches, so every write
//! that publishes a release goes through the conditional-store path, which is
//! always uncached.

use crate::bus::HartBus;

/// Spinlock word value: free.
pub const SPINLOCK_UNLOCKED: u32 = 0;
/// Spinlock word value: held.
pub const SPINLOCK_LOCKED: u32 = 1;
/// Mutex owner value when nobody holds it.
pub const MUTEX_FREE: u32 = u32::MAX;

/// A mutual exclusion primitive based on spinning.
///
/// The lock is a single 32-bit word at `addr`.
///
/// # Example
///
/// ```ignore
/// let counter_lock = SpinLock::at(0x8000_0100);
/// counter_lock.with(bus, |bus| {
///     let v = bus.load(0x8000_0104)?;
///     bus.store(0x8000_0104, v + 1)
/// })?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinLock {
    addr: u32,
}

impl SpinLock {
    /// Spinlock whose word lives at `addr`.
    pub const fn at(addr: u32) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// Put the lock word into the unlocked state.
    pub fn init<B: HartBus + ?Sized>(&self, bus: &mut B) -> Result<(), B::Error> {
        bus.store(self.addr, SPINLOCK_UNLOCKED)
    }

    /// Acquire the lock, spinning until available.
    ///
    /// Each attempt swaps in `LOCKED`. Seeing `LOCKED` come back means
    /// somebody else holds it; seeing `UNLOCKED` means the caller does now.
    pub fn lock<B: HartBus + ?Sized>(&self, bus: &mut B) -> Result<(), B::Error> {
        let mut spins = 0u32;
        while bus.amo_swap(self.addr, SPINLOCK_LOCKED)? == SPINLOCK_LOCKED {
            // No coherency between caches: relax the bus with a nop.
            bus.relax()?;
            spins = spins.wrapping_add(1);
        }
        if spins > 0 {
            log::trace!(
                "hart {}: spinlock {:#010x} acquired after {} spins",
                bus.hart_id(),
                self.addr,
                spins
            );
        }
        Ok(())
    }

    /// Try to acquire the lock without spinning.
    ///
    /// Returns `true` if the caller now holds the lock.
    pub fn try_lock<B: HartBus + ?Sized>(&self, bus: &mut B) -> Result<bool, B::Error> {
        Ok(bus.amo_swap(self.addr, SPINLOCK_LOCKED)? == SPINLOCK_UNLOCKED)
    }

    /// Release the lock.
    ///
    /// A plain store could sit in a local cache, so the conditional store is
    /// reused as an uncached write.
    pub fn unlock<B: HartBus + ?Sized>(&self, bus: &mut B) -> Result<(), B::Error> {
        bus.store_conditional(self.addr, SPINLOCK_UNLOCKED)?;
        Ok(())
    }

    /// Check if the lock is currently held (for debugging).
    pub fn is_locked<B: HartBus + ?Sized>(&self, bus: &mut B) -> Result<bool, B::Error> {
        Ok(bus.load(self.addr)? == SPINLOCK_LOCKED)
    }

    /// Run `f` with the lock held.
    ///
    /// The lock is released even when `f` fails; `f`'s error wins.
    pub fn with<B, R, F>(&self, bus: &mut B, f: F) -> Result<R, B::Error>
    where
        B: HartBus + ?Sized,
        F: FnOnce(&mut B) -> Result<R, B::Error>,
    {
        self.lock(bus)?;
        let result = f(bus);
        let released = self.unlock(bus);
        let value = result?;
        released?;
        Ok(value)
    }
}

/// Reentrant lock that tracks its owning hart.
///
/// Memory layout (three words from `base`):
///
/// | Offset | Field |
/// |---|---|
/// | +0 | guarding spinlock word |
/// | +4 | owner hart id, [`MUTEX_FREE`] when free |
/// | +8 | recursion count |
///
/// The guarding spinlock only protects the two fields; it is never held
/// while waiting for another owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutex {
    guard: SpinLock,
}

impl Mutex {
    /// Bytes occupied in memory.
    pub const SIZE: u32 = 12;

    pub const fn at(base: u32) -> Self {
        Self {
            guard: SpinLock::at(base),
        }
    }

    pub fn base(&self) -> u32 {
        self.guard.addr()
    }

    fn owner_addr(&self) -> u32 {
        self.guard.addr() + 4
    }

    fn count_addr(&self) -> u32 {
        self.guard.addr() + 8
    }

    /// Write the free state (unlocked, no owner, zero depth).
    pub fn init<B: HartBus + ?Sized>(&self, bus: &mut B) -> Result<(), B::Error> {
        bus.store(self.owner_addr(), MUTEX_FREE)?;
        bus.store(self.count_addr(), 0)?;
        self.guard.init(bus)
    }

    /// Take the mutex, blocking while another hart owns it.
    ///
    /// Taking a mutex the caller already owns only increments the depth.
    pub fn acquire<B: HartBus + ?Sized>(&self, bus: &mut B) -> Result<(), B::Error> {
        let me = bus.hart_id();
        self.guard.lock(bus)?;

        let mut owner = bus.load(self.owner_addr())?;
        if owner == me {
            let depth = bus.load(self.count_addr())?;
            bus.store(self.count_addr(), depth.wrapping_add(1))?;
            return self.guard.unlock(bus);
        }

        while owner != MUTEX_FREE {
            // Never wait with the guard held, the owner needs it to release.
            self.guard.unlock(bus)?;
            bus.relax()?;
            self.guard.lock(bus)?;
            owner = bus.load(self.owner_addr())?;
        }

        bus.store(self.owner_addr(), me)?;
        bus.store(self.count_addr(), 1)?;
        log::trace!("hart {}: mutex {:#010x} taken", me, self.base());
        self.guard.unlock(bus)
    }

    /// Give the mutex back once.
    ///
    /// Ownership ends when the depth returns to zero. A release from a hart
    /// that does not own the mutex changes nothing.
    pub fn release<B: HartBus + ?Sized>(&self, bus: &mut B) -> Result<(), B::Error> {
        let me = bus.hart_id();
        self.guard.lock(bus)?;

        let owner = bus.load(self.owner_addr())?;
        if owner == me {
            let depth = bus.load(self.count_addr())?.saturating_sub(1);
            bus.store(self.count_addr(), depth)?;
            if depth == 0 {
                bus.store(self.owner_addr(), MUTEX_FREE)?;
                log::trace!("hart {}: mutex {:#010x} given", me, self.base());
            }
        } else {
            log::debug!(
                "hart {}: release of mutex {:#010x} owned by {:#x} ignored",
                me,
                self.base(),
                owner
            );
        }

        self.guard.unlock(bus)
    }

    /// Current owner, `None` when free.
    pub fn owner<B: HartBus + ?Sized>(&self, bus: &mut B) -> Result<Option<u32>, B::Error> {
        let owner = bus.load(self.owner_addr())?;
        Ok((owner != MUTEX_FREE).then_some(owner))
    }

    /// Current recursion depth.
    pub fn depth<B: HartBus + ?Sized>(&self, bus: &mut B) -> Result<u32, B::Error> {
        bus.load(self.count_addr())
    }
}
