use embassy_time::Duration;
use embedded_hal_async::i2c::I2c;
use heapless::Vec;

use crate::config::MAX_DEVICES;
use crate::device::{BoxedDev, DevAddr, DevModel, DriverFactory, I2cDev};
use crate::error::I2cDevError;

/// Set of 7-bit addresses, one bit per address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddrSet(u128);

impl AddrSet {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, addr: DevAddr) {
        if addr < 128 {
            self.0 |= 1 << addr;
        }
    }

    pub fn remove(&mut self, addr: DevAddr) {
        if addr < 128 {
            self.0 &= !(1 << addr);
        }
    }

    pub fn contains(&self, addr: DevAddr) -> bool {
        addr < 128 && self.0 & (1 << addr) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Addresses in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = DevAddr> + '_ {
        (0..128u8).filter(move |addr| self.contains(*addr))
    }
}

/// One responding address and, when a driver claimed it, that driver's
/// model tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegistryEntry {
    addr: DevAddr,
    model: Option<DevModel>,
    evict: bool,
}

impl RegistryEntry {
    pub fn addr(&self) -> DevAddr {
        self.addr
    }

    /// `None` when the address answers but no candidate claimed it.
    pub fn model(&self) -> Option<DevModel> {
        self.model
    }

    pub fn is_driven(&self) -> bool {
        self.model.is_some()
    }
}

/// A claimed driver and the address it owns.
pub(crate) struct Slot<B: I2c> {
    pub(crate) addr: DevAddr,
    pub(crate) driver: BoxedDev<B>,
}

/// Offer `addr` to each candidate in order. The first whose `init`
/// succeeds is returned; the others are dropped.
pub async fn claim<B: I2c>(
    bus: &mut B,
    addr: DevAddr,
    candidates: &[DriverFactory<B>],
    io_timeout: Duration,
) -> Option<BoxedDev<B>> {
    for factory in candidates {
        let mut candidate = factory();
        candidate.core_mut().set_timeout(io_timeout);
        if candidate.init(bus, addr).await {
            info!(
                "device {:#x} claimed as {:?}, polled every {} ticks",
                addr,
                candidate.model(),
                candidate.query_interval()
            );
            return Some(candidate);
        }
    }
    info!("device {:#x} present, no driver", addr);
    None
}

/// Table of known addresses, at most one entry per address.
///
/// Claimed drivers are kept apart from the entries so a driver can be
/// taken out for a slow bus transaction while the listing stays intact.
/// Normally owned by [`I2cDevManager`](crate::I2cDevManager), which holds it
/// behind its mutex and is the only code that mutates it.
pub struct Registry<B: I2c> {
    entries: Vec<RegistryEntry, MAX_DEVICES>,
    pub(crate) slots: Vec<Slot<B>, MAX_DEVICES>,
}

impl<B: I2c> Registry<B> {
    pub const fn new() -> Self {
        Self { entries: Vec::new(), slots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, addr: DevAddr) -> bool {
        self.entries.iter().any(|e| e.addr == addr)
    }

    /// Entries in discovery order.
    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    /// Driver bound to `addr`, unless none claimed it or it is currently
    /// being polled.
    pub fn driver(&self, addr: DevAddr) -> Option<&dyn I2cDev<B>> {
        self.slots
            .iter()
            .find(|s| s.addr == addr)
            .map(|s| -> &dyn I2cDev<B> { &*s.driver })
    }

    pub fn driver_mut(
        &mut self,
        addr: DevAddr,
    ) -> Option<&mut dyn I2cDev<B>> {
        self.slots
            .iter_mut()
            .find(|s| s.addr == addr)
            .map(|s| -> &mut dyn I2cDev<B> { &mut *s.driver })
    }

    /// Register a newly responding address.
    ///
    /// Addresses that already have an entry are left alone, driven or not,
    /// and no candidate is constructed for them. Otherwise the address is
    /// [`claim`]ed and recorded, with or without a driver, so later sweeps
    /// do not retry the candidates.
    ///
    /// Returns `true` when an entry was added.
    pub async fn found(
        &mut self,
        bus: &mut B,
        addr: DevAddr,
        candidates: &[DriverFactory<B>],
        io_timeout: Duration,
    ) -> bool {
        if self.contains(addr) {
            return false;
        }
        let driver = claim(bus, addr, candidates, io_timeout).await;
        self.register(addr, driver)
    }

    /// Record the outcome of a [`claim`]. Returns `true` when an entry was
    /// added.
    pub fn register(
        &mut self,
        addr: DevAddr,
        driver: Option<BoxedDev<B>>,
    ) -> bool {
        if self.contains(addr) {
            return false;
        }
        let entry = RegistryEntry {
            addr,
            model: driver.as_ref().map(|d| d.model()),
            evict: false,
        };
        if let Err(e) = self.insert(entry) {
            error!("cannot register {:#x}: {:?}", addr, e);
            return false;
        }
        if let Some(driver) = driver {
            // Never more slots than entries.
            if self.slots.push(Slot { addr, driver }).is_err() {
                error!("no driver slot for {:#x}", addr);
            }
        }
        true
    }

    fn insert(&mut self, entry: RegistryEntry) -> Result<(), I2cDevError> {
        self.entries.push(entry).map_err(|_| I2cDevError::RegistryFull)
    }

    /// Addresses whose driver is due on `tick`. Entries flagged for
    /// eviction are skipped.
    pub(crate) fn due(&self, tick: u32) -> Vec<DevAddr, MAX_DEVICES> {
        let evicted = |addr: DevAddr| {
            self.entries.iter().any(|e| e.addr == addr && e.evict)
        };
        self.slots
            .iter()
            .filter(|slot| {
                let interval = slot.driver.query_interval();
                interval != 0 && tick % interval == 0 && !evicted(slot.addr)
            })
            .map(|slot| slot.addr)
            .collect()
    }

    /// Take the driver for `addr` out of the table, returning it with its
    /// position for [`checkin`](Self::checkin).
    pub(crate) fn checkout(
        &mut self,
        addr: DevAddr,
    ) -> Option<(usize, BoxedDev<B>)> {
        let index = self.slots.iter().position(|s| s.addr == addr)?;
        Some((index, self.slots.remove(index).driver))
    }

    pub(crate) fn checkin(
        &mut self,
        index: usize,
        addr: DevAddr,
        driver: BoxedDev<B>,
    ) {
        let index = index.min(self.slots.len());
        if self.slots.insert(index, Slot { addr, driver }).is_err() {
            error!("no driver slot for {:#x}", addr);
        }
    }

    /// Flag every entry whose address did not answer the last sweep.
    pub fn mark_absent(&mut self, present: &AddrSet) {
        for entry in self.entries.iter_mut() {
            if !present.contains(entry.addr) {
                debug!("device {:#x} no longer responds", entry.addr);
                entry.evict = true;
            }
        }
    }

    /// Drop absent entries and drivers past their failure threshold.
    ///
    /// Returns `true` when anything was removed.
    pub fn collect_garbage(&mut self) -> bool {
        for slot in self.slots.iter().filter(|s| s.driver.needs_removal()) {
            if let Some(entry) =
                self.entries.iter_mut().find(|e| e.addr == slot.addr)
            {
                entry.evict = true;
            }
        }

        let before = self.entries.len();
        self.entries.retain(|entry| {
            if entry.evict {
                info!("removing device {:#x}", entry.addr);
            }
            !entry.evict
        });
        let entries = &self.entries;
        self.slots.retain(|slot| entries.iter().any(|e| e.addr == slot.addr));
        before != self.entries.len()
    }
}

impl<B: I2c> Default for Registry<B> {
    fn default() -> Self {
        Self::new()
    }
}
