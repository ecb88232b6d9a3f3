use core::ops::{Deref, DerefMut};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{MappedMutexGuard, MutexGuard};
use embedded_hal_async::i2c::I2c;

use crate::device::{BoxedDev, DevAddr, I2cDev};
use crate::registry::Registry;

/// Borrowed access to a registered driver.
///
/// Holds the registry lock for as long as it lives, so the scanner cannot
/// evict the driver underneath it. Drop it before awaiting anything slow:
/// the scanner stalls until it is released.
pub struct DevRef<'a, M: RawMutex, B: I2c> {
    addr: DevAddr,
    driver: MappedMutexGuard<'a, M, BoxedDev<B>>,
}

impl<'a, M: RawMutex, B: I2c> DevRef<'a, M, B> {
    /// Narrow the registry guard down to the driver in slot `index`.
    pub(crate) fn new(
        registry: MutexGuard<'a, M, Registry<B>>,
        index: usize,
    ) -> Self {
        let mut addr = 0;
        let driver = MutexGuard::map(registry, |r| {
            let slot = &mut r.slots[index];
            addr = slot.addr;
            &mut slot.driver
        });
        Self { addr, driver }
    }

    /// Bus address of the referenced device.
    pub fn addr(&self) -> DevAddr {
        self.addr
    }
}

impl<M: RawMutex, B: I2c> Deref for DevRef<'_, M, B> {
    type Target = dyn I2cDev<B>;

    fn deref(&self) -> &Self::Target {
        &**self.driver
    }
}

impl<M: RawMutex, B: I2c> DerefMut for DevRef<'_, M, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.driver
    }
}
