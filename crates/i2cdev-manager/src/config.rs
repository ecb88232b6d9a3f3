use core::ops::RangeInclusive;

use embassy_time::Duration;

use crate::device::DevAddr;

/// Upper bound on registry entries: one per valid 7-bit address.
pub const MAX_DEVICES: usize = 127;

/// Consecutive I/O failures after which a driver is flagged for removal.
pub const ERROR_THRESHOLD: u8 = 5;

/// Timeout applied to every driver transaction.
pub const IO_TIMEOUT: Duration = Duration::from_millis(150);

/// Timeout applied to each address probe during a bus sweep.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(10);

/// Lowest address a sweep visits; 0 is the general call address.
pub const FIRST_ADDRESS: DevAddr = 1;

/// Highest 7-bit address.
pub const LAST_ADDRESS: DevAddr = 127;

/// Tunables for [`I2cDevManager`](crate::I2cDevManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ManagerConfig {
    /// Per-address probe timeout for bus sweeps.
    pub probe_timeout: Duration,
    /// Timeout handed to each driver for its own transactions.
    pub io_timeout: Duration,
    /// Nominal length of one scanner tick.
    pub tick_period: Duration,
    /// Minimum sleep between ticks, even when a tick overruns.
    pub min_sleep: Duration,
    /// Ticks between automatic sweeps at startup; 0 disables autoscan.
    pub autoscan_interval: u32,
    /// First address probed by a sweep.
    pub first_address: DevAddr,
    /// Last address probed by a sweep (inclusive).
    pub last_address: DevAddr,
}

impl ManagerConfig {
    pub const fn new() -> Self {
        Self {
            probe_timeout: PROBE_TIMEOUT,
            io_timeout: IO_TIMEOUT,
            tick_period: Duration::from_millis(1000),
            min_sleep: Duration::from_millis(50),
            autoscan_interval: 5,
            first_address: FIRST_ADDRESS,
            last_address: LAST_ADDRESS,
        }
    }

    /// Addresses a sweep visits, clamped to `FIRST_ADDRESS..=LAST_ADDRESS`.
    pub fn sweep_range(&self) -> RangeInclusive<DevAddr> {
        self.first_address.max(FIRST_ADDRESS)
            ..=self.last_address.min(LAST_ADDRESS)
    }

    /// Sleep after a tick that took `elapsed`: the rest of the tick period,
    /// but never less than `min_sleep`.
    pub fn pause_after(&self, elapsed: Duration) -> Duration {
        match self.tick_period.checked_sub(elapsed) {
            Some(rest) if rest > self.min_sleep => rest,
            _ => self.min_sleep,
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}
