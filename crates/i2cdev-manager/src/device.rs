use alloc::boxed::Box;

use embassy_time::{with_timeout, Duration};
use embedded_hal_async::i2c::{Error as _, I2c};
use futures::future::LocalBoxFuture;
use heapless::Vec;
use portable_atomic::{AtomicBool, Ordering};

use crate::config::{ERROR_THRESHOLD, IO_TIMEOUT};
use crate::error::I2cDevError;
use crate::message::MessageSink;

/// 7-bit bus address.
pub type DevAddr = u8;

/// Largest register pointer plus payload accepted by [`DevCore::i2c_write`].
const WRITE_BUF_LEN: usize = 32;

/// Tag identifying which driver claimed an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DevModel {
    NotSet,
    Max17055,
    Sht3x,
    Bh1750,
    Hmc5883l,
    Ads1110,
}

/// State and bus helpers shared by every driver.
///
/// Drivers embed one of these and expose it through [`I2cDev::core`]. All
/// transactions go through [`i2c_read`](Self::i2c_read) and
/// [`i2c_write`](Self::i2c_write), which apply the timeout and keep the
/// consecutive-failure tally that drives eviction.
#[derive(Debug)]
pub struct DevCore {
    addr: DevAddr,
    model: DevModel,
    query_interval: u32,
    error_count: u8,
    needs_removal: bool,
    locked: AtomicBool,
    timeout: Duration,
}

impl DevCore {
    pub const fn new() -> Self {
        Self {
            addr: 0,
            model: DevModel::NotSet,
            query_interval: 0,
            error_count: 0,
            needs_removal: false,
            locked: AtomicBool::new(false),
            timeout: IO_TIMEOUT,
        }
    }

    pub fn addr(&self) -> DevAddr {
        self.addr
    }

    /// Bind the core to the address under test. Called at the start of
    /// `init`, before any transaction.
    pub fn set_addr(&mut self, addr: DevAddr) {
        self.addr = addr;
    }

    pub fn model(&self) -> DevModel {
        self.model
    }

    pub fn set_model(&mut self, model: DevModel) {
        self.model = model;
    }

    /// Ticks between `update` calls; 0 means never polled.
    pub fn query_interval(&self) -> u32 {
        self.query_interval
    }

    pub fn set_query_interval(&mut self, interval: u32) {
        self.query_interval = interval;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn error_count(&self) -> u8 {
        self.error_count
    }

    pub fn needs_removal(&self) -> bool {
        self.needs_removal
    }

    /// Record a failed transaction.
    pub fn got_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
        if self.error_count >= ERROR_THRESHOLD && !self.needs_removal {
            warn!(
                "device {:#x} failed {} times in a row, scheduling removal",
                self.addr,
                self.error_count
            );
            self.needs_removal = true;
        }
    }

    /// Record a successful transaction; clears the failure tally.
    pub fn got_success(&mut self) {
        self.error_count = 0;
    }

    /// Raise the advisory lock. Non-essential readers should back off while
    /// it is set; it never blocks anyone.
    pub fn lock_device(&self) {
        self.locked.store(true, Ordering::Release);
    }

    pub fn unlock_device(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Write `reg` (may be empty) then read `data`, without touching the
    /// error tally.
    pub async fn try_read<B: I2c>(
        &self,
        bus: &mut B,
        reg: &[u8],
        data: &mut [u8],
    ) -> Result<(), I2cDevError> {
        let addr = self.addr;
        let transfer = async move {
            if reg.is_empty() {
                bus.read(addr, data).await
            } else {
                bus.write_read(addr, reg, data).await
            }
        };
        with_timeout(self.timeout, transfer)
            .await
            .map_err(|_| I2cDevError::Timeout)?
            .map_err(|e| I2cDevError::Bus(e.kind()))
    }

    /// Write `reg` followed by `data` in a single transfer, without touching
    /// the error tally.
    pub async fn try_write<B: I2c>(
        &self,
        bus: &mut B,
        reg: &[u8],
        data: &[u8],
    ) -> Result<(), I2cDevError> {
        let mut buf = Vec::<u8, WRITE_BUF_LEN>::new();
        buf.extend_from_slice(reg).map_err(|_| I2cDevError::Payload)?;
        buf.extend_from_slice(data).map_err(|_| I2cDevError::Payload)?;
        with_timeout(self.timeout, bus.write(self.addr, &buf))
            .await
            .map_err(|_| I2cDevError::Timeout)?
            .map_err(|e| I2cDevError::Bus(e.kind()))
    }

    /// Timed read with error accounting. Returns `true` on success.
    pub async fn i2c_read<B: I2c>(
        &mut self,
        bus: &mut B,
        reg: &[u8],
        data: &mut [u8],
    ) -> bool {
        let result = self.try_read(bus, reg, data).await;
        self.account(result)
    }

    /// Timed write with error accounting. Returns `true` on success.
    pub async fn i2c_write<B: I2c>(
        &mut self,
        bus: &mut B,
        reg: &[u8],
        data: &[u8],
    ) -> bool {
        let result = self.try_write(bus, reg, data).await;
        self.account(result)
    }

    fn account(&mut self, result: Result<(), I2cDevError>) -> bool {
        match result {
            Ok(()) => {
                self.got_success();
                true
            }
            Err(e) => {
                trace!("transfer to {:#x} failed: {:?}", self.addr, e);
                self.got_error();
                false
            }
        }
    }
}

impl Default for DevCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability every device driver provides to the manager.
///
/// The async operations return boxed futures so drivers can live in the
/// registry as trait objects.
pub trait I2cDev<B: I2c>: Send {
    fn core(&self) -> &DevCore;

    fn core_mut(&mut self) -> &mut DevCore;

    /// Positively identify and configure the device at `addr`.
    ///
    /// Returns `false` when the hardware is not this driver's, so the next
    /// candidate can try. On success the driver has set its model tag and
    /// query interval.
    fn init<'a>(
        &'a mut self,
        bus: &'a mut B,
        addr: DevAddr,
    ) -> LocalBoxFuture<'a, bool>;

    /// One polling cycle: read the device and publish what it reports.
    /// Failures are recorded in the core, never returned.
    fn update<'a>(
        &'a mut self,
        bus: &'a mut B,
        sink: &'a dyn MessageSink,
    ) -> LocalBoxFuture<'a, ()>;

    fn addr(&self) -> DevAddr {
        self.core().addr()
    }

    fn model(&self) -> DevModel {
        self.core().model()
    }

    fn query_interval(&self) -> u32 {
        self.core().query_interval()
    }

    fn needs_removal(&self) -> bool {
        self.core().needs_removal()
    }

    fn lock_device(&self) {
        self.core().lock_device()
    }

    fn unlock_device(&self) {
        self.core().unlock_device()
    }

    fn is_locked(&self) -> bool {
        self.core().is_locked()
    }
}

/// Owned driver as stored in the registry.
pub type BoxedDev<B> = Box<dyn I2cDev<B>>;

/// Constructor for one candidate driver type.
pub type DriverFactory<B> = fn() -> BoxedDev<B>;

/// Generic factory for any default-constructible driver.
pub fn boxed_driver<B, D>() -> BoxedDev<B>
where
    B: I2c + 'static,
    D: I2cDev<B> + Default + 'static,
{
    Box::new(D::default())
}
