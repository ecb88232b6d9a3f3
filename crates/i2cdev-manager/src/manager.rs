use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{with_timeout, Instant, Timer};
use embedded_hal_async::i2c::I2c;
use heapless::Vec;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::{ManagerConfig, MAX_DEVICES};
use crate::device::{DevAddr, DevModel, DriverFactory};
use crate::handle::DevRef;
use crate::message::{Message, MessageSink};
use crate::registry::{claim, AddrSet, Registry};

/// Owns the device registry and drives discovery, polling and eviction.
///
/// Construct one at startup (it is `const`, so a `static` works), spawn a
/// task that awaits [`run`](Self::run), and hand `&I2cDevManager` to every
/// consumer. The scanner is the only writer; every other method is a
/// guarded read or a configuration knob.
///
/// Futures returned by the scanner hold boxed driver futures and are not
/// `Send`; run the task on a thread-mode or interrupt executor.
pub struct I2cDevManager<'a, M: RawMutex, B: I2c, S: MessageSink> {
    bus: &'a Mutex<M, B>,
    sink: &'a S,
    candidates: &'a [DriverFactory<B>],
    config: ManagerConfig,
    registry: Mutex<M, Registry<B>>,
    tick: AtomicU32,
    force_scan: AtomicBool,
    autoscan_interval: AtomicU32,
}

impl<'a, M: RawMutex, B: I2c, S: MessageSink> I2cDevManager<'a, M, B, S> {
    /// Create a manager for `bus`.
    ///
    /// `candidates` is tried in order for every new address: put drivers
    /// whose identification is most specific first.
    pub const fn new(
        bus: &'a Mutex<M, B>,
        sink: &'a S,
        candidates: &'a [DriverFactory<B>],
        config: ManagerConfig,
    ) -> Self {
        Self {
            bus,
            sink,
            candidates,
            registry: Mutex::new(Registry::new()),
            tick: AtomicU32::new(0),
            force_scan: AtomicBool::new(false),
            autoscan_interval: AtomicU32::new(config.autoscan_interval),
            config,
        }
    }

    /// The shared bus, for callers that issue secondary queries on a driver
    /// obtained from [`get_dev_by_addr`](Self::get_dev_by_addr).
    pub fn bus(&self) -> &'a Mutex<M, B> {
        self.bus
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Number of ticks executed so far (wraps).
    pub fn current_tick(&self) -> u32 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Scanner loop. Never returns.
    ///
    /// Each iteration runs one [`tick`](Self::tick) then sleeps for the rest
    /// of the tick period, but never less than `min_sleep`.
    pub async fn run(&self) -> ! {
        info!(
            "device scanner started, autoscan every {} ticks",
            self.get_autoscan_interval()
        );
        loop {
            let start = Instant::now();
            self.tick().await;
            let elapsed = start.elapsed();

            if elapsed > self.config.tick_period {
                warn!("scanner tick overran: {} ms", elapsed.as_millis());
            }
            Timer::after(self.config.pause_after(elapsed)).await;
        }
    }

    /// One scanner iteration: optional sweep and claim, polling, eviction,
    /// then at most one [`Message::DevListChanged`].
    ///
    /// Returns whether the registry changed shape. The tick counter is
    /// advanced on exit; `tick % interval` scheduling stays correct across
    /// wraparound so the counter is left to wrap.
    pub async fn tick(&self) -> bool {
        let tick = self.tick.load(Ordering::Relaxed);
        let mut changed = false;

        if self.scan_due(tick) {
            let present = self.scan_bus().await;
            trace!("sweep found {} responding addresses", present.len());

            for addr in present.iter() {
                if self.registry.lock().await.contains(addr) {
                    continue;
                }
                let driver = {
                    let mut bus = self.bus.lock().await;
                    let timeout = self.config.io_timeout;
                    claim(&mut *bus, addr, self.candidates, timeout).await
                };
                changed |= self.registry.lock().await.register(addr, driver);
            }
            self.registry.lock().await.mark_absent(&present);
        }

        self.poll_drivers(tick).await;

        changed |= self.registry.lock().await.collect_garbage();

        if changed {
            debug!("device list changed on tick {}", tick);
            self.sink.send_message(Message::DevListChanged);
        }

        self.tick.fetch_add(1, Ordering::Relaxed);
        changed
    }

    /// Consumes a pending manual scan request.
    fn scan_due(&self, tick: u32) -> bool {
        if self.force_scan.swap(false, Ordering::AcqRel) {
            return true;
        }
        let interval = self.autoscan_interval.load(Ordering::Relaxed);
        interval != 0 && tick % interval == 0
    }

    /// Probe every configured address with a one byte read.
    async fn scan_bus(&self) -> AddrSet {
        let mut present = AddrSet::new();
        for addr in self.config.sweep_range() {
            let mut buf = [0u8; 1];
            let mut bus = self.bus.lock().await;
            if let Ok(Ok(())) =
                with_timeout(self.config.probe_timeout, bus.read(addr, &mut buf))
                    .await
            {
                present.insert(addr);
            }
        }
        present
    }

    /// Call `update` on every driver whose interval divides `tick`. Entries
    /// that missed the current sweep are skipped.
    ///
    /// Each driver is taken out of the registry while it talks to the bus,
    /// so lookups and listings only wait for the bookkeeping.
    async fn poll_drivers(&self, tick: u32) {
        let due = self.registry.lock().await.due(tick);
        for addr in due {
            let Some((index, mut driver)) =
                self.registry.lock().await.checkout(addr)
            else {
                continue;
            };
            {
                let mut bus = self.bus.lock().await;
                driver.update(&mut *bus, self.sink).await;
            }
            self.registry.lock().await.checkin(index, addr, driver);
        }
    }

    /// Driver bound to `addr`.
    ///
    /// `None` while the scanner is polling that driver.
    pub async fn get_dev_by_addr(
        &self,
        addr: DevAddr,
    ) -> Option<DevRef<'_, M, B>> {
        let registry = self.registry.lock().await;
        let index = registry.slots.iter().position(|s| s.addr == addr)?;
        Some(DevRef::new(registry, index))
    }

    /// First driver whose model tag is `model`, skipping one that is being
    /// polled.
    pub async fn get_dev_by_model(
        &self,
        model: DevModel,
    ) -> Option<DevRef<'_, M, B>> {
        let registry = self.registry.lock().await;
        let index = registry.entries().find_map(|e| {
            if e.model() != Some(model) {
                return None;
            }
            registry.slots.iter().position(|s| s.addr == e.addr())
        })?;
        Some(DevRef::new(registry, index))
    }

    /// Snapshot of the model tags of all driven entries.
    pub async fn get_dev_list_by_model(&self) -> Vec<DevModel, MAX_DEVICES> {
        let registry = self.registry.lock().await;
        registry.entries().filter_map(|e| e.model()).collect()
    }

    /// Snapshot of every registered address, driven or not.
    pub async fn get_dev_list_by_addr(&self) -> Vec<DevAddr, MAX_DEVICES> {
        let registry = self.registry.lock().await;
        registry.entries().map(|e| e.addr()).collect()
    }

    pub async fn device_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Ticks between automatic sweeps; 0 disables them.
    ///
    /// Screens that want fresh listings may shorten this while visible and
    /// must restore the previous value themselves.
    pub fn set_autoscan_interval(&self, interval: u32) {
        info!("autoscan interval set to {} ticks", interval);
        self.autoscan_interval.store(interval, Ordering::Relaxed);
    }

    pub fn get_autoscan_interval(&self) -> u32 {
        self.autoscan_interval.load(Ordering::Relaxed)
    }

    /// Request a sweep on the next tick regardless of the autoscan interval.
    pub fn manual_scan(&self) {
        self.force_scan.store(true, Ordering::Release);
    }
}
