//! MAX17055 ModelGauge m5 fuel gauge.
//!
//! Registers are 16 bits wide and transferred LSB first.
use alloc::boxed::Box;

use embassy_time::Timer;
use embedded_hal_async::i2c::I2c;
use futures::future::LocalBoxFuture;
use i2cdev_manager::{
    battery_valid, BatteryStateData, DevAddr, DevCore, DevModel, I2cDev,
    MessageSink,
};

pub const ADDR: DevAddr = 0x36;

/// Ticks between battery updates.
const QUERY_INTERVAL: u32 = 3;

/// Expected content of the DevName register.
const DEV_NAME_ID: u16 = 0x4010;

/// Reported when the gauge has no usable charge estimate.
pub const PERCENT_UNKNOWN: u8 = 102;

/// Current above which the battery is considered charging, in mA.
const CHARGING_THRESHOLD_MA: i32 = 25;

/// Tries while waiting for a model refresh to complete.
const MODEL_REFRESH_POLLS: usize = 10;

mod reg {
    pub const STATUS: u8 = 0x00;
    pub const REP_CAP: u8 = 0x05;
    pub const REP_SOC: u8 = 0x06;
    pub const TEMP: u8 = 0x08;
    pub const CURRENT: u8 = 0x0A;
    pub const AVG_CURRENT: u8 = 0x0B;
    pub const TTE: u8 = 0x11;
    pub const CYCLES: u8 = 0x17;
    pub const DESIGN_CAP: u8 = 0x18;
    pub const AVG_VCELL: u8 = 0x19;
    pub const ICHG_TERM: u8 = 0x1E;
    pub const TTF: u8 = 0x20;
    pub const DEV_NAME: u8 = 0x21;
    pub const FULL_CAP: u8 = 0x35;
    pub const V_EMPTY: u8 = 0x3A;
    pub const USER_MEM1: u8 = 0x40;
    pub const DQ_ACC: u8 = 0x45;
    pub const DP_ACC: u8 = 0x46;
    pub const COMMAND: u8 = 0x60;
    pub const HIB_CFG: u8 = 0xBA;
    pub const CONFIG2: u8 = 0xBB;
    pub const R_SENSE: u8 = 0xD0;
    pub const MODEL_CFG: u8 = 0xDB;
}

/// Status register bit set after a power-on reset.
const STATUS_POR: u16 = 1 << 1;

/// ModelCfg bit that stays set until a model refresh completes.
const MODEL_CFG_REFRESH: u16 = 1 << 15;

/// Custom battery model, written in order on first initialization.
const CUSTOM_MODEL: [(u8, u16); 11] = [
    (reg::R_SENSE, 0x03E8),
    (reg::MODEL_CFG, 0x0000),
    (reg::REP_CAP, 0x0000),
    (reg::DESIGN_CAP, 0x1388),
    (reg::DQ_ACC, 0x009C),
    (reg::ICHG_TERM, 0x03C0),
    (reg::V_EMPTY, 0x9661),
    (reg::COMMAND, 0x0090),
    (reg::DP_ACC, 0x0561),
    (reg::MODEL_CFG, MODEL_CFG_REFRESH),
    // Marks the gauge as configured across MCU resets.
    (reg::USER_MEM1, 0x0001),
];

/// Scaled quantities readable through [`Max17055::read_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Value {
    /// Average cell voltage, V.
    AvgVoltage,
    /// Instantaneous current, mA.
    Current,
    /// Average current, mA.
    AvgCurrent,
    /// Reported state of charge, %.
    StateOfCharge,
    /// Die temperature, °C.
    Temperature,
    /// Reported remaining capacity, mAh.
    RemainingCapacity,
    /// Full capacity, mAh.
    FullCapacity,
    Cycles,
    /// Time to empty, hours.
    TimeToEmpty,
    /// Time to full, hours.
    TimeToFull,
}

impl Value {
    /// Register, LSB weight and signedness.
    const fn register(self) -> (u8, f32, bool) {
        match self {
            Self::AvgVoltage => (reg::AVG_VCELL, 0.000078125, false),
            Self::Current => (reg::CURRENT, 0.15625, true),
            Self::AvgCurrent => (reg::AVG_CURRENT, 0.15625, true),
            Self::StateOfCharge => (reg::REP_SOC, 0.00390625, false),
            Self::Temperature => (reg::TEMP, 0.00390625, true),
            Self::RemainingCapacity => (reg::REP_CAP, 0.5, false),
            Self::FullCapacity => (reg::FULL_CAP, 0.5, false),
            Self::Cycles => (reg::CYCLES, 0.01, false),
            Self::TimeToEmpty => (reg::TTE, 0.0015625, false),
            Self::TimeToFull => (reg::TTF, 0.0015625, false),
        }
    }
}

#[derive(Default)]
pub struct Max17055 {
    core: DevCore,
}

impl Max17055 {
    async fn read_register<B: I2c>(
        &mut self,
        bus: &mut B,
        register: u8,
    ) -> Option<u16> {
        let mut raw = [0u8; 2];
        self.core
            .i2c_read(bus, &[register], &mut raw)
            .await
            .then(|| u16::from_le_bytes(raw))
    }

    async fn write_register<B: I2c>(
        &mut self,
        bus: &mut B,
        register: u8,
        value: u16,
    ) -> bool {
        let ok = self
            .core
            .i2c_write(bus, &[register], &value.to_le_bytes())
            .await;
        // The gauge needs a moment between consecutive writes.
        Timer::after_millis(1).await;
        ok
    }

    async fn detect<B: I2c>(&mut self, bus: &mut B) -> bool {
        if self.read_register(bus, reg::DEV_NAME).await == Some(DEV_NAME_ID) {
            return true;
        }
        matches!(
            self.read_register(bus, reg::STATUS).await,
            Some(status) if status != 0xFFFF && status != 0x0000
        )
    }

    async fn needs_initialization<B: I2c>(&mut self, bus: &mut B) -> bool {
        self.read_register(bus, reg::USER_MEM1).await == Some(0)
    }

    async fn full_reset_and_init<B: I2c>(&mut self, bus: &mut B) -> bool {
        if !self.write_register(bus, reg::CONFIG2, 0x0000).await {
            return false;
        }
        for (register, value) in CUSTOM_MODEL {
            if !self.write_register(bus, register, value).await {
                return false;
            }
        }
        self.load_model(bus).await && self.clear_por(bus).await
    }

    /// Wake the gauge, wait for the model refresh, then restore hibernation.
    async fn load_model<B: I2c>(&mut self, bus: &mut B) -> bool {
        let Some(hib_cfg) = self.read_register(bus, reg::HIB_CFG).await else {
            return false;
        };
        if !self.write_register(bus, reg::HIB_CFG, 0x0000).await
            || !self.write_register(bus, reg::COMMAND, 0x0000).await
        {
            return false;
        }

        for _ in 0..MODEL_REFRESH_POLLS {
            match self.read_register(bus, reg::MODEL_CFG).await {
                Some(cfg) if cfg & MODEL_CFG_REFRESH == 0 => break,
                _ => Timer::after_millis(10).await,
            }
        }

        self.write_register(bus, reg::HIB_CFG, hib_cfg).await
    }

    async fn clear_por<B: I2c>(&mut self, bus: &mut B) -> bool {
        let Some(status) = self.read_register(bus, reg::STATUS).await else {
            return false;
        };
        self.write_register(bus, reg::STATUS, status & !STATUS_POR).await
    }

    /// Discard everything the gauge has learned and reload the custom
    /// model. Holds the advisory lock for the duration.
    pub async fn reset_learned<B: I2c>(&mut self, bus: &mut B) -> bool {
        self.core.lock_device();
        let ok = self.full_reset_and_init(bus).await;
        self.core.unlock_device();
        ok
    }

    /// Read one scaled quantity. Yields `None` while the device is locked
    /// or on a bus error.
    pub async fn read_value<B: I2c>(
        &mut self,
        bus: &mut B,
        value: Value,
    ) -> Option<f32> {
        if self.core.is_locked() {
            return None;
        }
        let (register, scale, signed) = value.register();
        let raw = self.read_register(bus, register).await?;
        Some(if signed {
            f32::from(raw as i16) * scale
        } else {
            f32::from(raw) * scale
        })
    }

    /// Snapshot for the battery widget; `None` on a bus error.
    pub async fn battery_info<B: I2c>(
        &mut self,
        bus: &mut B,
    ) -> Option<BatteryStateData> {
        let status = self.read_register(bus, reg::STATUS).await?;
        // 78.125 µV per LSB
        let raw_voltage = self.read_register(bus, reg::AVG_VCELL).await?;
        let voltage_mv = (u32::from(raw_voltage) * 5 / 64) as u16;

        let implausible = (status == 0 && voltage_mv == 0)
            || (status == STATUS_POR && (voltage_mv == 3600 || voltage_mv == 0));
        if implausible {
            return Some(BatteryStateData {
                valid_mask: 0,
                percent: PERCENT_UNKNOWN,
                on_charger: false,
                voltage_mv,
            });
        }

        let soc = self.read_register(bus, reg::REP_SOC).await?;
        let percent = (soc >> 8).min(100) as u8;
        // 156.25 µA per LSB
        let raw_current = self.read_register(bus, reg::CURRENT).await?;
        let current_ma = i32::from(raw_current as i16) * 5 / 32;

        Some(BatteryStateData {
            valid_mask: battery_valid::ALL,
            percent,
            on_charger: current_ma >= CHARGING_THRESHOLD_MA,
            voltage_mv,
        })
    }
}

impl<B: I2c> I2cDev<B> for Max17055 {
    fn core(&self) -> &DevCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DevCore {
        &mut self.core
    }

    fn init<'a>(
        &'a mut self,
        bus: &'a mut B,
        addr: DevAddr,
    ) -> LocalBoxFuture<'a, bool> {
        Box::pin(async move {
            if addr != ADDR {
                return false;
            }
            self.core.set_addr(addr);
            if !self.detect(bus).await {
                return false;
            }

            let mut ok = true;
            if self.needs_initialization(bus).await {
                info!("max17055: loading battery model");
                ok = self.full_reset_and_init(bus).await;
            }
            // Hibernation stays off regardless of what the gauge remembers.
            if !self.write_register(bus, reg::HIB_CFG, 0x0000).await {
                warn!("max17055: could not disable hibernation");
            }

            self.core.set_model(DevModel::Max17055);
            self.core.set_query_interval(QUERY_INTERVAL);
            ok
        })
    }

    fn update<'a>(
        &'a mut self,
        bus: &'a mut B,
        sink: &'a dyn MessageSink,
    ) -> LocalBoxFuture<'a, ()> {
        Box::pin(async move {
            if let Some(state) = self.battery_info(bus).await {
                sink.send_message(state.into());
            }
        })
    }
}
