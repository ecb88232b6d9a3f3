//! TI ADS1110 16-bit ADC wired to the battery through a 1:2 divider.
use alloc::boxed::Box;

use embedded_hal_async::i2c::I2c;
use futures::future::LocalBoxFuture;
use i2cdev_manager::{
    battery_valid, BatteryStateData, DevAddr, DevCore, DevModel, I2cDev,
    MessageSink,
};

pub const ADDR: DevAddr = 0x48;

const QUERY_INTERVAL: u32 = 3;

/// Continuous conversion, 15 SPS (16 bit), PGA 1.
const CONFIG: u8 = 0x0C;
/// Config bits that read back as written; bit 7 is the ready flag.
const CONFIG_MASK: u8 = 0x1F;

/// Cell voltage treated as empty, in mV.
const EMPTY_MV: u16 = 3000;
/// Cell voltage treated as full, in mV.
const FULL_MV: u16 = 4170;

/// Linear charge estimate from the cell voltage.
pub fn percent_from_voltage(voltage_mv: u16) -> u8 {
    let clamped = voltage_mv.clamp(EMPTY_MV, FULL_MV);
    (u32::from(clamped - EMPTY_MV) * 100 / u32::from(FULL_MV - EMPTY_MV)) as u8
}

#[derive(Default)]
pub struct Ads1110 {
    core: DevCore,
}

impl Ads1110 {
    /// Battery voltage in mV, or `None` while the device is locked or the
    /// read fails.
    pub async fn read_voltage<B: I2c>(&mut self, bus: &mut B) -> Option<u16> {
        if self.core.is_locked() {
            return None;
        }
        let mut raw = [0u8; 3];
        if !self.core.i2c_read(bus, &[], &mut raw).await {
            return None;
        }
        let code = i16::from_be_bytes([raw[0], raw[1]]).max(0) as u16;
        // 2.048 V full scale over 32768 codes, doubled by the divider.
        Some(code / 8)
    }
}

impl<B: I2c> I2cDev<B> for Ads1110 {
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
            if !self.core.i2c_write(bus, &[], &[CONFIG]).await {
                return false;
            }

            let mut readback = [0u8; 3];
            if !self.core.i2c_read(bus, &[], &mut readback).await
                || readback[2] & CONFIG_MASK != CONFIG
            {
                return false;
            }

            self.core.set_model(DevModel::Ads1110);
            self.core.set_query_interval(QUERY_INTERVAL);
            true
        })
    }

    fn update<'a>(
        &'a mut self,
        bus: &'a mut B,
        sink: &'a dyn MessageSink,
    ) -> LocalBoxFuture<'a, ()> {
        Box::pin(async move {
            let Some(voltage_mv) = self.read_voltage(bus).await else {
                return;
            };
            let state = BatteryStateData {
                valid_mask: battery_valid::VOLTAGE,
                percent: percent_from_voltage(voltage_mv),
                on_charger: false,
                voltage_mv,
            };
            sink.send_message(state.into());
        })
    }
}
