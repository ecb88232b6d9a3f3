//! ROHM BH1750 ambient light sensor.
use alloc::boxed::Box;

use embedded_hal_async::i2c::I2c;
use futures::future::LocalBoxFuture;
use i2cdev_manager::{
    DevAddr, DevCore, DevModel, I2cDev, LightData, MessageSink,
};

pub const ADDRS: [DevAddr; 2] = [0x23, 0x5C];

const QUERY_INTERVAL: u32 = 5;

const CMD_POWER_ON: u8 = 0x01;
/// Continuous, 1 lx resolution.
const CMD_CONT_H_RES: u8 = 0x10;

/// Counts to lux at the default measurement time (divide by 1.2).
pub fn lux_from_raw(raw: u16) -> u16 {
    (u32::from(raw) * 5 / 6) as u16
}

#[derive(Default)]
pub struct Bh1750 {
    core: DevCore,
}

impl<B: I2c> I2cDev<B> for Bh1750 {
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
            if !ADDRS.contains(&addr) {
                return false;
            }
            self.core.set_addr(addr);
            if !self.core.i2c_write(bus, &[CMD_POWER_ON], &[]).await
                || !self.core.i2c_write(bus, &[CMD_CONT_H_RES], &[]).await
            {
                return false;
            }
            self.core.set_model(DevModel::Bh1750);
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
            let mut raw = [0u8; 2];
            if self.core.i2c_read(bus, &[], &mut raw).await {
                let lux = lux_from_raw(u16::from_be_bytes(raw));
                sink.send_message(LightData { lux }.into());
            }
        })
    }
}
