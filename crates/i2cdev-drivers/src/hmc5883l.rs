//! Honeywell HMC5883L three-axis magnetometer, used as a compass.
use alloc::boxed::Box;
use core::f32::consts::PI;

use embedded_hal_async::i2c::I2c;
use futures::future::LocalBoxFuture;
use i2cdev_manager::{
    DevAddr, DevCore, DevModel, I2cDev, MessageSink, OrientationData,
};
use micromath::F32Ext;

pub const ADDR: DevAddr = 0x1E;

const QUERY_INTERVAL: u32 = 1;

/// The sensor cannot measure tilt.
pub const TILT_UNKNOWN: i16 = 400;

/// Axis value reported on ADC overflow.
const OVERFLOW: i16 = -4096;

const IDENTIFICATION: &[u8; 3] = b"H43";

mod reg {
    pub const CONFIG_A: u8 = 0x00;
    pub const CONFIG_B: u8 = 0x01;
    pub const MODE: u8 = 0x02;
    pub const DATA_X_MSB: u8 = 0x03;
    pub const IDENT_A: u8 = 0x0A;
}

/// 8-sample average at 15 Hz, gain 1.3 Ga, continuous measurement.
const SETUP: [(u8, u8); 3] =
    [(reg::CONFIG_A, 0x70), (reg::CONFIG_B, 0x20), (reg::MODE, 0x00)];

/// Compass heading in whole degrees, 0..360, from the horizontal field.
pub fn heading(x: i16, y: i16) -> u16 {
    let mut degrees = f32::from(y).atan2(f32::from(x)) * 180.0 / PI;
    if degrees < 0.0 {
        degrees += 360.0;
    }
    (degrees + 0.5) as u16 % 360
}

#[derive(Default)]
pub struct Hmc5883l {
    core: DevCore,
}

impl<B: I2c> I2cDev<B> for Hmc5883l {
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

            let mut ident = [0u8; 3];
            if !self.core.i2c_read(bus, &[reg::IDENT_A], &mut ident).await
                || &ident != IDENTIFICATION
            {
                return false;
            }
            for (register, value) in SETUP {
                if !self.core.i2c_write(bus, &[register], &[value]).await {
                    return false;
                }
            }

            self.core.set_model(DevModel::Hmc5883l);
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
            let mut raw = [0u8; 6];
            if !self.core.i2c_read(bus, &[reg::DATA_X_MSB], &mut raw).await {
                return;
            }
            // Output order is X, Z, Y.
            let x = i16::from_be_bytes([raw[0], raw[1]]);
            let y = i16::from_be_bytes([raw[4], raw[5]]);
            if x == OVERFLOW || y == OVERFLOW {
                trace!("hmc5883l: axis overflow");
                return;
            }

            let reading = OrientationData {
                angle: heading(x, y),
                tilt: TILT_UNKNOWN,
            };
            sink.send_message(reading.into());
        })
    }
}
