//! Sensirion SHT3x humidity and temperature sensor.
use alloc::boxed::Box;

use embassy_time::Timer;
use embedded_hal_async::i2c::I2c;
use futures::future::LocalBoxFuture;
use i2cdev_manager::{
    DevAddr, DevCore, DevModel, EnvironmentData, I2cDev, MessageSink,
};

/// ADDR pin low / high.
pub const ADDRS: [DevAddr; 2] = [0x44, 0x45];

const QUERY_INTERVAL: u32 = 5;

const CMD_SOFT_RESET: [u8; 2] = [0x30, 0xA2];
const CMD_READ_STATUS: [u8; 2] = [0xF3, 0x2D];
/// Single shot, high repeatability, clock stretching enabled.
const CMD_MEASURE: [u8; 2] = [0x2C, 0x06];

/// CRC-8 used by Sensirion sensors: polynomial 0x31, init 0xFF.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
        }
    }
    crc
}

/// Extract a CRC-protected word from a 3-byte group.
fn checked_word(chunk: &[u8]) -> Option<u16> {
    match chunk {
        [hi, lo, crc] if crc8(&[*hi, *lo]) == *crc => {
            Some(u16::from_be_bytes([*hi, *lo]))
        }
        _ => None,
    }
}

/// Convert raw sensor words to °C and %RH.
pub fn convert(raw_temperature: u16, raw_humidity: u16) -> (f32, f32) {
    let temperature = -45.0 + 175.0 * f32::from(raw_temperature) / 65535.0;
    let humidity = 100.0 * f32::from(raw_humidity) / 65535.0;
    (temperature, humidity)
}

#[derive(Default)]
pub struct Sht3x {
    core: DevCore,
}

impl<B: I2c> I2cDev<B> for Sht3x {
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

            if !self.core.i2c_write(bus, &CMD_SOFT_RESET, &[]).await {
                return false;
            }
            Timer::after_millis(2).await;

            let mut status = [0u8; 3];
            if !self.core.i2c_read(bus, &CMD_READ_STATUS, &mut status).await
                || checked_word(&status).is_none()
            {
                return false;
            }

            self.core.set_model(DevModel::Sht3x);
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
            if !self.core.i2c_read(bus, &CMD_MEASURE, &mut raw).await {
                return;
            }
            let (Some(t), Some(rh)) =
                (checked_word(&raw[..3]), checked_word(&raw[3..]))
            else {
                debug!("sht3x {:#x}: crc mismatch", self.core.addr());
                self.core.got_error();
                return;
            };

            let (temperature, humidity) = convert(t, rh);
            let reading = EnvironmentData {
                temperature,
                humidity,
                pressure: 0.0,
            };
            sink.send_message(reading.into());
        })
    }
}
