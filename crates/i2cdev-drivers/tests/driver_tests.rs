use std::collections::HashMap;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::pubsub::{PubSubChannel, Subscriber};
use embedded_hal_async::i2c::{
    ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation,
};
use i2cdev_drivers::max17055::{Value, PERCENT_UNKNOWN};
use i2cdev_drivers::sht3x::crc8;
use i2cdev_drivers::{
    builtin_candidates, Ads1110, Bh1750, Hmc5883l, Max17055, Sht3x,
};
use i2cdev_manager::{
    battery_valid, BatteryStateData, DevAddr, DevCore, DevModel, I2cDev,
    I2cDevManager, LightData, ManagerConfig, Message, OrientationData,
};

// ---------------------------------------------------------------------------
// Simulated chips
// ---------------------------------------------------------------------------

/// One device on the simulated bus. Returning `false` NACKs the transfer.
trait Chip {
    fn write(&mut self, bytes: &[u8]) -> bool;
    fn read(&mut self, buf: &mut [u8]) -> bool;
}

/// MAX17055: 16-bit little-endian registers behind an 8-bit pointer.
#[derive(Default)]
struct FuelGauge {
    regs: HashMap<u8, u16>,
    pointer: u8,
    writes: Vec<(u8, u16)>,
    /// Registers whose writes are NACKed.
    read_only: Vec<u8>,
}

impl FuelGauge {
    fn configured() -> Self {
        let mut gauge = Self::default();
        gauge.regs.insert(0x21, 0x4010);
        gauge.regs.insert(0x40, 0x0001);
        gauge.regs.insert(0xBA, 0x870C);
        gauge
    }

    fn reg(&self, reg: u8) -> u16 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }
}

impl Chip for FuelGauge {
    fn write(&mut self, bytes: &[u8]) -> bool {
        match *bytes {
            [reg] => self.pointer = reg,
            [reg, _, _] if self.read_only.contains(&reg) => return false,
            [reg, lo, hi] => {
                let value = u16::from_le_bytes([lo, hi]);
                self.writes.push((reg, value));
                // Model refresh completes instantly.
                let stored =
                    if reg == 0xDB { value & !0x8000 } else { value };
                self.regs.insert(reg, stored);
            }
            _ => return false,
        }
        true
    }

    fn read(&mut self, buf: &mut [u8]) -> bool {
        let bytes = self.reg(self.pointer).to_le_bytes();
        for (dst, src) in buf.iter_mut().zip(bytes.iter().cycle()) {
            *dst = *src;
        }
        true
    }
}

/// SHT3x: command driven, answers the last command with CRC-framed words.
#[derive(Default)]
struct Humidity {
    last_command: [u8; 2],
    temperature: u16,
    humidity: u16,
    corrupt: bool,
}

impl Humidity {
    fn word(&self, value: u16) -> [u8; 3] {
        let [hi, lo] = value.to_be_bytes();
        let crc = crc8(&[hi, lo]) ^ u8::from(self.corrupt);
        [hi, lo, crc]
    }
}

impl Chip for Humidity {
    fn write(&mut self, bytes: &[u8]) -> bool {
        match *bytes {
            [a, b] => {
                self.last_command = [a, b];
                true
            }
            _ => false,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> bool {
        let mut frame = [0xFFu8; 6];
        match self.last_command {
            [0xF3, 0x2D] => frame[..3].copy_from_slice(&self.word(0x0000)),
            [0x2C, 0x06] => {
                frame[..3].copy_from_slice(&self.word(self.temperature));
                frame[3..].copy_from_slice(&self.word(self.humidity));
            }
            _ => {}
        }
        let n = buf.len().min(frame.len());
        buf[..n].copy_from_slice(&frame[..n]);
        true
    }
}

/// BH1750: accepts single-byte opcodes, reads back the count.
#[derive(Default)]
struct Light {
    opcodes: Vec<u8>,
    count: u16,
}

impl Chip for Light {
    fn write(&mut self, bytes: &[u8]) -> bool {
        self.opcodes.extend_from_slice(bytes);
        true
    }

    fn read(&mut self, buf: &mut [u8]) -> bool {
        let bytes = self.count.to_be_bytes();
        let n = buf.len().min(2);
        buf[..n].copy_from_slice(&bytes[..n]);
        true
    }
}

/// HMC5883L: 8-bit register file with auto-increment.
struct Compass {
    regs: [u8; 13],
    pointer: usize,
}

impl Compass {
    fn new() -> Self {
        let mut regs = [0u8; 13];
        regs[0x0A..].copy_from_slice(b"H43");
        Self { regs, pointer: 0 }
    }

    fn set_field(&mut self, x: i16, z: i16, y: i16) {
        self.regs[3..5].copy_from_slice(&x.to_be_bytes());
        self.regs[5..7].copy_from_slice(&z.to_be_bytes());
        self.regs[7..9].copy_from_slice(&y.to_be_bytes());
    }
}

impl Chip for Compass {
    fn write(&mut self, bytes: &[u8]) -> bool {
        let Some((&reg, data)) = bytes.split_first() else {
            return false;
        };
        self.pointer = usize::from(reg);
        for &byte in data {
            self.regs[self.pointer % 13] = byte;
            self.pointer += 1;
        }
        true
    }

    fn read(&mut self, buf: &mut [u8]) -> bool {
        for byte in buf.iter_mut() {
            *byte = self.regs[self.pointer % 13];
            self.pointer += 1;
        }
        true
    }
}

/// ADS1110: a config byte in, conversion plus config out.
#[derive(Default)]
struct Adc {
    config: u8,
    code: i16,
}

impl Chip for Adc {
    fn write(&mut self, bytes: &[u8]) -> bool {
        match *bytes {
            [config] => {
                self.config = config;
                true
            }
            _ => false,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> bool {
        let [hi, lo] = self.code.to_be_bytes();
        let frame = [hi, lo, self.config];
        let n = buf.len().min(3);
        buf[..n].copy_from_slice(&frame[..n]);
        true
    }
}

// ---------------------------------------------------------------------------
// Simulated bus
// ---------------------------------------------------------------------------

/// Each chip sits at its usual address. `bare` addresses ACK everything and
/// return zeros.
#[derive(Default)]
struct SimBus {
    gauge: Option<FuelGauge>,
    humidity: Option<Humidity>,
    light: Option<Light>,
    compass: Option<Compass>,
    adc: Option<Adc>,
    bare: Vec<u8>,
    transactions: usize,
}

impl SimBus {
    fn chip(&mut self, address: u8) -> Option<&mut dyn Chip> {
        match address {
            0x36 => self.gauge.as_mut().map(|c| c as &mut dyn Chip),
            0x44 => self.humidity.as_mut().map(|c| c as &mut dyn Chip),
            0x23 => self.light.as_mut().map(|c| c as &mut dyn Chip),
            0x1E => self.compass.as_mut().map(|c| c as &mut dyn Chip),
            0x48 => self.adc.as_mut().map(|c| c as &mut dyn Chip),
            _ => None,
        }
    }
}

impl ErrorType for SimBus {
    type Error = ErrorKind;
}

impl I2c for SimBus {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.transactions += 1;
        if self.bare.contains(&address) {
            for op in operations.iter_mut() {
                if let Operation::Read(buf) = op {
                    buf.fill(0);
                }
            }
            return Ok(());
        }
        let Some(chip) = self.chip(address) else {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        };
        for op in operations.iter_mut() {
            let ok = match op {
                Operation::Write(bytes) => chip.write(bytes),
                Operation::Read(buf) => chip.read(buf),
            };
            if !ok {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Sink = PubSubChannel<NoopRawMutex, Message, 16, 1, 1>;

async fn init_at<D: I2cDev<SimBus>>(
    dev: &mut D,
    bus: &mut SimBus,
    addr: DevAddr,
) -> bool {
    dev.init(bus, addr).await
}

async fn update_once<D: I2cDev<SimBus>>(
    dev: &mut D,
    bus: &mut SimBus,
    sink: &Sink,
) {
    dev.update(bus, sink).await
}

fn core_of<D: I2cDev<SimBus>>(dev: &D) -> &DevCore {
    dev.core()
}

fn messages(
    sub: &mut Subscriber<'_, NoopRawMutex, Message, 16, 1, 1>,
) -> Vec<Message> {
    std::iter::from_fn(|| sub.try_next_message_pure()).collect()
}

// ---------------------------------------------------------------------------
// Per-driver tests
// ---------------------------------------------------------------------------

#[futures_test::test]
async fn drivers_reject_foreign_addresses_without_bus_traffic() {
    let mut bus = SimBus::default();

    assert!(!init_at(&mut Max17055::default(), &mut bus, 0x37).await);
    assert!(!init_at(&mut Sht3x::default(), &mut bus, 0x46).await);
    assert!(!init_at(&mut Bh1750::default(), &mut bus, 0x24).await);
    assert!(!init_at(&mut Hmc5883l::default(), &mut bus, 0x1F).await);
    assert!(!init_at(&mut Ads1110::default(), &mut bus, 0x49).await);

    assert_eq!(bus.transactions, 0);
}

#[futures_test::test]
async fn max17055_skips_model_load_when_configured() {
    let mut bus = SimBus { gauge: Some(FuelGauge::configured()), ..Default::default() };
    let mut gauge = Max17055::default();

    assert!(init_at(&mut gauge, &mut bus, 0x36).await);
    assert_eq!(core_of(&gauge).model(), DevModel::Max17055);
    assert_eq!(core_of(&gauge).query_interval(), 3);

    // Only hibernation is disabled.
    let chip = bus.gauge.as_ref().unwrap();
    assert_eq!(chip.writes, vec![(0xBA, 0x0000)]);
}

#[futures_test::test]
async fn max17055_claims_even_if_hibernation_stays_on() {
    let mut chip = FuelGauge::configured();
    chip.read_only.push(0xBA);
    let mut bus = SimBus { gauge: Some(chip), ..Default::default() };
    let mut gauge = Max17055::default();

    assert!(init_at(&mut gauge, &mut bus, 0x36).await);
    assert_eq!(core_of(&gauge).model(), DevModel::Max17055);
    // The refused write is tallied like any other failed transfer.
    assert_eq!(core_of(&gauge).error_count(), 1);
    assert!(!core_of(&gauge).needs_removal());

    let chip = bus.gauge.as_ref().unwrap();
    assert!(chip.writes.is_empty());
    assert_eq!(chip.reg(0xBA), 0x870C);
}

#[futures_test::test]
async fn max17055_first_init_loads_model() {
    let mut chip = FuelGauge::configured();
    chip.regs.insert(0x40, 0x0000);
    chip.regs.insert(0x00, 0x0002);
    let mut bus = SimBus { gauge: Some(chip), ..Default::default() };
    let mut gauge = Max17055::default();

    assert!(init_at(&mut gauge, &mut bus, 0x36).await);

    let chip = bus.gauge.as_ref().unwrap();
    assert_eq!(chip.writes.first(), Some(&(0xBB, 0x0000)));
    assert!(chip.writes.contains(&(0xDB, 0x8000)));
    // Hibernation config restored after the refresh, then forced off.
    assert!(chip.writes.contains(&(0xBA, 0x870C)));
    assert_eq!(chip.writes.last(), Some(&(0xBA, 0x0000)));
    assert_eq!(chip.reg(0x40), 0x0001);
    assert_eq!(chip.reg(0x00) & 0x0002, 0);
}

#[futures_test::test]
async fn max17055_identifies_by_status_fallback() {
    let mut chip = FuelGauge::default();
    chip.regs.insert(0x00, 0x0080);
    chip.regs.insert(0x40, 0x0001);
    let mut bus = SimBus { gauge: Some(chip), ..Default::default() };
    assert!(init_at(&mut Max17055::default(), &mut bus, 0x36).await);

    // Blank registers: neither DevName nor a plausible status.
    let mut bus = SimBus { gauge: Some(FuelGauge::default()), ..Default::default() };
    assert!(!init_at(&mut Max17055::default(), &mut bus, 0x36).await);
}

#[futures_test::test]
async fn max17055_reports_battery_state() {
    let mut chip = FuelGauge::configured();
    chip.regs.insert(0x19, 48000); // 3750 mV
    chip.regs.insert(0x06, 75 << 8);
    chip.regs.insert(0x0A, 320); // 50 mA
    let mut bus = SimBus { gauge: Some(chip), ..Default::default() };
    let sink = Sink::new();
    let mut sub = sink.subscriber().unwrap();
    let mut gauge = Max17055::default();
    assert!(init_at(&mut gauge, &mut bus, 0x36).await);

    update_once(&mut gauge, &mut bus, &sink).await;
    assert_eq!(
        messages(&mut sub),
        vec![Message::BatteryState(BatteryStateData {
            valid_mask: battery_valid::ALL,
            percent: 75,
            on_charger: true,
            voltage_mv: 3750,
        })]
    );
}

#[futures_test::test]
async fn max17055_flags_implausible_readings() {
    let mut chip = FuelGauge::configured();
    chip.regs.insert(0x00, 0x0002);
    chip.regs.insert(0x19, 46080); // 3600 mV
    let mut bus = SimBus { gauge: Some(chip), ..Default::default() };
    let sink = Sink::new();
    let mut sub = sink.subscriber().unwrap();
    let mut gauge = Max17055::default();
    assert!(init_at(&mut gauge, &mut bus, 0x36).await);

    update_once(&mut gauge, &mut bus, &sink).await;
    assert_eq!(
        messages(&mut sub),
        vec![Message::BatteryState(BatteryStateData {
            valid_mask: 0,
            percent: PERCENT_UNKNOWN,
            on_charger: false,
            voltage_mv: 3600,
        })]
    );
}

#[futures_test::test]
async fn max17055_values_honour_lock() {
    let mut chip = FuelGauge::configured();
    chip.regs.insert(0x0A, (-640i16) as u16);
    let mut bus = SimBus { gauge: Some(chip), ..Default::default() };
    let mut gauge = Max17055::default();
    assert!(init_at(&mut gauge, &mut bus, 0x36).await);

    assert_eq!(gauge.read_value(&mut bus, Value::Current).await, Some(-100.0));

    core_of(&gauge).lock_device();
    assert_eq!(gauge.read_value(&mut bus, Value::Current).await, None);
    core_of(&gauge).unlock_device();

    assert!(gauge.reset_learned(&mut bus).await);
    assert!(!core_of(&gauge).is_locked());
    assert_eq!(bus.gauge.as_ref().unwrap().reg(0x40), 0x0001);
}

#[futures_test::test]
async fn sht3x_publishes_environment() {
    let chip = Humidity { temperature: 26214, humidity: 32768, ..Default::default() };
    let mut bus = SimBus { humidity: Some(chip), ..Default::default() };
    let sink = Sink::new();
    let mut sub = sink.subscriber().unwrap();
    let mut sensor = Sht3x::default();
    assert!(init_at(&mut sensor, &mut bus, 0x44).await);
    assert_eq!(core_of(&sensor).query_interval(), 5);

    update_once(&mut sensor, &mut bus, &sink).await;
    let msgs = messages(&mut sub);
    let [Message::Environment(env)] = msgs.as_slice() else {
        panic!("unexpected messages: {msgs:?}");
    };
    assert!((env.temperature - 25.0).abs() < 0.01);
    assert!((env.humidity - 50.0).abs() < 0.01);
    assert_eq!(env.pressure, 0.0);
}

#[futures_test::test]
async fn sht3x_crc_mismatch_counts_as_error() {
    let mut bus = SimBus { humidity: Some(Humidity::default()), ..Default::default() };
    let sink = Sink::new();
    let mut sub = sink.subscriber().unwrap();
    let mut sensor = Sht3x::default();
    assert!(init_at(&mut sensor, &mut bus, 0x44).await);

    bus.humidity.as_mut().unwrap().corrupt = true;
    update_once(&mut sensor, &mut bus, &sink).await;

    assert!(messages(&mut sub).is_empty());
    assert_eq!(core_of(&sensor).error_count(), 1);
}

#[futures_test::test]
async fn sht3x_rejects_bad_status_crc() {
    let chip = Humidity { corrupt: true, ..Default::default() };
    let mut bus = SimBus { humidity: Some(chip), ..Default::default() };
    assert!(!init_at(&mut Sht3x::default(), &mut bus, 0x44).await);
}

#[futures_test::test]
async fn bh1750_reports_lux() {
    let chip = Light { count: 1200, ..Default::default() };
    let mut bus = SimBus { light: Some(chip), ..Default::default() };
    let sink = Sink::new();
    let mut sub = sink.subscriber().unwrap();
    let mut sensor = Bh1750::default();
    assert!(init_at(&mut sensor, &mut bus, 0x23).await);
    assert_eq!(bus.light.as_ref().unwrap().opcodes, vec![0x01, 0x10]);

    update_once(&mut sensor, &mut bus, &sink).await;
    assert_eq!(
        messages(&mut sub),
        vec![Message::Light(LightData { lux: 1000 })]
    );
}

#[futures_test::test]
async fn hmc5883l_identifies_and_reports_heading() {
    let mut bus = SimBus { compass: Some(Compass::new()), ..Default::default() };
    let sink = Sink::new();
    let mut sub = sink.subscriber().unwrap();
    let mut compass = Hmc5883l::default();
    assert!(init_at(&mut compass, &mut bus, 0x1E).await);

    let chip = bus.compass.as_mut().unwrap();
    assert_eq!(&chip.regs[..3], &[0x70, 0x20, 0x00]);
    chip.set_field(0, -20, 100);

    update_once(&mut compass, &mut bus, &sink).await;
    assert_eq!(
        messages(&mut sub),
        vec![Message::Orientation(OrientationData { angle: 90, tilt: 400 })]
    );
}

#[futures_test::test]
async fn hmc5883l_rejects_wrong_identification() {
    let mut chip = Compass::new();
    chip.regs[0x0C] = b'X';
    let mut bus = SimBus { compass: Some(chip), ..Default::default() };
    assert!(!init_at(&mut Hmc5883l::default(), &mut bus, 0x1E).await);
}

#[futures_test::test]
async fn ads1110_reports_voltage_unless_locked() {
    let chip = Adc { code: 30000, ..Default::default() };
    let mut bus = SimBus { adc: Some(chip), ..Default::default() };
    let sink = Sink::new();
    let mut sub = sink.subscriber().unwrap();
    let mut adc = Ads1110::default();
    assert!(init_at(&mut adc, &mut bus, 0x48).await);
    assert_eq!(bus.adc.as_ref().unwrap().config, 0x0C);

    assert_eq!(adc.read_voltage(&mut bus).await, Some(3750));
    update_once(&mut adc, &mut bus, &sink).await;
    assert_eq!(
        messages(&mut sub),
        vec![Message::BatteryState(BatteryStateData {
            valid_mask: battery_valid::VOLTAGE,
            percent: 64,
            on_charger: false,
            voltage_mv: 3750,
        })]
    );

    core_of(&adc).lock_device();
    assert_eq!(adc.read_voltage(&mut bus).await, None);
    update_once(&mut adc, &mut bus, &sink).await;
    assert!(messages(&mut sub).is_empty());
}

// ---------------------------------------------------------------------------
// Scanner integration
// ---------------------------------------------------------------------------

#[futures_test::test]
async fn builtin_candidates_claim_a_populated_bus() {
    let bus = Mutex::<NoopRawMutex, _>::new(SimBus {
        gauge: Some(FuelGauge::configured()),
        humidity: Some(Humidity::default()),
        light: Some(Light::default()),
        compass: Some(Compass::new()),
        adc: Some(Adc::default()),
        bare: vec![0x50],
        transactions: 0,
    });
    let sink = Sink::new();
    let candidates = builtin_candidates::<SimBus>();
    let mgr = I2cDevManager::new(&bus, &sink, &candidates, ManagerConfig::new());

    assert!(mgr.tick().await);
    assert_eq!(
        mgr.get_dev_list_by_addr().await.as_slice(),
        &[0x1E, 0x23, 0x36, 0x44, 0x48, 0x50]
    );
    assert_eq!(
        mgr.get_dev_list_by_model().await.as_slice(),
        &[
            DevModel::Hmc5883l,
            DevModel::Bh1750,
            DevModel::Max17055,
            DevModel::Sht3x,
            DevModel::Ads1110,
        ]
    );

    let gauge = mgr.get_dev_by_model(DevModel::Max17055).await.unwrap();
    assert_eq!(gauge.addr(), 0x36);
    drop(gauge);
    assert!(mgr.get_dev_by_addr(0x50).await.is_none());
}
