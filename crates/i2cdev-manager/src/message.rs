use derive_more::From;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::pubsub::PubSubChannel;

/// Bits of [`BatteryStateData::valid_mask`].
pub mod battery_valid {
    pub const VOLTAGE: u8 = 1 << 0;
    pub const CURRENT: u8 = 1 << 1;
    pub const PERCENT: u8 = 1 << 2;
    pub const CYCLES: u8 = 1 << 3;
    pub const TTEF: u8 = 1 << 4;
    pub const ALL: u8 = VOLTAGE | CURRENT | PERCENT | CYCLES | TTEF;
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EnvironmentData {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub humidity: f32,
    /// Hectopascal, 0 when the sensor has no barometer.
    pub pressure: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OrientationData {
    /// Heading in degrees, 0..360.
    pub angle: u16,
    /// Tilt in degrees; 400 when the sensor cannot measure it.
    pub tilt: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LightData {
    pub lux: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryStateData {
    /// Which of the remaining fields are trustworthy, see [`battery_valid`].
    pub valid_mask: u8,
    pub percent: u8,
    pub on_charger: bool,
    pub voltage_mv: u16,
}

/// Everything the device subsystem publishes onto the system bus.
#[derive(Debug, Clone, Copy, PartialEq, From)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Message {
    /// The set of registered devices changed during the last tick.
    DevListChanged,
    Environment(EnvironmentData),
    Orientation(OrientationData),
    Light(LightData),
    BatteryState(BatteryStateData),
}

/// Fire-and-forget publication primitive used by the scanner and drivers.
pub trait MessageSink {
    fn send_message(&self, message: Message);
}

impl<M: RawMutex, const CAP: usize, const SUBS: usize, const PUBS: usize>
    MessageSink for PubSubChannel<M, Message, CAP, SUBS, PUBS>
{
    /// Publishes without waiting; when the queue is full the oldest message
    /// is dropped.
    fn send_message(&self, message: Message) {
        self.immediate_publisher().publish_immediate(message);
    }
}
