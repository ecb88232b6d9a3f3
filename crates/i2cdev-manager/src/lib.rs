#![no_std]
//! Runtime discovery and dispatch of I2C devices on a shared bus.
//!
//! A single background task sweeps the bus address space, hands every newly
//! responding address to an ordered list of candidate drivers until one
//! claims it, polls claimed drivers on their own cadence, and evicts
//! addresses that vanish from the bus or whose driver keeps failing. Other
//! tasks read the resulting registry through the query methods on
//! [`I2cDevManager`].
extern crate alloc;

// This must go first so the macros are visible to the other modules.
#[macro_use]
mod fmt;

mod config;
mod device;
mod error;
mod handle;
mod manager;
mod message;
mod registry;

pub use config::{
    ManagerConfig, ERROR_THRESHOLD, FIRST_ADDRESS, IO_TIMEOUT, LAST_ADDRESS,
    MAX_DEVICES, PROBE_TIMEOUT,
};
pub use device::{
    boxed_driver, BoxedDev, DevAddr, DevCore, DevModel, DriverFactory, I2cDev,
};
pub use error::I2cDevError;
pub use handle::DevRef;
pub use manager::I2cDevManager;
pub use message::{
    battery_valid, BatteryStateData, EnvironmentData, LightData, Message,
    MessageSink, OrientationData,
};
pub use registry::{claim, AddrSet, Registry, RegistryEntry};
