#![no_std]
//! Drivers for the sensors and fuel gauges the scanner knows how to claim.
//!
//! Every driver rejects addresses it cannot live at before touching the bus,
//! so the candidate list can be offered any responding address.
extern crate alloc;

// This must go first so the macros are visible to the other modules.
#[macro_use]
mod fmt;

pub mod ads1110;
pub mod bh1750;
pub mod hmc5883l;
pub mod max17055;
pub mod sht3x;

use embedded_hal_async::i2c::I2c;
use i2cdev_manager::{boxed_driver, DriverFactory};

pub use ads1110::{percent_from_voltage, Ads1110};
pub use bh1750::Bh1750;
pub use hmc5883l::Hmc5883l;
pub use max17055::Max17055;
pub use sht3x::Sht3x;

/// Candidate list in claim priority order.
///
/// Earlier entries win when two drivers could live at the same address.
pub fn builtin_candidates<B: I2c + 'static>() -> [DriverFactory<B>; 5] {
    [
        boxed_driver::<B, Max17055>,
        boxed_driver::<B, Sht3x>,
        boxed_driver::<B, Bh1750>,
        boxed_driver::<B, Hmc5883l>,
        boxed_driver::<B, Ads1110>,
    ]
}
