use embedded_hal::i2c::ErrorKind;

/// Errors raised by the low-level transaction helpers and the registry.
///
/// These never cross the driver boundary: drivers fold them into the
/// error-count state of their [`DevCore`](crate::DevCore).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cDevError {
    /// The transaction did not complete within the configured timeout.
    Timeout,
    /// The bus reported an error (NACK, arbitration loss, ...).
    Bus(ErrorKind),
    /// Every registry slot is occupied.
    RegistryFull,
    /// A write payload does not fit in the staging buffer.
    Payload,
}
