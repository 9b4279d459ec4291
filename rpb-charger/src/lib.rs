//! Driver for MEAN WELL RPB-1600 series battery chargers.
//!
//! The charger speaks PMBus over I2C. [`peripheral::pmbus`] holds the
//! generic pieces (LINEAR11 codec, status flags, transport seam) and
//! [`peripheral::rpb1600`] the charger itself: register catalog, bitfields
//! and the async driver.

pub mod config;
pub mod hw_trait;
pub mod peripheral;
pub mod tracing;

pub use config::ChargerConfig;
pub use peripheral::rpb1600::{ChargerAddress, ChargerError, Rpb1600};
