//! Peripheral device drivers.

pub mod pmbus;
pub mod rpb1600;
