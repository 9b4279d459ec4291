//! Hardware abstraction layer traits.
//!
//! The charger driver never touches a bus peripheral directly. Whatever owns
//! the two-wire bus (a Linux i2c-dev node, a USB bridge, a test double)
//! implements [`I2c`], and the driver only sees it through that trait.

pub mod i2c;

pub use i2c::{I2c, I2cError};

/// Common error type for hardware operations
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    /// Error reported by the bus itself
    #[error(transparent)]
    I2c(#[from] I2cError),

    /// Timeout waiting for hardware response
    #[error("Hardware timeout")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, HwError>;
