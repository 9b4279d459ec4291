//! I2C hardware abstraction trait.

use async_trait::async_trait;
use super::Result;

/// I2C-specific errors
#[derive(Debug, thiserror::Error)]
pub enum I2cError {
    /// No acknowledgment from device
    #[error("No acknowledgment from device at address 0x{0:02x}")]
    NoAck(u8),
}

/// I2C bus abstraction.
///
/// Clock speed, retries and timeouts belong to the implementation. A timed
/// out transfer is reported as [`super::HwError::Timeout`].
#[async_trait]
pub trait I2c: Send {
    /// Write data to an I2C device.
    async fn write(&mut self, addr: u8, data: &[u8]) -> Result<()>;

    /// Write data then read from an I2C device (repeated start).
    async fn write_read(&mut self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<()>;
}
