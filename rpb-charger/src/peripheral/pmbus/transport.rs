//! The bus seam used by PMBus drivers.
//!
//! Drivers only need two primitives: send a command code and read back a
//! response, or send a command code followed by a payload. Addressing,
//! clocking and retries stay with the implementation.

use async_trait::async_trait;

use crate::hw_trait::{self, I2c};
use crate::tracing::prelude::*;

/// Request/response access to a PMBus device.
#[async_trait]
pub trait PmbusTransport: Send {
    /// Write `command` to the device at `address`, then read back the
    /// response. `len` is the number of bytes requested; an implementation
    /// may return fewer (or more) and the caller decides what that means.
    async fn exchange(&mut self, address: u8, command: u8, len: usize)
        -> hw_trait::Result<Vec<u8>>;

    /// Write `command` followed by `payload` to the device at `address`.
    async fn write_bytes(&mut self, address: u8, command: u8, payload: &[u8])
        -> hw_trait::Result<()>;
}

/// [`PmbusTransport`] over any [`I2c`] bus, using a repeated-start read.
pub struct I2cTransport<I> {
    i2c: I,
}

impl<I: I2c> I2cTransport<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    /// Give the bus back.
    pub fn into_inner(self) -> I {
        self.i2c
    }
}

#[async_trait]
impl<I: I2c> PmbusTransport for I2cTransport<I> {
    async fn exchange(
        &mut self,
        address: u8,
        command: u8,
        len: usize,
    ) -> hw_trait::Result<Vec<u8>> {
        let mut response = vec![0u8; len];
        self.i2c
            .write_read(address, &[command], &mut response)
            .await?;
        trace!(
            addr = %format!("{:#04x}", address),
            cmd = %format!("{:#04x}", command),
            data = ?response,
            "RX"
        );
        Ok(response)
    }

    async fn write_bytes(
        &mut self,
        address: u8,
        command: u8,
        payload: &[u8],
    ) -> hw_trait::Result<()> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(command);
        frame.extend_from_slice(payload);
        trace!(
            addr = %format!("{:#04x}", address),
            frame = ?frame,
            "TX"
        );
        self.i2c.write(address, &frame).await
    }
}
