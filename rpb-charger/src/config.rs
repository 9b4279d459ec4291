//! Charger configuration from environment variables.
//!
//! # Environment Variables
//!
//! - `RPB1600_ADDRESS_PINS`: A0-A2 strap pin value, 0-7 (default: 0)
//! - `RPB1600_CURVE_CC`: constant current setpoint in amps
//! - `RPB1600_CURVE_CV`: constant voltage setpoint in volts
//! - `RPB1600_CURVE_FV`: float voltage setpoint in volts
//! - `RPB1600_CURVE_TC`: taper current in amps
//!
//! The four curve variables are all-or-nothing: a curve is programmed at
//! startup only when every one of them is set.

use anyhow::{bail, Context, Result};

use crate::hw_trait::I2c;
use crate::peripheral::pmbus::I2cTransport;
use crate::peripheral::rpb1600::{ChargerAddress, CurveSettings, Rpb1600};
use crate::tracing::prelude::*;

const ADDRESS_PINS: &str = "RPB1600_ADDRESS_PINS";
const CURVE_VARS: [&str; 4] = [
    "RPB1600_CURVE_CC",
    "RPB1600_CURVE_CV",
    "RPB1600_CURVE_FV",
    "RPB1600_CURVE_TC",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChargerConfig {
    /// Value of the A0-A2 strap pins.
    pub address_pins: u8,

    /// Curve to program at startup, if any.
    pub curve: Option<CurveSettings>,
}

impl ChargerConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let address_pins = match std::env::var(ADDRESS_PINS) {
            Ok(value) => {
                let pins: u8 = value
                    .trim()
                    .parse()
                    .with_context(|| format!("{ADDRESS_PINS}={value:?} is not a number"))?;
                if pins > 7 {
                    bail!("{ADDRESS_PINS}={pins} is outside 0-7");
                }
                pins
            }
            Err(_) => 0,
        };

        let values: Vec<Option<String>> = CURVE_VARS
            .iter()
            .map(|name| std::env::var(name).ok())
            .collect();

        let curve = if values.iter().all(Option::is_none) {
            None
        } else {
            let mut parsed = [0.0f32; 4];
            for ((name, value), slot) in CURVE_VARS.iter().zip(&values).zip(parsed.iter_mut()) {
                let Some(value) = value else {
                    bail!("{name} must be set together with {}", CURVE_VARS.join(", "));
                };
                *slot = value
                    .trim()
                    .parse()
                    .with_context(|| format!("{name}={value:?} is not a number"))?;
            }
            let [cc, cv, fv, tc] = parsed;
            Some(CurveSettings {
                cc,
                cv,
                fv,
                tc,
                timeouts: None,
                config: None,
            })
        };

        Ok(Self {
            address_pins,
            curve,
        })
    }

    pub fn address(&self) -> ChargerAddress {
        ChargerAddress::from_strap_pins(self.address_pins)
    }

    /// Build a driver on `i2c` and program the configured curve, if any.
    pub async fn connect<I: I2c>(&self, i2c: I) -> Result<Rpb1600<I2cTransport<I>>> {
        let mut charger = Rpb1600::new(I2cTransport::new(i2c), self.address());
        info!(addr = %charger.address(), "RPB-1600 configured");

        if let Some(curve) = &self.curve {
            charger
                .apply_curve(curve)
                .await
                .context("Failed to program charge curve")?;
        }
        Ok(charger)
    }
}
