//! MEAN WELL RPB-1600 Battery Charger Driver
//!
//! The RPB-1600 is a 1600W charger/power supply controlled over PMBus.
//! This driver reads live telemetry, reads and writes the charge curve
//! setpoints, and decodes the charger specific status registers.
//!
//! Every register access is one request/response exchange through a
//! [`PmbusTransport`]. Aggregate readers (`get_readings`,
//! `get_curve_parameters`, `get_mfr_info`) issue several exchanges in a
//! fixed order and fail as a whole on the first error.
//!
//! Datasheet: <https://www.meanwell.com/Upload/PDF/RPB-1600/RPB-1600-SPEC.PDF>

use std::fmt;

use thiserror::Error;

use crate::hw_trait::HwError;
use crate::tracing::prelude::*;

use super::pmbus::{
    self, Capability, FlagNames, Linear11, LinearVoltage, OnOffConfig, Operation, PMBusError,
    PmbusTransport, StatusCml, StatusFans, StatusInput, StatusIout, StatusTemperature,
    StatusVout, StatusWord,
};

mod registers;
mod status;

pub use registers::{
    Access, Bitfield, DecodeKind, Register, RegisterDescriptor, Unit, MAX_RESPONSE_LEN,
};
pub use status::{ChargeCurve, ChargeStatus, CurveConfig, TempCompensation};

/// Fixed upper bits of the 7-bit device address
pub const BASE_ADDRESS: u8 = 0x40;

/// Bus address of one charger, derived from its A0-A2 strap pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargerAddress(u8);

impl ChargerAddress {
    /// Address selected by the A0-A2 pins. Only the low three bits count.
    pub fn from_strap_pins(pins: u8) -> Self {
        Self(BASE_ADDRESS | (pins & 0x07))
    }

    /// Validate a full 7-bit address.
    pub fn new(address: u8) -> Result<Self> {
        if address == 0 || address & !0x07 != BASE_ADDRESS {
            return Err(ChargerError::InvalidAddress(address));
        }
        Ok(Self(address))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ChargerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum ChargerError {
    #[error("{register}: bus transfer failed: {source}")]
    Transport {
        register: Register,
        #[source]
        source: HwError,
    },
    #[error("{register}: expected {expected} bytes, received {received}")]
    ResponseLength {
        register: Register,
        expected: usize,
        received: usize,
    },
    #[error("{register}: {source}")]
    Encoding {
        register: Register,
        #[source]
        source: PMBusError,
    },
    #[error("{register} is not a {expected} register")]
    KindMismatch {
        register: Register,
        expected: &'static str,
    },
    #[error("{0} is read-only")]
    ReadOnly(Register),
    #[error("Invalid charger address: {0:#04x}")]
    InvalidAddress(u8),
}

impl ChargerError {
    /// The exchange itself failed, as opposed to the request being invalid.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::ResponseLength { .. })
    }

    pub fn register(&self) -> Option<Register> {
        match self {
            Self::Transport { register, .. }
            | Self::ResponseLength { register, .. }
            | Self::Encoding { register, .. }
            | Self::KindMismatch { register, .. } => Some(*register),
            Self::ReadOnly(register) => Some(*register),
            Self::InvalidAddress(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChargerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fan {
    Fan1,
    Fan2,
}

impl Fan {
    fn register(self) -> Register {
        match self {
            Self::Fan1 => Register::ReadFanSpeed1,
            Self::Fan2 => Register::ReadFanSpeed2,
        }
    }
}

/// Charge stages that carry a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStage {
    ConstantCurrent,
    ConstantVoltage,
    Float,
}

impl ChargeStage {
    fn timeout_register(self) -> Register {
        match self {
            Self::ConstantCurrent => Register::CurveCcTimeout,
            Self::ConstantVoltage => Register::CurveCvTimeout,
            Self::Float => Register::CurveFloatTimeout,
        }
    }
}

/// Live telemetry snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings {
    /// Volts
    pub vin: f32,
    /// Volts
    pub vout: f32,
    /// Amps
    pub iout: f32,
    /// RPM
    pub fan_speed_1: i32,
    /// RPM
    pub fan_speed_2: i32,
}

/// Charge curve as currently programmed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveParameters {
    /// Constant current setpoint (A)
    pub cc: f32,
    /// Constant voltage setpoint (V)
    pub cv: f32,
    /// Float voltage setpoint (V)
    pub fv: f32,
    /// Taper current (A)
    pub tc: f32,
    pub config: CurveConfig,
    /// Minutes
    pub cc_timeout: i32,
    /// Minutes
    pub cv_timeout: i32,
    /// Minutes
    pub float_timeout: i32,
    pub status: ChargeStatus,
}

/// MFR_* identification strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfrInfo {
    pub id: String,
    pub model: String,
    pub revision: String,
    pub location: String,
    pub date: String,
    pub serial: String,
}

/// Stage timeouts in minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub cc: i32,
    pub cv: i32,
    pub float: i32,
}

/// A charge curve to program into the charger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveSettings {
    /// Amps
    pub cc: f32,
    /// Volts
    pub cv: f32,
    /// Volts
    pub fv: f32,
    /// Amps
    pub tc: f32,
    pub timeouts: Option<StageTimeouts>,
    pub config: Option<CurveConfig>,
}

/// A decoded register of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterValue {
    Quantity { value: f32, unit: Unit },
    ChargeStatus(ChargeStatus),
    CurveConfig(CurveConfig),
    Flags { bits: u16, names: Vec<&'static str> },
    Text(String),
    Raw(Vec<u8>),
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quantity { value, unit } => match unit {
                Unit::Rpm | Unit::Minutes => write!(f, "{:.0}{}", value, unit.symbol()),
                _ => write!(f, "{:.3}{}", value, unit.symbol()),
            },
            Self::ChargeStatus(status) => {
                write!(f, "0x{:04x} [{}]", status.bits(), status.describe().join(", "))
            }
            Self::CurveConfig(config) => {
                write!(f, "0x{:04x} [{}]", config.bits(), config.describe().join(", "))
            }
            Self::Flags { bits, names } => write!(f, "0x{:04x} [{}]", bits, names.join(", ")),
            Self::Text(text) => write!(f, "\"{}\"", text),
            Self::Raw(bytes) => write!(f, "{:02x?}", bytes),
        }
    }
}

/// RPB-1600 driver
pub struct Rpb1600<T> {
    transport: T,
    address: ChargerAddress,
    /// Receive scratch, cleared before every read
    rx: [u8; MAX_RESPONSE_LEN],
}

impl<T: PmbusTransport> Rpb1600<T> {
    pub fn new(transport: T, address: ChargerAddress) -> Self {
        Self {
            transport,
            address,
            rx: [0; MAX_RESPONSE_LEN],
        }
    }

    pub fn address(&self) -> ChargerAddress {
        self.address
    }

    /// Give the transport back.
    pub fn into_transport(self) -> T {
        self.transport
    }

    // ------------------------------------------------------------------
    // Raw access
    // ------------------------------------------------------------------

    /// Read a register's payload, checked against its catalog length.
    pub async fn read_raw(&mut self, register: Register) -> Result<&[u8]> {
        let descriptor = register.descriptor();
        self.rx.fill(0);

        let response = self
            .transport
            .exchange(self.address.get(), descriptor.code, descriptor.length)
            .await
            .map_err(|source| ChargerError::Transport { register, source })?;

        if response.len() != descriptor.length {
            warn!(
                addr = %self.address,
                "{}: expected {} bytes, received {}",
                register,
                descriptor.length,
                response.len()
            );
            return Err(ChargerError::ResponseLength {
                register,
                expected: descriptor.length,
                received: response.len(),
            });
        }

        self.rx[..descriptor.length].copy_from_slice(&response);
        trace!(addr = %self.address, "READ {} = {:02x?}", register, response);
        Ok(&self.rx[..descriptor.length])
    }

    async fn read_word(&mut self, register: Register) -> Result<[u8; 2]> {
        let data = self.read_raw(register).await?;
        match data {
            [lo, hi] => Ok([*lo, *hi]),
            _ => Err(ChargerError::ResponseLength {
                register,
                expected: 2,
                received: data.len(),
            }),
        }
    }

    async fn read_byte(&mut self, register: Register) -> Result<u8> {
        let data = self.read_raw(register).await?;
        match data {
            [byte] => Ok(*byte),
            _ => Err(ChargerError::ResponseLength {
                register,
                expected: 1,
                received: data.len(),
            }),
        }
    }

    /// Read a LINEAR11 register. The exponent is taken from the payload.
    pub async fn read_linear(&mut self, register: Register) -> Result<Linear11> {
        let descriptor = register.descriptor();
        if descriptor.kind != DecodeKind::LinearUnsigned {
            return Err(ChargerError::KindMismatch {
                register,
                expected: "linear",
            });
        }

        let value = Linear11::from_le_bytes(self.read_word(register).await?);
        if let Some(expected) = descriptor.exponent {
            if value.exponent() != expected {
                warn!(
                    "{}: exponent {} differs from expected {}",
                    register,
                    value.exponent(),
                    expected
                );
            }
        }
        Ok(value)
    }

    /// Read a LINEAR11 register as an engineering value.
    ///
    /// Registers with a fixed catalog exponent carry an unsigned mantissa.
    /// Self-describing ones (VIN, temperature) are standard signed LINEAR11.
    pub async fn read_quantity(&mut self, register: Register) -> Result<f32> {
        let value = self.read_linear(register).await?;
        Ok(match register.descriptor().exponent {
            Some(_) => value.to_unsigned_f32(),
            None => value.to_f32(),
        })
    }

    /// Read a charger voltage register, in volts.
    pub async fn read_voltage(&mut self, register: Register) -> Result<f32> {
        let descriptor = register.descriptor();
        if descriptor.kind != DecodeKind::LinearVoltage {
            return Err(ChargerError::KindMismatch {
                register,
                expected: "voltage",
            });
        }

        let bytes = self.read_word(register).await?;
        Ok(LinearVoltage::from_le_bytes(bytes, descriptor.exponent.unwrap_or(0)).to_f32())
    }

    /// Read a fixed-length ASCII register.
    pub async fn read_ascii(&mut self, register: Register) -> Result<String> {
        if register.descriptor().kind != DecodeKind::Ascii {
            return Err(ChargerError::KindMismatch {
                register,
                expected: "text",
            });
        }
        Ok(pmbus::parse_ascii(self.read_raw(register).await?))
    }

    /// Read and decode any register according to the catalog.
    pub async fn read_register(&mut self, register: Register) -> Result<RegisterValue> {
        let descriptor = register.descriptor();
        let value = match descriptor.kind {
            DecodeKind::LinearUnsigned => {
                RegisterValue::Quantity {
                    value: self.read_quantity(register).await?,
                    unit: descriptor.unit,
                }
            }
            DecodeKind::LinearVoltage => RegisterValue::Quantity {
                value: self.read_voltage(register).await?,
                unit: descriptor.unit,
            },
            DecodeKind::Ascii => RegisterValue::Text(self.read_ascii(register).await?),
            DecodeKind::RawBytes => {
                let data = self.read_raw(register).await?;
                match (register, data) {
                    (Register::Operation, [byte]) => RegisterValue::Flags {
                        bits: u16::from(*byte),
                        names: vec![Operation::describe_raw(*byte)],
                    },
                    _ => RegisterValue::Raw(data.to_vec()),
                }
            }
            DecodeKind::Bitfield(Bitfield::ChargeStatus) => {
                RegisterValue::ChargeStatus(self.get_charge_status().await?)
            }
            DecodeKind::Bitfield(Bitfield::CurveConfig) => {
                RegisterValue::CurveConfig(self.get_curve_config().await?)
            }
            DecodeKind::Bitfield(Bitfield::StatusWord) => {
                let bits = u16::from_le_bytes(self.read_word(register).await?);
                RegisterValue::Flags {
                    bits,
                    names: StatusWord::from_bits_retain(bits).describe(),
                }
            }
            DecodeKind::Bitfield(field) => {
                let byte = self.read_byte(register).await?;
                let names = match field {
                    Bitfield::StatusVout => StatusVout::from_bits_retain(byte).describe(),
                    Bitfield::StatusIout => StatusIout::from_bits_retain(byte).describe(),
                    Bitfield::StatusInput => StatusInput::from_bits_retain(byte).describe(),
                    Bitfield::StatusTemperature => {
                        StatusTemperature::from_bits_retain(byte).describe()
                    }
                    Bitfield::StatusCml => StatusCml::from_bits_retain(byte).describe(),
                    Bitfield::StatusFans => StatusFans::from_bits_retain(byte).describe(),
                    Bitfield::OnOffConfig => OnOffConfig::from_bits_retain(byte).describe(),
                    Bitfield::Capability => Capability::from_bits_retain(byte).describe(),
                    Bitfield::ChargeStatus | Bitfield::CurveConfig | Bitfield::StatusWord => {
                        Vec::new()
                    }
                };
                RegisterValue::Flags {
                    bits: u16::from(byte),
                    names,
                }
            }
        };
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Telemetry
    // ------------------------------------------------------------------

    /// Input voltage (V)
    pub async fn get_vin(&mut self) -> Result<f32> {
        Ok(self.read_quantity(Register::ReadVin).await?)
    }

    /// Output voltage (V)
    pub async fn get_vout(&mut self) -> Result<f32> {
        self.read_voltage(Register::ReadVout).await
    }

    /// Output current (A)
    pub async fn get_iout(&mut self) -> Result<f32> {
        Ok(self.read_quantity(Register::ReadIout).await?)
    }

    /// Internal temperature (°C)
    pub async fn get_temperature(&mut self) -> Result<f32> {
        Ok(self.read_quantity(Register::ReadTemperature1).await?)
    }

    /// Fan speed (RPM)
    pub async fn get_fan_speed(&mut self, fan: Fan) -> Result<i32> {
        Ok(self.read_linear(fan.register()).await?.to_unsigned_int())
    }

    /// VIN, VOUT, IOUT, FAN1, FAN2 in that order.
    pub async fn get_readings(&mut self) -> Result<Readings> {
        let vin = self.get_vin().await?;
        let vout = self.get_vout().await?;
        let iout = self.get_iout().await?;
        let fan_speed_1 = self.get_fan_speed(Fan::Fan1).await?;
        let fan_speed_2 = self.get_fan_speed(Fan::Fan2).await?;

        Ok(Readings {
            vin,
            vout,
            iout,
            fan_speed_1,
            fan_speed_2,
        })
    }

    // ------------------------------------------------------------------
    // Charge curve
    // ------------------------------------------------------------------

    pub async fn get_charge_status(&mut self) -> Result<ChargeStatus> {
        Ok(ChargeStatus::from_le_bytes(
            self.read_word(Register::ChgStatus).await?,
        ))
    }

    pub async fn get_curve_config(&mut self) -> Result<CurveConfig> {
        Ok(CurveConfig::from_le_bytes(
            self.read_word(Register::CurveConfig).await?,
        ))
    }

    /// Stage timeout in minutes.
    pub async fn get_stage_timeout(&mut self, stage: ChargeStage) -> Result<i32> {
        Ok(self.read_linear(stage.timeout_register()).await?.to_unsigned_int())
    }

    /// CC, CV, FV, TC, CURVE_CONFIG, the three timeouts and CHG_STATUS, in
    /// that order.
    pub async fn get_curve_parameters(&mut self) -> Result<CurveParameters> {
        let cc = self.read_quantity(Register::CurveCc).await?;
        let cv = self.read_voltage(Register::CurveCv).await?;
        let fv = self.read_voltage(Register::CurveFv).await?;
        let tc = self.read_quantity(Register::CurveTc).await?;
        let config = self.get_curve_config().await?;
        let cc_timeout = self.get_stage_timeout(ChargeStage::ConstantCurrent).await?;
        let cv_timeout = self.get_stage_timeout(ChargeStage::ConstantVoltage).await?;
        let float_timeout = self.get_stage_timeout(ChargeStage::Float).await?;
        let status = self.get_charge_status().await?;

        Ok(CurveParameters {
            cc,
            cv,
            fv,
            tc,
            config,
            cc_timeout,
            cv_timeout,
            float_timeout,
            status,
        })
    }

    pub async fn get_mfr_info(&mut self) -> Result<MfrInfo> {
        Ok(MfrInfo {
            id: self.read_ascii(Register::MfrId).await?,
            model: self.read_ascii(Register::MfrModel).await?,
            revision: self.read_ascii(Register::MfrRevision).await?,
            location: self.read_ascii(Register::MfrLocation).await?,
            date: self.read_ascii(Register::MfrDate).await?,
            serial: self.read_ascii(Register::MfrSerial).await?,
        })
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Read STATUS_WORD and the detail registers it points at.
    ///
    /// Returns one line per problem found; an empty list means the charger
    /// reports nothing.
    pub async fn check_status(&mut self) -> Result<Vec<String>> {
        let bits = u16::from_le_bytes(self.read_word(Register::StatusWord).await?);
        let word = StatusWord::from_bits_retain(bits);
        let mut problems = Vec::new();

        let details = [
            (StatusWord::VOUT, Register::StatusVout),
            (StatusWord::IOUT, Register::StatusIout),
            (StatusWord::INPUT, Register::StatusInput),
            (StatusWord::TEMP, Register::StatusTemperature),
            (StatusWord::CML, Register::StatusCml),
            (StatusWord::FANS, Register::StatusFans12),
        ];
        for (flag, register) in details {
            if !word.contains(flag) {
                continue;
            }
            if let RegisterValue::Flags { bits, names } = self.read_register(register).await? {
                let line = format!("{}: 0x{:02x} ({})", register, bits, names.join(", "));
                warn!(addr = %self.address, "{}", line);
                problems.push(line);
            }
        }

        if word.contains(StatusWord::MFR) {
            let raw = self.read_byte(Register::StatusMfrSpecific).await?;
            let line = format!("{}: 0x{:02x}", Register::StatusMfrSpecific, raw);
            warn!(addr = %self.address, "{}", line);
            problems.push(line);
        }

        let charge = self.get_charge_status().await?;
        if charge.has_fault() {
            let line = format!(
                "{}: 0x{:04x} ({})",
                Register::ChgStatus,
                charge.bits(),
                charge.describe().join(", ")
            );
            error!(addr = %self.address, "{}", line);
            problems.push(line);
        }

        Ok(problems)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    async fn write_payload(&mut self, register: Register, payload: &[u8]) -> Result<()> {
        self.transport
            .write_bytes(self.address.get(), register.as_u8(), payload)
            .await
            .map_err(|source| ChargerError::Transport { register, source })?;
        debug!(addr = %self.address, "WRITE {} = {:02x?}", register, payload);
        Ok(())
    }

    fn check_writable(register: Register, kind: DecodeKind, expected: &'static str) -> Result<()> {
        let descriptor = register.descriptor();
        if !descriptor.is_writable() {
            return Err(ChargerError::ReadOnly(register));
        }
        if descriptor.kind != kind {
            return Err(ChargerError::KindMismatch { register, expected });
        }
        Ok(())
    }

    /// Write a LINEAR11 register using its catalog exponent.
    pub async fn write_linear(&mut self, register: Register, value: f32) -> Result<()> {
        Self::check_writable(register, DecodeKind::LinearUnsigned, "linear")?;
        let exponent = register.descriptor().exponent.unwrap_or(0);
        let encoded = Linear11::from_f32(exponent, value)
            .map_err(|source| ChargerError::Encoding { register, source })?;
        self.write_payload(register, &encoded.to_le_bytes()).await
    }

    /// Write a charger voltage register.
    pub async fn write_voltage(&mut self, register: Register, volts: f32) -> Result<()> {
        Self::check_writable(register, DecodeKind::LinearVoltage, "voltage")?;
        let exponent = register.descriptor().exponent.unwrap_or(0);
        let encoded = LinearVoltage::from_f32(volts, exponent)
            .map_err(|source| ChargerError::Encoding { register, source })?;
        self.write_payload(register, &encoded.to_le_bytes()).await
    }

    /// Write any writable register, encoding `value` with the codec its
    /// catalog kind calls for.
    pub async fn write_register(&mut self, register: Register, value: &RegisterValue) -> Result<()> {
        let descriptor = register.descriptor();
        if !descriptor.is_writable() {
            return Err(ChargerError::ReadOnly(register));
        }

        match (descriptor.kind, value) {
            (DecodeKind::LinearUnsigned, RegisterValue::Quantity { value, .. }) => {
                self.write_linear(register, *value).await
            }
            (DecodeKind::LinearVoltage, RegisterValue::Quantity { value, .. }) => {
                self.write_voltage(register, *value).await
            }
            (DecodeKind::Bitfield(Bitfield::CurveConfig), RegisterValue::CurveConfig(config)) => {
                self.set_curve_config(config).await
            }
            (DecodeKind::Bitfield(_), RegisterValue::Flags { bits, .. }) if descriptor.length == 2 => {
                self.write_payload(register, &bits.to_le_bytes()).await
            }
            (DecodeKind::Bitfield(_) | DecodeKind::RawBytes, RegisterValue::Flags { bits, .. }) => {
                let byte = u8::try_from(*bits).map_err(|_| ChargerError::Encoding {
                    register,
                    source: PMBusError::ValueOutOfRange(f32::from(*bits)),
                })?;
                self.write_payload(register, &[byte]).await
            }
            (DecodeKind::RawBytes, RegisterValue::Raw(bytes)) if bytes.len() == descriptor.length => {
                self.write_payload(register, bytes).await
            }
            (kind, _) => Err(ChargerError::KindMismatch {
                register,
                expected: match kind {
                    DecodeKind::LinearUnsigned => "linear",
                    DecodeKind::LinearVoltage => "voltage",
                    DecodeKind::Bitfield(_) => "bitfield",
                    DecodeKind::Ascii => "text",
                    DecodeKind::RawBytes => "raw",
                },
            }),
        }
    }

    /// Turn the output on or off.
    pub async fn set_operation(&mut self, operation: Operation) -> Result<()> {
        Self::check_writable(Register::Operation, DecodeKind::RawBytes, "raw")?;
        self.write_payload(Register::Operation, &[u8::from(operation)])
            .await
    }

    /// Constant current setpoint (A)
    pub async fn set_curve_cc(&mut self, amps: f32) -> Result<()> {
        self.write_linear(Register::CurveCc, amps).await
    }

    /// Constant voltage setpoint (V)
    pub async fn set_curve_cv(&mut self, volts: f32) -> Result<()> {
        self.write_voltage(Register::CurveCv, volts).await
    }

    /// Float voltage setpoint (V)
    pub async fn set_curve_fv(&mut self, volts: f32) -> Result<()> {
        self.write_voltage(Register::CurveFv, volts).await
    }

    /// Taper current (A)
    pub async fn set_curve_tc(&mut self, amps: f32) -> Result<()> {
        self.write_linear(Register::CurveTc, amps).await
    }

    /// Stage timeout in minutes.
    pub async fn set_stage_timeout(&mut self, stage: ChargeStage, minutes: i32) -> Result<()> {
        let register = stage.timeout_register();
        Self::check_writable(register, DecodeKind::LinearUnsigned, "linear")?;
        let encoded = Linear11::from_int(register.descriptor().exponent.unwrap_or(0), minutes)
            .map_err(|source| ChargerError::Encoding { register, source })?;
        self.write_payload(register, &encoded.to_le_bytes()).await
    }

    pub async fn set_on_off_config(&mut self, config: OnOffConfig) -> Result<()> {
        let register = Register::OnOffConfig;
        Self::check_writable(register, DecodeKind::Bitfield(Bitfield::OnOffConfig), "bitfield")?;
        self.write_payload(register, &[config.bits()]).await
    }

    pub async fn set_curve_config(&mut self, config: &CurveConfig) -> Result<()> {
        let register = Register::CurveConfig;
        Self::check_writable(register, DecodeKind::Bitfield(Bitfield::CurveConfig), "bitfield")?;
        self.write_payload(register, &config.to_le_bytes()).await
    }

    /// Program a complete charge curve.
    ///
    /// Writes stop at the first failure; setpoints already written stay.
    pub async fn apply_curve(&mut self, settings: &CurveSettings) -> Result<()> {
        info!(
            addr = %self.address,
            "Programming curve: CC {:.2}A, CV {:.2}V, FV {:.2}V, TC {:.2}A",
            settings.cc,
            settings.cv,
            settings.fv,
            settings.tc
        );

        if let Some(config) = &settings.config {
            self.set_curve_config(config).await?;
        }
        self.set_curve_cc(settings.cc).await?;
        self.set_curve_cv(settings.cv).await?;
        self.set_curve_fv(settings.fv).await?;
        self.set_curve_tc(settings.tc).await?;

        if let Some(timeouts) = settings.timeouts {
            self.set_stage_timeout(ChargeStage::ConstantCurrent, timeouts.cc)
                .await?;
            self.set_stage_timeout(ChargeStage::ConstantVoltage, timeouts.cv)
                .await?;
            self.set_stage_timeout(ChargeStage::Float, timeouts.float)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_trait::{self, I2cError};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Answers from a fixed table and records every exchange.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: HashMap<u8, Vec<u8>>,
        fail: Option<u8>,
        timeout: Option<u8>,
        /// Serve every write back on the next read of that register.
        loopback: bool,
        requests: Vec<(u8, u8, usize)>,
        writes: Vec<(u8, u8, Vec<u8>)>,
    }

    impl ScriptedTransport {
        fn with(mut self, register: Register, data: &[u8]) -> Self {
            self.responses.insert(register.as_u8(), data.to_vec());
            self
        }

        fn commands(&self) -> Vec<u8> {
            self.requests.iter().map(|(_, cmd, _)| *cmd).collect()
        }
    }

    #[async_trait]
    impl PmbusTransport for ScriptedTransport {
        async fn exchange(
            &mut self,
            address: u8,
            command: u8,
            len: usize,
        ) -> hw_trait::Result<Vec<u8>> {
            self.requests.push((address, command, len));
            if self.fail == Some(command) {
                return Err(I2cError::NoAck(address).into());
            }
            if self.timeout == Some(command) {
                return Err(HwError::Timeout);
            }
            Ok(self.responses.get(&command).cloned().unwrap_or_default())
        }

        async fn write_bytes(
            &mut self,
            address: u8,
            command: u8,
            payload: &[u8],
        ) -> hw_trait::Result<()> {
            if self.fail == Some(command) {
                return Err(I2cError::NoAck(address).into());
            }
            if self.loopback {
                self.responses.insert(command, payload.to_vec());
            }
            self.writes.push((address, command, payload.to_vec()));
            Ok(())
        }
    }

    fn charger(transport: ScriptedTransport) -> Rpb1600<ScriptedTransport> {
        crate::tracing::init_stdout();
        Rpb1600::new(transport, ChargerAddress::from_strap_pins(0))
    }

    fn telemetry() -> ScriptedTransport {
        ScriptedTransport::default()
            // 230V: mantissa 230, exponent 0
            .with(Register::ReadVin, &[0xE6, 0x00])
            // 27.0V at exponent -9
            .with(Register::ReadVout, &[0x00, 0x36])
            // 12.5A: mantissa 50, exponent -2
            .with(Register::ReadIout, &[0x32, 0xF0])
            // 4800 RPM: mantissa 150, exponent 5
            .with(Register::ReadFanSpeed1, &[0x96, 0x28])
            .with(Register::ReadFanSpeed2, &[0x8C, 0x28])
    }

    #[test]
    fn test_address_from_strap_pins() {
        assert_eq!(ChargerAddress::from_strap_pins(0).get(), 0x40);
        assert_eq!(ChargerAddress::from_strap_pins(5).get(), 0x45);
        assert_eq!(ChargerAddress::from_strap_pins(0xFF).get(), 0x47);
    }

    #[test]
    fn test_address_validation() {
        assert_eq!(ChargerAddress::new(0x43).unwrap().get(), 0x43);
        assert!(matches!(
            ChargerAddress::new(0),
            Err(ChargerError::InvalidAddress(0))
        ));
        assert!(matches!(
            ChargerAddress::new(0x48),
            Err(ChargerError::InvalidAddress(0x48))
        ));
        assert!(matches!(
            ChargerAddress::new(0xC0),
            Err(ChargerError::InvalidAddress(0xC0))
        ));
    }

    #[tokio::test]
    async fn test_get_readings() {
        let mut rpb = charger(telemetry());

        let readings = rpb.get_readings().await.unwrap();
        assert_eq!(readings.vin, 230.0);
        assert_eq!(readings.vout, 27.0);
        assert_eq!(readings.iout, 12.5);
        assert_eq!(readings.fan_speed_1, 4800);
        assert_eq!(readings.fan_speed_2, 4480);

        let transport = rpb.into_transport();
        assert_eq!(transport.commands(), vec![0x88, 0x8B, 0x8C, 0x90, 0x91]);
        assert!(transport
            .requests
            .iter()
            .all(|&(addr, _, len)| addr == 0x40 && len == 2));
    }

    #[tokio::test]
    async fn test_get_readings_fails_on_short_response() {
        let transport = telemetry().with(Register::ReadIout, &[0x32]);
        let mut rpb = charger(transport);

        let err = rpb.get_readings().await.unwrap_err();
        assert!(err.is_transport());
        assert!(matches!(
            err,
            ChargerError::ResponseLength {
                register: Register::ReadIout,
                expected: 2,
                received: 1,
            }
        ));

        // Nothing after the failing read is attempted
        assert_eq!(rpb.into_transport().commands(), vec![0x88, 0x8B, 0x8C]);
    }

    #[tokio::test]
    async fn test_long_response_rejected() {
        let transport = ScriptedTransport::default().with(Register::ReadVin, &[0xE6, 0x00, 0x00]);
        let mut rpb = charger(transport);

        let err = rpb.get_vin().await.unwrap_err();
        assert!(matches!(
            err,
            ChargerError::ResponseLength {
                expected: 2,
                received: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_bus_error_carries_register() {
        let transport = ScriptedTransport {
            fail: Some(0x8B),
            ..telemetry()
        };
        let mut rpb = charger(transport);

        let err = rpb.get_vout().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.register(), Some(Register::ReadVout));
        assert!(matches!(
            err,
            ChargerError::Transport {
                source: HwError::I2c(I2cError::NoAck(0x40)),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_timeout_carries_register() {
        let transport = ScriptedTransport {
            timeout: Some(0x8C),
            ..telemetry()
        };
        let mut rpb = charger(transport);

        let err = rpb.get_readings().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.register(), Some(Register::ReadIout));
        assert!(matches!(
            err,
            ChargerError::Transport {
                source: HwError::Timeout,
                ..
            }
        ));
        assert_eq!(err.to_string(), "READ_IOUT: bus transfer failed: Hardware timeout");
    }

    #[tokio::test]
    async fn test_repeated_reads_are_identical() {
        let mut rpb = charger(telemetry());

        let first = rpb.get_readings().await.unwrap();
        let second = rpb.get_readings().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_scratch_buffer_cleared_between_reads() {
        let transport = telemetry().with(Register::MfrSerial, b"SN1234567890");
        let mut rpb = charger(transport);

        rpb.read_raw(Register::MfrSerial).await.unwrap();
        let data = rpb.read_raw(Register::ReadVin).await.unwrap().to_vec();
        assert_eq!(data, vec![0xE6, 0x00]);
        assert!(rpb.rx[2..].iter().all(|&b| b == 0));
    }

    fn curve_table() -> ScriptedTransport {
        ScriptedTransport::default()
            // 50A at exponent -2
            .with(Register::CurveCc, &[0xC8, 0xF0])
            // 28.8V and 27.6V at exponent -9
            .with(Register::CurveCv, &[0x9A, 0x39])
            .with(Register::CurveFv, &[0x33, 0x37])
            // 5A at exponent -2
            .with(Register::CurveTc, &[0x14, 0xF0])
            .with(Register::CurveConfig, &[0x44, 0x00])
            .with(Register::CurveCcTimeout, &[0x58, 0x02])
            .with(Register::CurveCvTimeout, &[0xF0, 0x00])
            .with(Register::CurveFloatTimeout, &[0x3C, 0x00])
            .with(Register::ChgStatus, &[0b0000_1011, 0x00])
    }

    #[tokio::test]
    async fn test_get_curve_parameters() {
        let mut rpb = charger(curve_table());

        let params = rpb.get_curve_parameters().await.unwrap();
        assert_eq!(params.cc, 50.0);
        assert!((params.cv - 28.8).abs() < 0.002);
        assert!((params.fv - 27.6).abs() < 0.002);
        assert_eq!(params.tc, 5.0);
        assert!(params.config.two_stage);
        assert_eq!(params.config.temp_compensation, TempCompensation::Minus3MilliVolts);
        assert_eq!(params.cc_timeout, 600);
        assert_eq!(params.cv_timeout, 240);
        assert_eq!(params.float_timeout, 60);
        assert!(params.status.fully_charged());
        assert!(params.status.in_cc_mode());
        assert!(!params.status.in_cv_mode());
        assert!(params.status.in_float_mode());

        assert_eq!(
            rpb.into_transport().commands(),
            vec![0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7, 0xB8]
        );
    }

    #[tokio::test]
    async fn test_get_curve_parameters_fails_on_short_config() {
        let transport = curve_table().with(Register::CurveConfig, &[0x44]);
        let mut rpb = charger(transport);

        let err = rpb.get_curve_parameters().await.unwrap_err();
        assert!(matches!(
            err,
            ChargerError::ResponseLength {
                register: Register::CurveConfig,
                expected: 2,
                received: 1,
            }
        ));

        // The timeouts and CHG_STATUS are never requested
        assert_eq!(
            rpb.into_transport().commands(),
            vec![0xB0, 0xB1, 0xB2, 0xB3, 0xB4]
        );
    }

    #[tokio::test]
    async fn test_get_curve_parameters_fails_on_last_read() {
        let transport = ScriptedTransport {
            fail: Some(0xB8),
            ..curve_table()
        };
        let mut rpb = charger(transport);

        let err = rpb.get_curve_parameters().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.register(), Some(Register::ChgStatus));
        assert_eq!(
            rpb.into_transport().commands(),
            vec![0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7, 0xB8]
        );
    }

    #[tokio::test]
    async fn test_get_mfr_info() {
        let transport = ScriptedTransport::default()
            .with(Register::MfrId, b"MEANWELL    ")
            .with(Register::MfrModel, b"RPB-1600-24\0")
            .with(Register::MfrRevision, b"01.05 ")
            .with(Register::MfrLocation, b"TW ")
            .with(Register::MfrDate, b"230415")
            .with(Register::MfrSerial, b"RB2304150001");
        let mut rpb = charger(transport);

        let info = rpb.get_mfr_info().await.unwrap();
        assert_eq!(info.id, "MEANWELL");
        assert_eq!(info.model, "RPB-1600-24");
        assert_eq!(info.revision, "01.05");
        assert_eq!(info.location, "TW");
        assert_eq!(info.date, "230415");
        assert_eq!(info.serial, "RB2304150001");

        let transport = rpb.into_transport();
        let lengths: Vec<_> = transport.requests.iter().map(|r| r.2).collect();
        assert_eq!(lengths, vec![12, 12, 6, 3, 6, 12]);
    }

    #[tokio::test]
    async fn test_read_register_display() {
        let transport = telemetry()
            .with(Register::ChgStatus, &[0x04, 0x08])
            .with(Register::Operation, &[0x80])
            .with(Register::StatusFans12, &[0x80])
            .with(Register::PmbusRevision, &[0x22]);
        let mut rpb = charger(transport);

        let value = rpb.read_register(Register::ReadVout).await.unwrap();
        assert_eq!(value.to_string(), "27.000V");

        let value = rpb.read_register(Register::ReadFanSpeed1).await.unwrap();
        assert_eq!(value.to_string(), "4800RPM");

        let value = rpb.read_register(Register::ChgStatus).await.unwrap();
        assert_eq!(
            value.to_string(),
            "0x0804 [Constant voltage stage, Battery not detected]"
        );

        let value = rpb.read_register(Register::Operation).await.unwrap();
        assert_eq!(value.to_string(), "0x0080 [ON]");

        let value = rpb.read_register(Register::StatusFans12).await.unwrap();
        assert_eq!(value.to_string(), "0x0080 [fan 1 fault]");

        let value = rpb.read_register(Register::PmbusRevision).await.unwrap();
        assert_eq!(value, RegisterValue::Raw(vec![0x22]));
    }

    #[tokio::test]
    async fn test_kind_mismatch() {
        let mut rpb = charger(telemetry());

        let err = rpb.read_voltage(Register::ReadVin).await.unwrap_err();
        assert!(matches!(err, ChargerError::KindMismatch { .. }));
        assert!(!err.is_transport());
        assert!(rpb.into_transport().requests.is_empty());
    }

    #[tokio::test]
    async fn test_set_curve_setpoints() {
        let mut rpb = charger(ScriptedTransport::default());

        rpb.set_curve_cc(50.0).await.unwrap();
        rpb.set_curve_cv(28.8).await.unwrap();
        rpb.set_stage_timeout(ChargeStage::Float, 60).await.unwrap();

        let writes = rpb.into_transport().writes;
        assert_eq!(
            writes,
            vec![
                (0x40, 0xB0, vec![0xC8, 0xF0]),
                (0x40, 0xB1, vec![0x9A, 0x39]),
                (0x40, 0xB7, vec![0x3C, 0x00]),
            ]
        );
    }

    #[tokio::test]
    async fn test_write_out_of_range_never_reaches_bus() {
        let mut rpb = charger(ScriptedTransport::default());

        // 600A needs a mantissa of 2400 at exponent -2
        let err = rpb.set_curve_cc(600.0).await.unwrap_err();
        assert!(matches!(
            err,
            ChargerError::Encoding {
                register: Register::CurveCc,
                ..
            }
        ));

        let err = rpb.set_curve_cv(200.0).await.unwrap_err();
        assert!(matches!(err, ChargerError::Encoding { .. }));

        assert!(rpb.into_transport().writes.is_empty());
    }

    #[tokio::test]
    async fn test_write_read_only_register() {
        let mut rpb = charger(ScriptedTransport::default());

        let err = rpb.write_linear(Register::ReadIout, 1.0).await.unwrap_err();
        assert!(matches!(err, ChargerError::ReadOnly(Register::ReadIout)));

        let err = rpb.write_voltage(Register::ReadVout, 24.0).await.unwrap_err();
        assert!(matches!(err, ChargerError::ReadOnly(Register::ReadVout)));

        assert!(rpb.into_transport().writes.is_empty());
    }

    #[tokio::test]
    async fn test_write_bus_error() {
        let transport = ScriptedTransport {
            fail: Some(0xB1),
            ..Default::default()
        };
        let mut rpb = charger(transport);

        let err = rpb.set_curve_cv(28.8).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.register(), Some(Register::CurveCv));
    }

    #[tokio::test]
    async fn test_apply_curve() {
        let mut rpb = charger(ScriptedTransport::default());
        let mut config = CurveConfig::default();
        config.two_stage = true;

        let settings = CurveSettings {
            cc: 50.0,
            cv: 28.8,
            fv: 27.6,
            tc: 5.0,
            timeouts: Some(StageTimeouts {
                cc: 600,
                cv: 240,
                float: 60,
            }),
            config: Some(config),
        };
        rpb.apply_curve(&settings).await.unwrap();

        let writes = rpb.into_transport().writes;
        let commands: Vec<_> = writes.iter().map(|w| w.1).collect();
        assert_eq!(
            commands,
            vec![0xB4, 0xB0, 0xB1, 0xB2, 0xB3, 0xB5, 0xB6, 0xB7]
        );
        assert_eq!(writes[0].2, vec![0x44, 0x00]);
        assert_eq!(writes[5].2, vec![0x58, 0x02]);
    }

    #[tokio::test]
    async fn test_apply_curve_stops_at_first_failure() {
        let transport = ScriptedTransport {
            fail: Some(0xB1),
            ..Default::default()
        };
        let mut rpb = charger(transport);

        let settings = CurveSettings {
            cc: 50.0,
            cv: 28.8,
            fv: 27.6,
            tc: 5.0,
            timeouts: Some(StageTimeouts {
                cc: 600,
                cv: 240,
                float: 60,
            }),
            config: None,
        };
        let err = rpb.apply_curve(&settings).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.register(), Some(Register::CurveCv));

        // CC went out before the failure and is not rolled back
        assert_eq!(
            rpb.into_transport().writes,
            vec![(0x40, 0xB0, vec![0xC8, 0xF0])]
        );
    }

    #[tokio::test]
    async fn test_setpoints_read_back_above_mantissa_sign_bit() {
        let transport = ScriptedTransport {
            loopback: true,
            ..Default::default()
        };
        let mut rpb = charger(transport);

        // 1200 minutes and 300A both need mantissa 1200, past bit 10
        rpb.set_stage_timeout(ChargeStage::ConstantCurrent, 1200)
            .await
            .unwrap();
        rpb.set_curve_cc(300.0).await.unwrap();
        rpb.set_curve_tc(5.0).await.unwrap();

        assert_eq!(
            rpb.get_stage_timeout(ChargeStage::ConstantCurrent)
                .await
                .unwrap(),
            1200
        );
        assert_eq!(rpb.read_quantity(Register::CurveCc).await.unwrap(), 300.0);
        assert_eq!(rpb.read_quantity(Register::CurveTc).await.unwrap(), 5.0);

        let value = rpb.read_register(Register::CurveCcTimeout).await.unwrap();
        assert_eq!(value.to_string(), "1200min");
    }

    #[tokio::test]
    async fn test_write_register_dispatches_on_kind() {
        let mut rpb = charger(ScriptedTransport::default());

        let amps = RegisterValue::Quantity {
            value: 50.0,
            unit: Unit::Amps,
        };
        let volts = RegisterValue::Quantity {
            value: 28.8,
            unit: Unit::Volts,
        };
        let minutes = RegisterValue::Quantity {
            value: 240.0,
            unit: Unit::Minutes,
        };
        let on = RegisterValue::Flags {
            bits: 0x80,
            names: vec![],
        };
        rpb.write_register(Register::CurveCc, &amps).await.unwrap();
        rpb.write_register(Register::CurveCv, &volts).await.unwrap();
        rpb.write_register(Register::CurveCvTimeout, &minutes)
            .await
            .unwrap();
        rpb.write_register(Register::Operation, &on).await.unwrap();
        rpb.write_register(
            Register::CurveConfig,
            &RegisterValue::CurveConfig(CurveConfig::from_bits(0x0144)),
        )
        .await
        .unwrap();

        let err = rpb
            .write_register(Register::CurveCc, &RegisterValue::Text("50".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChargerError::KindMismatch { expected: "linear", .. }));

        let err = rpb
            .write_register(Register::MfrId, &RegisterValue::Text("X".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChargerError::ReadOnly(Register::MfrId)));

        let writes = rpb.into_transport().writes;
        assert_eq!(
            writes,
            vec![
                (0x40, 0xB0, vec![0xC8, 0xF0]),
                (0x40, 0xB1, vec![0x9A, 0x39]),
                (0x40, 0xB6, vec![0xF0, 0x00]),
                (0x40, 0x01, vec![0x80]),
                (0x40, 0xB4, vec![0x44, 0x01]),
            ]
        );
    }

    #[tokio::test]
    async fn test_set_on_off_config() {
        let mut rpb = charger(ScriptedTransport::default());

        rpb.set_on_off_config(OnOffConfig::USE_OPERATION | OnOffConfig::POWER_UP_CONTROL)
            .await
            .unwrap();

        assert_eq!(rpb.into_transport().writes, vec![(0x40, 0x02, vec![0x18])]);
    }

    #[tokio::test]
    async fn test_set_operation() {
        let mut rpb = charger(ScriptedTransport::default());

        rpb.set_operation(Operation::Off).await.unwrap();
        rpb.set_operation(Operation::On).await.unwrap();

        let writes = rpb.into_transport().writes;
        assert_eq!(writes, vec![(0x40, 0x01, vec![0x00]), (0x40, 0x01, vec![0x80])]);
    }

    #[tokio::test]
    async fn test_check_status() {
        let transport = ScriptedTransport::default()
            // FANS and TEMP set in STATUS_WORD
            .with(Register::StatusWord, &[0x04, 0x04])
            .with(Register::StatusTemperature, &[0x40])
            .with(Register::StatusFans12, &[0x80])
            .with(Register::ChgStatus, &[0x02, 0x20]);
        let mut rpb = charger(transport);

        let problems = rpb.check_status().await.unwrap();
        assert_eq!(
            problems,
            vec![
                "STATUS_TEMPERATURE: 0x40 (overtemp warning)".to_string(),
                "STATUS_FANS_1_2: 0x80 (fan 1 fault)".to_string(),
                "CHG_STATUS: 0x2002 (Constant current stage, Constant current stage timeout)"
                    .to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_check_status_clean() {
        let transport = ScriptedTransport::default()
            .with(Register::StatusWord, &[0x00, 0x00])
            .with(Register::ChgStatus, &[0x01, 0x00]);
        let mut rpb = charger(transport);

        assert!(rpb.check_status().await.unwrap().is_empty());
        assert_eq!(rpb.into_transport().commands(), vec![0x79, 0xB8]);
    }
}
