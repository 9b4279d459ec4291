//! PMBus Protocol Support
//!
//! Generic PMBus pieces shared by the charger driver: the linear data
//! formats, the standard status register flags, and the transport seam the
//! driver talks through.
//!
//! Specification: <https://pmbus.org/specification-documents/>

use bitflags::bitflags;
use thiserror::Error;

mod linear;
mod transport;

pub use linear::{Linear11, LinearVoltage};
pub use transport::{I2cTransport, PmbusTransport};

// ============================================================================
// Constants
// ============================================================================

/// Bit offset of the exponent field in a LINEAR11 word
pub(crate) const EXPONENT_SHIFT: u32 = 11;
/// Width of the exponent field
pub(crate) const EXPONENT_LENGTH: u32 = 5;
/// Width of the mantissa field
pub(crate) const MANTISSA_LENGTH: u32 = 11;
pub(crate) const MANTISSA_MASK: u16 = 0x07FF;

// ============================================================================
// Two's complement
// ============================================================================

/// Sign-extend a two's-complement value that occupies the low `length` bits.
///
/// Fields narrower than two bits have no sign bit and only their low bits
/// are kept, so a zero-width field is always 0.
///
/// ```
/// # use rpb_charger::peripheral::pmbus::upscale_twos_complement;
/// assert_eq!(upscale_twos_complement(0b11111, 5), -1);
/// assert_eq!(upscale_twos_complement(0b00001, 5), 1);
/// assert_eq!(upscale_twos_complement(0x7F, 0), 0);
/// ```
pub fn upscale_twos_complement(value: i32, length: u32) -> i32 {
    if length >= i32::BITS {
        return value;
    }

    let mask = !0i32 << length;
    if length < 2 {
        return value & !mask;
    }

    let sign_bit = 1i32 << (length - 1);
    if value & sign_bit != 0 {
        value | mask
    } else {
        value & !mask
    }
}

// ============================================================================
// Status Registers
// ============================================================================

/// Flag sets whose set bits can be listed by name.
pub trait FlagNames: bitflags::Flags + Copy + 'static {
    /// Every named flag, in the order `describe` reports them.
    const NAMES: &'static [(Self, &'static str)];

    fn describe(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

bitflags! {
    /// STATUS_WORD (0x79); the low byte is STATUS_BYTE
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusWord: u16 {
        const VOUT = 1 << 15;
        const IOUT = 1 << 14;
        const INPUT = 1 << 13;
        const MFR = 1 << 12;
        const POWER_GOOD_N = 1 << 11;
        const FANS = 1 << 10;
        const OTHER = 1 << 9;
        const UNKNOWN = 1 << 8;
        const BUSY = 1 << 7;
        const OFF = 1 << 6;
        const VOUT_OV = 1 << 5;
        const IOUT_OC = 1 << 4;
        const VIN_UV = 1 << 3;
        const TEMP = 1 << 2;
        const CML = 1 << 1;
        const NONE = 1 << 0;
    }
}

impl FlagNames for StatusWord {
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::VOUT, "output voltage"),
        (Self::IOUT, "output current"),
        (Self::INPUT, "input"),
        (Self::MFR, "manufacturer specific"),
        (Self::POWER_GOOD_N, "power not good"),
        (Self::FANS, "fans"),
        (Self::OTHER, "other"),
        (Self::UNKNOWN, "unknown"),
        (Self::BUSY, "busy"),
        (Self::OFF, "output off"),
        (Self::VOUT_OV, "output overvoltage"),
        (Self::IOUT_OC, "output overcurrent"),
        (Self::VIN_UV, "input undervoltage"),
        (Self::TEMP, "temperature"),
        (Self::CML, "communication/memory/logic"),
        (Self::NONE, "none of the above"),
    ];
}

bitflags! {
    /// STATUS_VOUT (0x7A)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusVout: u8 {
        const OV_FAULT = 1 << 7;
        const OV_WARN = 1 << 6;
        const UV_WARN = 1 << 5;
        const UV_FAULT = 1 << 4;
        const AT_MAX = 1 << 3;
        const TON_MAX_FAULT = 1 << 2;
        const TOFF_MAX_WARN = 1 << 1;
    }
}

impl FlagNames for StatusVout {
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::OV_FAULT, "overvoltage fault"),
        (Self::OV_WARN, "overvoltage warning"),
        (Self::UV_WARN, "undervoltage warning"),
        (Self::UV_FAULT, "undervoltage fault"),
        (Self::AT_MAX, "at maximum"),
        (Self::TON_MAX_FAULT, "turn-on timeout"),
        (Self::TOFF_MAX_WARN, "turn-off timeout"),
    ];
}

bitflags! {
    /// STATUS_IOUT (0x7B)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusIout: u8 {
        const OC_FAULT = 1 << 7;
        const OC_LV_FAULT = 1 << 6;
        const OC_WARN = 1 << 5;
        const UC_FAULT = 1 << 4;
        const SHARE_FAULT = 1 << 3;
        const POWER_LIMITING = 1 << 2;
        const OP_FAULT = 1 << 1;
        const OP_WARN = 1 << 0;
    }
}

impl FlagNames for StatusIout {
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::OC_FAULT, "overcurrent fault"),
        (Self::OC_LV_FAULT, "overcurrent with low voltage"),
        (Self::OC_WARN, "overcurrent warning"),
        (Self::UC_FAULT, "undercurrent fault"),
        (Self::SHARE_FAULT, "current share fault"),
        (Self::POWER_LIMITING, "power limiting"),
        (Self::OP_FAULT, "overpower fault"),
        (Self::OP_WARN, "overpower warning"),
    ];
}

bitflags! {
    /// STATUS_INPUT (0x7C)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusInput: u8 {
        const OV_FAULT = 1 << 7;
        const OV_WARN = 1 << 6;
        const UV_WARN = 1 << 5;
        const UV_FAULT = 1 << 4;
        const OFF_LOW_VIN = 1 << 3;
        const IIN_OC_FAULT = 1 << 2;
        const IIN_OC_WARN = 1 << 1;
        const PIN_OP_WARN = 1 << 0;
    }
}

impl FlagNames for StatusInput {
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::OV_FAULT, "input overvoltage fault"),
        (Self::OV_WARN, "input overvoltage warning"),
        (Self::UV_WARN, "input undervoltage warning"),
        (Self::UV_FAULT, "input undervoltage fault"),
        (Self::OFF_LOW_VIN, "off for low input voltage"),
        (Self::IIN_OC_FAULT, "input overcurrent fault"),
        (Self::IIN_OC_WARN, "input overcurrent warning"),
        (Self::PIN_OP_WARN, "input overpower warning"),
    ];
}

bitflags! {
    /// STATUS_TEMPERATURE (0x7D)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusTemperature: u8 {
        const OT_FAULT = 1 << 7;
        const OT_WARN = 1 << 6;
        const UT_WARN = 1 << 5;
        const UT_FAULT = 1 << 4;
    }
}

impl FlagNames for StatusTemperature {
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::OT_FAULT, "overtemp fault"),
        (Self::OT_WARN, "overtemp warning"),
        (Self::UT_WARN, "undertemp warning"),
        (Self::UT_FAULT, "undertemp fault"),
    ];
}

bitflags! {
    /// STATUS_CML (0x7E)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusCml: u8 {
        const INVALID_COMMAND = 1 << 7;
        const INVALID_DATA = 1 << 6;
        const PEC_FAILED = 1 << 5;
        const MEMORY_FAULT = 1 << 4;
        const PROCESSOR_FAULT = 1 << 3;
        const COMM_FAULT = 1 << 1;
        const LOGIC_FAULT = 1 << 0;
    }
}

impl FlagNames for StatusCml {
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::INVALID_COMMAND, "unsupported command"),
        (Self::INVALID_DATA, "invalid data"),
        (Self::PEC_FAILED, "PEC mismatch"),
        (Self::MEMORY_FAULT, "memory fault"),
        (Self::PROCESSOR_FAULT, "processor fault"),
        (Self::COMM_FAULT, "communication fault"),
        (Self::LOGIC_FAULT, "memory or logic fault"),
    ];
}

bitflags! {
    /// STATUS_FANS_1_2 (0x81)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFans: u8 {
        const FAN1_FAULT = 1 << 7;
        const FAN2_FAULT = 1 << 6;
        const FAN1_WARN = 1 << 5;
        const FAN2_WARN = 1 << 4;
        const FAN1_OVERRIDE = 1 << 3;
        const FAN2_OVERRIDE = 1 << 2;
        const AIRFLOW_FAULT = 1 << 1;
        const AIRFLOW_WARN = 1 << 0;
    }
}

impl FlagNames for StatusFans {
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::FAN1_FAULT, "fan 1 fault"),
        (Self::FAN2_FAULT, "fan 2 fault"),
        (Self::FAN1_WARN, "fan 1 warning"),
        (Self::FAN2_WARN, "fan 2 warning"),
        (Self::FAN1_OVERRIDE, "fan 1 overridden"),
        (Self::FAN2_OVERRIDE, "fan 2 overridden"),
        (Self::AIRFLOW_FAULT, "airflow fault"),
        (Self::AIRFLOW_WARN, "airflow warning"),
    ];
}

bitflags! {
    /// ON_OFF_CONFIG (0x02)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OnOffConfig: u8 {
        const POWER_UP_CONTROL = 1 << 4;
        const USE_OPERATION = 1 << 3;
        const USE_CONTROL_PIN = 1 << 2;
        const CONTROL_ACTIVE_HIGH = 1 << 1;
        const FAST_OFF = 1 << 0;
    }
}

impl FlagNames for OnOffConfig {
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::POWER_UP_CONTROL, "waits for on command"),
        (Self::USE_OPERATION, "OPERATION honoured"),
        (Self::USE_CONTROL_PIN, "control pin honoured"),
        (Self::CONTROL_ACTIVE_HIGH, "control pin active high"),
        (Self::FAST_OFF, "immediate turn-off"),
    ];
}

bitflags! {
    /// CAPABILITY (0x19)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capability: u8 {
        const PEC = 1 << 7;
        const BUS_400KHZ = 1 << 5;
        const SMBALERT = 1 << 4;
    }
}

impl FlagNames for Capability {
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::PEC, "PEC"),
        (Self::BUS_400KHZ, "400kHz bus"),
        (Self::SMBALERT, "SMBALERT#"),
    ];
}

impl Capability {
    /// Fastest bus clock the device supports.
    pub fn max_bus_khz(&self) -> u32 {
        if self.contains(Self::BUS_400KHZ) {
            400
        } else {
            100
        }
    }
}

/// OPERATION (0x01) values the RPB-1600 accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    Off = 0x00,
    On = 0x80,
}

impl Operation {
    /// Name of a raw OPERATION byte.
    pub fn describe_raw(value: u8) -> &'static str {
        match value {
            0x00 => "OFF",
            0x80 => "ON",
            _ => "unknown",
        }
    }
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> Self {
        op as u8
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Interpret a fixed-length MFR_* payload as text.
///
/// The charger pads short fields with NUL or spaces. Non-ASCII bytes are
/// replaced so a corrupted read never fails.
pub fn parse_ascii(data: &[u8]) -> String {
    data.iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else if b == 0 {
                ' '
            } else {
                '.'
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PMBusError {
    #[error("Exponent {0} outside [-15, 15]")]
    ExponentOutOfRange(i32),
    #[error("Mantissa {0} does not fit the 11-bit field")]
    MantissaOutOfRange(i64),
    #[error("Value {0} cannot be encoded")]
    ValueOutOfRange(f32),
    #[error("Command not supported: 0x{0:02x}")]
    CommandNotSupported(u8),
}
