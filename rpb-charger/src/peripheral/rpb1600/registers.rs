//! RPB-1600 register catalog.
//!
//! Every register the driver knows about is declared once, in the
//! `define_registers!` invocation below, with its command code, response
//! length, decode kind, fixed exponent and access. The driver reads all
//! per-register behaviour from here.

use std::fmt;

use crate::peripheral::pmbus::PMBusError;

/// Longest response of any register (MFR_ID, MFR_MODEL, MFR_SERIAL).
pub const MAX_RESPONSE_LEN: usize = 12;

/// How a register's payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    /// Standard LINEAR11; the exponent travels in the payload.
    LinearUnsigned,
    /// Charger voltage word; the exponent comes from the catalog.
    LinearVoltage,
    /// Independent flags per bit.
    Bitfield(Bitfield),
    /// Fixed-length ASCII text.
    Ascii,
    /// Bytes with no numeric meaning.
    RawBytes,
}

/// Bitfield layouts known to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitfield {
    ChargeStatus,
    CurveConfig,
    StatusWord,
    StatusVout,
    StatusIout,
    StatusInput,
    StatusTemperature,
    StatusCml,
    StatusFans,
    OnOffConfig,
    Capability,
}

/// Engineering unit of a linear register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Volts,
    Amps,
    Celsius,
    Rpm,
    Minutes,
    None,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Volts => "V",
            Self::Amps => "A",
            Self::Celsius => "°C",
            Self::Rpm => "RPM",
            Self::Minutes => "min",
            Self::None => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Immutable description of one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub code: u8,
    pub name: &'static str,
    /// Exact number of payload bytes on the wire
    pub length: usize,
    pub kind: DecodeKind,
    /// Fixed exponent used by the codec, if the register has one
    pub exponent: Option<i8>,
    pub unit: Unit,
    pub access: Access,
    pub description: &'static str,
}

impl RegisterDescriptor {
    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }
}

/// Declare the register enum and its catalog from one table.
macro_rules! define_registers {
    (
        $(
            $variant:ident = $code:literal, $name:literal, $len:literal,
            $kind:expr, $exp:expr, $unit:ident, $access:ident,
            $desc:literal
        );* $(;)?
    ) => {
        /// RPB-1600 command codes
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Register {
            $(
                $variant = $code,
            )*
        }

        impl Register {
            /// Every register, in command code order.
            pub const ALL: &'static [Register] = &[$(Register::$variant,)*];

            /// Catalog entry for this register.
            pub fn descriptor(self) -> &'static RegisterDescriptor {
                match self {
                    $(
                        Self::$variant => {
                            const DESCRIPTOR: RegisterDescriptor = RegisterDescriptor {
                                code: $code,
                                name: $name,
                                length: $len,
                                kind: $kind,
                                exponent: $exp,
                                unit: Unit::$unit,
                                access: Access::$access,
                                description: $desc,
                            };
                            &DESCRIPTOR
                        }
                    )*
                }
            }
        }

        impl TryFrom<u8> for Register {
            type Error = PMBusError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $(
                        $code => Ok(Self::$variant),
                    )*
                    _ => Err(PMBusError::CommandNotSupported(value)),
                }
            }
        }
    };
}

use Bitfield as B;
use DecodeKind as K;

define_registers! {
    Operation = 0x01, "OPERATION", 1, K::RawBytes, None, None, ReadWrite,
        "output on/off";
    OnOffConfig = 0x02, "ON_OFF_CONFIG", 1, K::Bitfield(B::OnOffConfig), None, None, ReadWrite,
        "remote on/off configuration";
    Capability = 0x19, "CAPABILITY", 1, K::Bitfield(B::Capability), None, None, ReadOnly,
        "PMBus capabilities";
    VoutMode = 0x20, "VOUT_MODE", 1, K::RawBytes, None, None, ReadOnly,
        "output voltage data format";
    VoutCommand = 0x21, "VOUT_COMMAND", 2, K::LinearVoltage, Some(-9), Volts, ReadWrite,
        "output voltage setpoint";
    VoutTrim = 0x22, "VOUT_TRIM", 2, K::LinearVoltage, Some(-9), Volts, ReadWrite,
        "output voltage trim";
    IoutOcFaultLimit = 0x46, "IOUT_OC_FAULT_LIMIT", 2, K::LinearUnsigned, Some(-2), Amps, ReadWrite,
        "output overcurrent limit";
    IoutOcFaultResponse = 0x47, "IOUT_OC_FAULT_RESPONSE", 1, K::RawBytes, None, None, ReadOnly,
        "output overcurrent fault response";
    StatusWord = 0x79, "STATUS_WORD", 2, K::Bitfield(B::StatusWord), None, None, ReadOnly,
        "status summary";
    StatusVout = 0x7A, "STATUS_VOUT", 1, K::Bitfield(B::StatusVout), None, None, ReadOnly,
        "output voltage status";
    StatusIout = 0x7B, "STATUS_IOUT", 1, K::Bitfield(B::StatusIout), None, None, ReadOnly,
        "output current status";
    StatusInput = 0x7C, "STATUS_INPUT", 1, K::Bitfield(B::StatusInput), None, None, ReadOnly,
        "input status";
    StatusTemperature = 0x7D, "STATUS_TEMPERATURE", 1, K::Bitfield(B::StatusTemperature), None, None, ReadOnly,
        "temperature status";
    StatusCml = 0x7E, "STATUS_CML", 1, K::Bitfield(B::StatusCml), None, None, ReadOnly,
        "communication/logic/memory status";
    StatusMfrSpecific = 0x80, "STATUS_MFR_SPECIFIC", 1, K::RawBytes, None, None, ReadOnly,
        "manufacturer specific status";
    StatusFans12 = 0x81, "STATUS_FANS_1_2", 1, K::Bitfield(B::StatusFans), None, None, ReadOnly,
        "fan 1 and 2 status";
    ReadVin = 0x88, "READ_VIN", 2, K::LinearUnsigned, None, Volts, ReadOnly,
        "input voltage";
    ReadVout = 0x8B, "READ_VOUT", 2, K::LinearVoltage, Some(-9), Volts, ReadOnly,
        "output voltage";
    ReadIout = 0x8C, "READ_IOUT", 2, K::LinearUnsigned, Some(-2), Amps, ReadOnly,
        "output current";
    ReadTemperature1 = 0x8D, "READ_TEMPERATURE_1", 2, K::LinearUnsigned, None, Celsius, ReadOnly,
        "internal temperature";
    ReadFanSpeed1 = 0x90, "READ_FAN_SPEED_1", 2, K::LinearUnsigned, Some(5), Rpm, ReadOnly,
        "fan 1 speed";
    ReadFanSpeed2 = 0x91, "READ_FAN_SPEED_2", 2, K::LinearUnsigned, Some(5), Rpm, ReadOnly,
        "fan 2 speed";
    PmbusRevision = 0x98, "PMBUS_REVISION", 1, K::RawBytes, None, None, ReadOnly,
        "PMBus revision";
    MfrId = 0x99, "MFR_ID", 12, K::Ascii, None, None, ReadOnly,
        "manufacturer name";
    MfrModel = 0x9A, "MFR_MODEL", 12, K::Ascii, None, None, ReadOnly,
        "model name";
    MfrRevision = 0x9B, "MFR_REVISION", 6, K::Ascii, None, None, ReadOnly,
        "firmware revision";
    MfrLocation = 0x9C, "MFR_LOCATION", 3, K::Ascii, None, None, ReadOnly,
        "manufacturing location";
    MfrDate = 0x9D, "MFR_DATE", 6, K::Ascii, None, None, ReadOnly,
        "manufacturing date";
    MfrSerial = 0x9E, "MFR_SERIAL", 12, K::Ascii, None, None, ReadOnly,
        "serial number";
    CurveCc = 0xB0, "CURVE_CC", 2, K::LinearUnsigned, Some(-2), Amps, ReadWrite,
        "constant current setpoint";
    CurveCv = 0xB1, "CURVE_CV", 2, K::LinearVoltage, Some(-9), Volts, ReadWrite,
        "constant voltage setpoint";
    CurveFv = 0xB2, "CURVE_FV", 2, K::LinearVoltage, Some(-9), Volts, ReadWrite,
        "float voltage setpoint";
    CurveTc = 0xB3, "CURVE_TC", 2, K::LinearUnsigned, Some(-2), Amps, ReadWrite,
        "taper current setpoint";
    CurveConfig = 0xB4, "CURVE_CONFIG", 2, K::Bitfield(B::CurveConfig), None, None, ReadWrite,
        "charge curve configuration";
    CurveCcTimeout = 0xB5, "CURVE_CC_TIMEOUT", 2, K::LinearUnsigned, Some(0), Minutes, ReadWrite,
        "constant current stage timeout";
    CurveCvTimeout = 0xB6, "CURVE_CV_TIMEOUT", 2, K::LinearUnsigned, Some(0), Minutes, ReadWrite,
        "constant voltage stage timeout";
    CurveFloatTimeout = 0xB7, "CURVE_FLOAT_TIMEOUT", 2, K::LinearUnsigned, Some(0), Minutes, ReadWrite,
        "float stage timeout";
    ChgStatus = 0xB8, "CHG_STATUS", 2, K::Bitfield(B::ChargeStatus), None, None, ReadOnly,
        "charger status";
}

impl Register {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<Register> for u8 {
    fn from(register: Register) -> Self {
        register.as_u8()
    }
}
