//! CHG_STATUS and CURVE_CONFIG bitfields.
//!
//! Both registers are little-endian words whose bits are independent
//! flags, so every accessor masks a single bit.

use bitflags::bitflags;

use crate::peripheral::pmbus::FlagNames;

bitflags! {
    /// CHG_STATUS (0xB8)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChargeStatus: u16 {
        const FULLY_CHARGED = 1 << 0;
        const CC_MODE = 1 << 1;
        const CV_MODE = 1 << 2;
        const FLOAT_MODE = 1 << 3;
        const EEPROM_ERROR = 1 << 8;
        const NTC_SHORT = 1 << 10;
        /// Set when no battery is connected
        const BATTERY_NOT_CONNECTED = 1 << 11;
        const CC_TIMEOUT = 1 << 13;
        const CV_TIMEOUT = 1 << 14;
        const FLOAT_TIMEOUT = 1 << 15;
    }
}

impl ChargeStatus {
    /// Decode the little-endian register payload. Undefined bits are kept.
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self::from_bits_retain(u16::from_le_bytes(bytes))
    }

    pub fn fully_charged(&self) -> bool {
        self.contains(Self::FULLY_CHARGED)
    }

    pub fn in_cc_mode(&self) -> bool {
        self.contains(Self::CC_MODE)
    }

    pub fn in_cv_mode(&self) -> bool {
        self.contains(Self::CV_MODE)
    }

    pub fn in_float_mode(&self) -> bool {
        self.contains(Self::FLOAT_MODE)
    }

    pub fn eeprom_error(&self) -> bool {
        self.contains(Self::EEPROM_ERROR)
    }

    pub fn temp_compensation_short(&self) -> bool {
        self.contains(Self::NTC_SHORT)
    }

    /// Inverse of bit 11 (BTNC, battery not connected): true when the bit
    /// is clear.
    pub fn battery_detected(&self) -> bool {
        !self.contains(Self::BATTERY_NOT_CONNECTED)
    }

    pub fn cc_timeout(&self) -> bool {
        self.contains(Self::CC_TIMEOUT)
    }

    pub fn cv_timeout(&self) -> bool {
        self.contains(Self::CV_TIMEOUT)
    }

    pub fn float_timeout(&self) -> bool {
        self.contains(Self::FLOAT_TIMEOUT)
    }

    /// Any condition that needs operator attention.
    pub fn has_fault(&self) -> bool {
        self.intersects(
            Self::EEPROM_ERROR
                | Self::NTC_SHORT
                | Self::CC_TIMEOUT
                | Self::CV_TIMEOUT
                | Self::FLOAT_TIMEOUT,
        )
    }
}

impl FlagNames for ChargeStatus {
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::FULLY_CHARGED, "Fully charged"),
        (Self::CC_MODE, "Constant current stage"),
        (Self::CV_MODE, "Constant voltage stage"),
        (Self::FLOAT_MODE, "Float stage"),
        (Self::EEPROM_ERROR, "EEPROM charge parameter error"),
        (Self::NTC_SHORT, "Temperature compensation short"),
        (Self::BATTERY_NOT_CONNECTED, "Battery not detected"),
        (Self::CC_TIMEOUT, "Constant current stage timeout"),
        (Self::CV_TIMEOUT, "Constant voltage stage timeout"),
        (Self::FLOAT_TIMEOUT, "Float stage timeout"),
    ];
}

/// CUVS: which charge curve is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargeCurve {
    #[default]
    Custom,
    Preset1,
    Preset2,
    Preset3,
}

/// TCS: temperature compensation slope, per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TempCompensation {
    Disabled,
    #[default]
    Minus3MilliVolts,
    Minus4MilliVolts,
    Minus5MilliVolts,
}

/// CURVE_CONFIG (0xB4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveConfig {
    pub curve: ChargeCurve,
    pub temp_compensation: TempCompensation,
    /// STGS: two-stage charging (no float stage) when set
    pub two_stage: bool,
    pub cc_timeout_indication: bool,
    pub cv_timeout_indication: bool,
    pub float_timeout_indication: bool,
    reserved: u16,
}

impl CurveConfig {
    const CUVS_MASK: u16 = 0x0003;
    const TCS_SHIFT: u16 = 2;
    const TCS_MASK: u16 = 0x000C;
    const STGS: u16 = 1 << 6;
    const CCTOE: u16 = 1 << 8;
    const CVTOE: u16 = 1 << 9;
    const FVTOE: u16 = 1 << 10;
    const DEFINED: u16 =
        Self::CUVS_MASK | Self::TCS_MASK | Self::STGS | Self::CCTOE | Self::CVTOE | Self::FVTOE;

    pub fn from_bits(bits: u16) -> Self {
        let curve = match bits & Self::CUVS_MASK {
            0 => ChargeCurve::Custom,
            1 => ChargeCurve::Preset1,
            2 => ChargeCurve::Preset2,
            _ => ChargeCurve::Preset3,
        };
        let temp_compensation = match (bits & Self::TCS_MASK) >> Self::TCS_SHIFT {
            0 => TempCompensation::Disabled,
            1 => TempCompensation::Minus3MilliVolts,
            2 => TempCompensation::Minus4MilliVolts,
            _ => TempCompensation::Minus5MilliVolts,
        };

        Self {
            curve,
            temp_compensation,
            two_stage: bits & Self::STGS != 0,
            cc_timeout_indication: bits & Self::CCTOE != 0,
            cv_timeout_indication: bits & Self::CVTOE != 0,
            float_timeout_indication: bits & Self::FVTOE != 0,
            reserved: bits & !Self::DEFINED,
        }
    }

    /// Encode back to the register word. Bits outside the known fields
    /// are written back as they were read.
    pub fn bits(&self) -> u16 {
        let mut bits = self.reserved;
        bits |= match self.curve {
            ChargeCurve::Custom => 0,
            ChargeCurve::Preset1 => 1,
            ChargeCurve::Preset2 => 2,
            ChargeCurve::Preset3 => 3,
        };
        bits |= match self.temp_compensation {
            TempCompensation::Disabled => 0,
            TempCompensation::Minus3MilliVolts => 1,
            TempCompensation::Minus4MilliVolts => 2,
            TempCompensation::Minus5MilliVolts => 3,
        } << Self::TCS_SHIFT;
        if self.two_stage {
            bits |= Self::STGS;
        }
        if self.cc_timeout_indication {
            bits |= Self::CCTOE;
        }
        if self.cv_timeout_indication {
            bits |= Self::CVTOE;
        }
        if self.float_timeout_indication {
            bits |= Self::FVTOE;
        }
        bits
    }

    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self::from_bits(u16::from_le_bytes(bytes))
    }

    pub fn to_le_bytes(&self) -> [u8; 2] {
        self.bits().to_le_bytes()
    }

    pub fn describe(&self) -> Vec<&'static str> {
        let mut out = vec![
            match self.curve {
                ChargeCurve::Custom => "Custom curve",
                ChargeCurve::Preset1 => "Preset curve 1",
                ChargeCurve::Preset2 => "Preset curve 2",
                ChargeCurve::Preset3 => "Preset curve 3",
            },
            match self.temp_compensation {
                TempCompensation::Disabled => "No temperature compensation",
                TempCompensation::Minus3MilliVolts => "-3mV/°C/cell compensation",
                TempCompensation::Minus4MilliVolts => "-4mV/°C/cell compensation",
                TempCompensation::Minus5MilliVolts => "-5mV/°C/cell compensation",
            },
            if self.two_stage { "2-stage" } else { "3-stage" },
        ];
        if self.cc_timeout_indication {
            out.push("CC timeout indication");
        }
        if self.cv_timeout_indication {
            out.push("CV timeout indication");
        }
        if self.float_timeout_indication {
            out.push("Float timeout indication");
        }
        out
    }
}

impl Default for CurveConfig {
    /// Factory setting.
    fn default() -> Self {
        Self::from_bits(0x0004)
    }
}
