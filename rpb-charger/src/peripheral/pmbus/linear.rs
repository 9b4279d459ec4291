//! PMBus linear data formats.
//!
//! Two encodings share the 16-bit word:
//!
//! - [`Linear11`]: the standard PMBus LINEAR11 format, a 5-bit two's-complement
//!   exponent above an 11-bit two's-complement mantissa.
//! - [`LinearVoltage`]: the RPB-1600's output-voltage format. The whole word is
//!   an unsigned magnitude and the exponent comes from the register catalog,
//!   not from the payload.

use super::{
    upscale_twos_complement, PMBusError, EXPONENT_LENGTH, EXPONENT_SHIFT, MANTISSA_LENGTH,
    MANTISSA_MASK,
};

/// LINEAR11 word (5-bit exponent, 11-bit mantissa).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Linear11(pub u16);

impl Linear11 {
    /// Largest exponent magnitude accepted when encoding.
    pub const MAX_EXPONENT: i8 = 15;
    /// Mantissa bounds accepted when encoding. The upper bound admits the
    /// unsigned 11-bit mantissas the charger uses for its setpoints.
    pub const MIN_MANTISSA: i64 = -1024;
    pub const MAX_MANTISSA: i64 = 2047;

    pub fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Assemble the word from a response payload, low byte first.
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }

    /// Wire representation, low byte first.
    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Sign-extended exponent N, in [-16, 15].
    pub fn exponent(self) -> i8 {
        let raw = (self.0 >> EXPONENT_SHIFT) as i32;
        upscale_twos_complement(raw, EXPONENT_LENGTH) as i8
    }

    /// Sign-extended mantissa M, in [-1024, 1023].
    pub fn mantissa(self) -> i16 {
        let raw = (self.0 & MANTISSA_MASK) as i32;
        upscale_twos_complement(raw, MANTISSA_LENGTH) as i16
    }

    /// Mantissa read as an unsigned 11-bit magnitude, in [0, 2047].
    ///
    /// The charger's fixed-exponent setpoints and counters use the full
    /// field, so 1024..=2047 are large positive values rather than negative.
    pub fn unsigned_mantissa(self) -> u16 {
        self.0 & MANTISSA_MASK
    }

    /// Integer value `M × 2^N`, computed by shifting the mantissa.
    ///
    /// Negative exponents shift right, so fractional parts are floored.
    pub fn to_int(self) -> i32 {
        shift(self.mantissa() as i32, self.exponent())
    }

    /// Exact value `M × 2^N` as a float.
    pub fn to_f32(self) -> f32 {
        self.mantissa() as f32 * 2.0_f32.powi(self.exponent() as i32)
    }

    /// Like [`Linear11::to_int`], with the mantissa taken as unsigned.
    pub fn to_unsigned_int(self) -> i32 {
        shift(self.unsigned_mantissa() as i32, self.exponent())
    }

    /// Like [`Linear11::to_f32`], with the mantissa taken as unsigned.
    pub fn to_unsigned_f32(self) -> f32 {
        self.unsigned_mantissa() as f32 * 2.0_f32.powi(self.exponent() as i32)
    }

    /// Pack an exponent and a mantissa into a LINEAR11 word.
    ///
    /// Fails when the exponent magnitude exceeds 15 or the mantissa does not
    /// fit the 11-bit field; nothing is truncated.
    pub fn encode(exponent: i8, mantissa: i64) -> Result<Self, PMBusError> {
        check_exponent(exponent)?;
        if !(Self::MIN_MANTISSA..=Self::MAX_MANTISSA).contains(&mantissa) {
            return Err(PMBusError::MantissaOutOfRange(mantissa));
        }

        let mantissa = mantissa as u16;
        let low = mantissa & 0x00FF;
        let high = ((mantissa >> 8) & 0x07) | (((exponent as u16) & 0x1F) << 3);

        Ok(Self((high << 8) | low))
    }

    /// Encode an integer value with a fixed exponent, rescaling it so that
    /// `mantissa × 2^exponent` equals `value`.
    ///
    /// Positive exponents round to the nearest representable step.
    pub fn from_int(exponent: i8, value: i32) -> Result<Self, PMBusError> {
        check_exponent(exponent)?;

        let value = value as i64;
        let mantissa = if exponent > 0 {
            (value + (1 << (exponent - 1))) >> exponent
        } else {
            value << -exponent
        };

        Self::encode(exponent, mantissa)
    }

    /// Encode an engineering value with a fixed exponent, rounding to the
    /// nearest mantissa.
    pub fn from_f32(exponent: i8, value: f32) -> Result<Self, PMBusError> {
        check_exponent(exponent)?;

        let mantissa = (value / 2.0_f32.powi(exponent as i32)).round();
        if !mantissa.is_finite()
            || mantissa < Self::MIN_MANTISSA as f32
            || mantissa > Self::MAX_MANTISSA as f32
        {
            return Err(PMBusError::ValueOutOfRange(value));
        }

        Self::encode(exponent, mantissa as i64)
    }
}

fn shift(mantissa: i32, exponent: i8) -> i32 {
    if exponent > 0 {
        mantissa << exponent
    } else if exponent < 0 {
        mantissa >> -exponent
    } else {
        mantissa
    }
}

fn check_exponent(exponent: i8) -> Result<(), PMBusError> {
    if exponent.unsigned_abs() > Linear11::MAX_EXPONENT as u8 {
        return Err(PMBusError::ExponentOutOfRange(exponent as i32));
    }
    Ok(())
}

/// RPB-1600 voltage word: a 16-bit magnitude scaled by a catalog exponent.
///
/// The firmware treats a positive exponent as producing a negative value.
/// That is not PMBus LINEAR16 behaviour, but it is what the charger does, so
/// both directions keep it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearVoltage {
    pub value: u16,
    pub exponent: i8,
}

impl LinearVoltage {
    pub fn new(value: u16, exponent: i8) -> Self {
        Self { value, exponent }
    }

    pub fn from_le_bytes(bytes: [u8; 2], exponent: i8) -> Self {
        Self::new(u16::from_le_bytes(bytes), exponent)
    }

    pub fn to_le_bytes(self) -> [u8; 2] {
        self.value.to_le_bytes()
    }

    fn divisor(exponent: i8) -> f32 {
        2.0_f32.powi(exponent.unsigned_abs() as i32)
    }

    /// Volts represented by this word.
    pub fn to_f32(self) -> f32 {
        let raw = self.value as f32;
        let divisor = Self::divisor(self.exponent);

        if self.exponent > 0 {
            -raw / divisor
        } else if self.exponent < 0 {
            raw / divisor
        } else {
            raw
        }
    }

    /// Encode volts with the given exponent, the inverse of [`Self::to_f32`].
    pub fn from_f32(volts: f32, exponent: i8) -> Result<Self, PMBusError> {
        let divisor = Self::divisor(exponent);
        let raw = if exponent > 0 {
            (-volts * divisor).round()
        } else if exponent < 0 {
            (volts * divisor).round()
        } else {
            volts.round()
        };

        if !raw.is_finite() || raw < 0.0 || raw > u16::MAX as f32 {
            return Err(PMBusError::ValueOutOfRange(volts));
        }

        Ok(Self::new(raw as u16, exponent))
    }
}
