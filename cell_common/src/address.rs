//! Line controller device addresses.
//!
//! `SignalAddress` maps a string like `"Y1E"` or `"D100"` to a typed
//! device code and number. Addresses are immutable and compared by value,
//! so `"x0e"`, `"X0E"` and `"XE"` name the same input.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

// ─── DeviceCode ─────────────────────────────────────────────────────

/// Device area on the line controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceCode {
    /// Physical input (hex numbered).
    X,
    /// Physical output (hex numbered).
    Y,
    /// Internal relay.
    M,
    /// Latch relay.
    L,
    /// Link relay (hex numbered).
    B,
    /// Data register (word).
    D,
    /// Link register (word, hex numbered).
    W,
    /// File register (word).
    R,
}

impl DeviceCode {
    /// Whether the device number is written in hexadecimal.
    pub const fn is_hex(self) -> bool {
        matches!(self, Self::X | Self::Y | Self::B | Self::W)
    }

    /// Whether the device holds 16-bit words rather than single bits.
    pub const fn is_word(self) -> bool {
        matches!(self, Self::D | Self::W | Self::R)
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            'X' => Some(Self::X),
            'Y' => Some(Self::Y),
            'M' => Some(Self::M),
            'L' => Some(Self::L),
            'B' => Some(Self::B),
            'D' => Some(Self::D),
            'W' => Some(Self::W),
            'R' => Some(Self::R),
            _ => None,
        }
    }

    const fn as_char(self) -> char {
        match self {
            Self::X => 'X',
            Self::Y => 'Y',
            Self::M => 'M',
            Self::L => 'L',
            Self::B => 'B',
            Self::D => 'D',
            Self::W => 'W',
            Self::R => 'R',
        }
    }
}

// ─── SignalAddress ──────────────────────────────────────────────────

/// One bit or word location on the line controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignalAddress {
    device: DeviceCode,
    number: u32,
}

impl SignalAddress {
    /// Build an address from its parts.
    pub const fn new(device: DeviceCode, number: u32) -> Self {
        Self { device, number }
    }

    /// Parse an address, reporting malformed text as a configuration error.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        text.parse()
    }

    /// Device area.
    #[inline]
    pub fn device(&self) -> DeviceCode {
        self.device
    }

    /// Device number within its area.
    #[inline]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Whether this address names a word register.
    #[inline]
    pub fn is_word(&self) -> bool {
        self.device.is_word()
    }

    /// Whether this address names a single bit.
    #[inline]
    pub fn is_bit(&self) -> bool {
        !self.device.is_word()
    }
}

impl fmt::Display for SignalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device.is_hex() {
            write!(f, "{}{:02X}", self.device.as_char(), self.number)
        } else {
            write!(f, "{}{}", self.device.as_char(), self.number)
        }
    }
}

impl FromStr for SignalAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let code = chars
            .next()
            .map(|c| c.to_ascii_uppercase())
            .ok_or_else(|| ConfigError::invalid("empty device address"))?;
        let device = DeviceCode::from_char(code).ok_or_else(|| {
            ConfigError::invalid(format!("unknown device code in address {s:?}"))
        })?;

        let digits = chars.as_str();
        if digits.is_empty() {
            return Err(ConfigError::invalid(format!(
                "address {s:?} has no device number"
            )));
        }
        let radix = if device.is_hex() { 16 } else { 10 };
        let number = u32::from_str_radix(digits, radix).map_err(|_| {
            ConfigError::invalid(format!(
                "address {s:?}: {digits:?} is not a base-{radix} device number"
            ))
        })?;

        Ok(Self { device, number })
    }
}

impl TryFrom<String> for SignalAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SignalAddress> for String {
    fn from(value: SignalAddress) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bit_and_word_devices() {
        let y1e: SignalAddress = "Y1E".parse().unwrap();
        assert_eq!(y1e.device(), DeviceCode::Y);
        assert_eq!(y1e.number(), 0x1E);
        assert!(y1e.is_bit());

        let m100: SignalAddress = "M100".parse().unwrap();
        assert_eq!(m100.device(), DeviceCode::M);
        assert_eq!(m100.number(), 100);

        let d110: SignalAddress = "D110".parse().unwrap();
        assert!(d110.is_word());
        assert_eq!(d110.number(), 110);
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(SignalAddress::parse("x0e").unwrap().to_string(), "X0E");
        assert_eq!(SignalAddress::parse("XE").unwrap().to_string(), "X0E");
        assert_eq!(SignalAddress::parse("Y12").unwrap().to_string(), "Y12");
        assert_eq!(SignalAddress::parse("M0200").unwrap().to_string(), "M200");
    }

    #[test]
    fn equal_by_value() {
        assert_eq!(
            SignalAddress::parse("X0E").unwrap(),
            SignalAddress::parse("xE").unwrap()
        );
        assert_ne!(
            SignalAddress::parse("X0E").unwrap(),
            SignalAddress::parse("Y0E").unwrap()
        );
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "Q10", "M", "M1A", "Xzz", "D-1"] {
            assert!(
                matches!(SignalAddress::parse(bad), Err(ConfigError::ValidationError(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn serde_uses_text_form() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Wrapper {
            addr: SignalAddress,
        }

        let parsed: Wrapper = toml::from_str("addr = \"Y1E\"").unwrap();
        assert_eq!(parsed.addr, SignalAddress::new(DeviceCode::Y, 0x1E));
        assert!(toml::to_string(&parsed).unwrap().contains("\"Y1E\""));
        assert!(toml::from_str::<Wrapper>("addr = \"Q1\"").is_err());
    }
}
