//! Value types shared by both protocol layers.

use core::fmt;
use core::fmt::Write;

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

use crate::error::MalformedMessage;

pub const MAX_CALLSIGN_LEN: usize = 16;
pub const TARGET_NUMBER_LEN: usize = 6;

const_assert_eq!(TARGET_NUMBER_LEN, 2 + 4);

/// Local validation shared by every message.
pub trait Validate {
    /// # Errors
    ///
    /// Returns the first field that breaks its rules.
    fn validate(&self) -> Result<(), MalformedMessage>;
}

pub(crate) fn check_text(field: &'static str, text: &str, max: usize) -> Result<(), MalformedMessage> {
    if text.len() > max {
        return Err(MalformedMessage::TextTooLong {
            field,
            len: text.len(),
            max,
        });
    }
    Ok(())
}

/// Radio callsign of an FO, FDC or gun section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Callsign(ArrayString<MAX_CALLSIGN_LEN>);

impl Callsign {
    /// # Errors
    ///
    /// Fails on empty input, more than 16 characters, or anything other
    /// than `A-Z`, `0-9` and `-`.
    pub fn new(input: &str) -> Result<Self, MalformedMessage> {
        let valid_chars = input
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-');
        if input.is_empty() || !valid_chars {
            return Err(MalformedMessage::Callsign(input.to_string()));
        }
        ArrayString::from(input)
            .map(Self)
            .map_err(|_| MalformedMessage::Callsign(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Callsign {
    type Error = MalformedMessage;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Callsign> for String {
    fn from(callsign: Callsign) -> Self {
        callsign.0.to_string()
    }
}

/// Mission identifier assigned by the FDC, e.g. `AN2001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetNumber(ArrayString<TARGET_NUMBER_LEN>);

impl TargetNumber {
    /// # Errors
    ///
    /// Fails unless the input is two uppercase letters followed by four digits.
    pub fn new(input: &str) -> Result<Self, MalformedMessage> {
        let bytes = input.as_bytes();
        let well_formed = bytes.len() == TARGET_NUMBER_LEN
            && bytes[..2].iter().all(u8::is_ascii_uppercase)
            && bytes[2..].iter().all(u8::is_ascii_digit);
        if !well_formed {
            return Err(MalformedMessage::TargetNumber(input.to_string()));
        }
        ArrayString::from(input)
            .map(Self)
            .map_err(|_| MalformedMessage::TargetNumber(input.to_string()))
    }

    /// Builds `<prefix><serial>` with the serial zero padded to four digits.
    ///
    /// # Errors
    ///
    /// Fails when the prefix is not two uppercase letters or the serial
    /// exceeds 9999.
    pub fn from_parts(prefix: &str, serial: u16) -> Result<Self, MalformedMessage> {
        Self::new(&format!("{prefix}{serial:04}"))
    }

    /// Builds a target number from parts already known to be valid.
    pub(crate) fn compose(prefix: &ArrayString<2>, serial: u16) -> Self {
        let mut text = ArrayString::<TARGET_NUMBER_LEN>::new();
        text.push_str(prefix);
        let _ = write!(text, "{:04}", serial % 10_000);
        Self(text)
    }

    /// # Errors
    ///
    /// Fails when the bytes are not a well formed target number.
    pub fn from_wire(bytes: [u8; TARGET_NUMBER_LEN]) -> Result<Self, MalformedMessage> {
        let text = core::str::from_utf8(&bytes)
            .map_err(|_| MalformedMessage::TargetNumber(String::from_utf8_lossy(&bytes).into_owned()))?;
        Self::new(text)
    }

    pub fn to_wire(&self) -> [u8; TARGET_NUMBER_LEN] {
        let mut bytes = [0u8; TARGET_NUMBER_LEN];
        bytes.copy_from_slice(self.0.as_bytes());
        bytes
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TargetNumber {
    type Error = MalformedMessage;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TargetNumber> for String {
    fn from(target_number: TargetNumber) -> Self {
        target_number.0.to_string()
    }
}

/// Ammunition types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Ammunition {
    HighExplosive = 0x00,
    Smoke = 0x01,
    Illumination = 0x02,
}

impl Default for Ammunition {
    fn default() -> Self {
        Self::HighExplosive
    }
}

impl TryFrom<u8> for Ammunition {
    type Error = MalformedMessage;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::HighExplosive),
            0x01 => Ok(Self::Smoke),
            0x02 => Ok(Self::Illumination),
            _ => Err(MalformedMessage::UnknownEnumValue {
                kind: "ammunition",
                value,
            }),
        }
    }
}

impl From<Ammunition> for u8 {
    fn from(ammunition: Ammunition) -> Self {
        ammunition as u8
    }
}
