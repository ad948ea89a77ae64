//! Beacon identifier and data field values.
//!
//! A [`Field`] is an opaque byte sequence cut out of an advertisement. It has
//! no type tag of its own; consumers pick an interpretation from its length.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Ordered list of fields. Equality is positional.
pub type Fields = Vec<Field>;

/// Errors returned when building a field from text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("invalid hex: odd number of digits in '{0}'")]
    OddLength(String),
    #[error("invalid hex: '{0}' is not a hex digit")]
    InvalidDigit(char),
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// An immutable beacon identifier or data field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Field(Vec<u8>);

impl Field {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Field(bytes.into())
    }

    /// Parse a field from a hex string such as `"beac"` or `"E858FC8A"`.
    pub fn from_hex(src: &str) -> Result<Self, FieldError> {
        decode_hex(src).map(Field)
    }

    /// A single-byte field holding a signed value (e.g. measured power).
    pub fn from_i8(value: i8) -> Self {
        Field(vec![value as u8])
    }

    /// A two-byte big-endian field (e.g. AltBeacon major/minor).
    pub fn from_u16(value: u16) -> Self {
        Field(value.to_be_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Signed value of a one-byte field.
    pub fn as_i8(&self) -> Option<i8> {
        match self.0.as_slice() {
            [b] => Some(*b as i8),
            _ => None,
        }
    }

    /// Big-endian value of a two-byte field.
    pub fn as_u16(&self) -> Option<u16> {
        match self.0.as_slice() {
            [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl From<Vec<u8>> for Field {
    fn from(bytes: Vec<u8>) -> Self {
        Field(bytes)
    }
}

impl From<&[u8]> for Field {
    fn from(bytes: &[u8]) -> Self {
        Field(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Field {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// One byte renders signed, two bytes big-endian unsigned, anything else as
/// lowercase hex.
impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [b] => write!(f, "{}", *b as i8),
            [hi, lo] => write!(f, "{}", u16::from_be_bytes([*hi, *lo])),
            bytes => f.write_str(&encode_hex(bytes)),
        }
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = Field;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a hex encoded byte string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Field, E> {
                Field::from_hex(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}

pub(crate) fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

pub(crate) fn decode_hex(src: &str) -> Result<Vec<u8>, FieldError> {
    if src.len() % 2 != 0 {
        return Err(FieldError::OddLength(src.to_string()));
    }

    let digits: Vec<u8> = src
        .chars()
        .map(|c| {
            c.to_digit(16)
                .map(|d| d as u8)
                .ok_or(FieldError::InvalidDigit(c))
        })
        .collect::<Result<_, _>>()?;

    Ok(digits.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}
