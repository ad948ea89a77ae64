//! 16 byte beacon proximity UUID.

use crate::field::{self, Field, FieldError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Uuid(pub [u8; 16]);

impl Uuid {
    /// The UUID in little-endian (reversed) byte order.
    pub fn reversed(&self) -> [u8; 16] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    /// A UUID whose first four bytes, read as a big-endian `u32`, are
    /// advanced by `index`. Used to derive a family of related UUIDs.
    pub fn add_index(&self, index: u32) -> Uuid {
        let mut bytes = self.0;
        let head = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        bytes[..4].copy_from_slice(&head.wrapping_add(index).to_be_bytes());
        Uuid(bytes)
    }
}

impl FromStr for Uuid {
    type Err = FieldError;

    /// Accepts 32 hex digits, with or without dashes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();
        let bytes = field::decode_hex(&digits)?;
        let bytes: [u8; 16] = bytes.try_into().map_err(|b: Vec<u8>| FieldError::Length {
            expected: 16,
            actual: b.len(),
        })?;
        Ok(Uuid(bytes))
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&field::encode_hex(&self.0))
    }
}

impl From<Uuid> for Field {
    fn from(uuid: Uuid) -> Self {
        Field::from_bytes(uuid.0)
    }
}

impl Serialize for Uuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Field::from(*self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Uuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let field = Field::deserialize(deserializer)?;
        let bytes: [u8; 16] = field
            .as_bytes()
            .try_into()
            .map_err(|_| serde::de::Error::invalid_length(field.len(), &"16 bytes"))?;
        Ok(Uuid(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::UUID_HEX;

    #[test]
    fn test_from_str_with_and_without_dashes() {
        let plain: Uuid = UUID_HEX.parse().unwrap();
        let dashed: Uuid = "66484D6E-54BF-4D67-B269-8B100151510B".parse().unwrap();
        assert_eq!(plain, dashed);
        assert_eq!(plain.to_string(), UUID_HEX);
    }

    #[test]
    fn test_from_str_invalid() {
        assert_eq!(
            "0102".parse::<Uuid>(),
            Err(FieldError::Length {
                expected: 16,
                actual: 2
            })
        );
        assert!("not-a-uuid".parse::<Uuid>().is_err());
    }

    #[test]
    fn test_reversed() {
        let mut bytes = [0u8; 16];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let reversed = Uuid(bytes).reversed();
        assert_eq!(reversed[0], 15);
        assert_eq!(reversed[15], 0);
    }

    #[test]
    fn test_add_index() {
        let uuid: Uuid = UUID_HEX.parse().unwrap();
        let next = uuid.add_index(2);
        assert_eq!(next.to_string(), "66484d7054bf4d67b2698b100151510b");

        let max = Uuid([0xff; 16]);
        assert_eq!(&max.add_index(1).0[..4], &[0, 0, 0, 0]);
        assert_eq!(&max.add_index(1).0[4..], &[0xff; 12]);
    }

    #[test]
    fn test_json() {
        let uuid: Uuid = UUID_HEX.parse().unwrap();
        let json = serde_json::to_string(&uuid).unwrap();
        assert_eq!(json, format!("\"{UUID_HEX}\""));
        assert_eq!(serde_json::from_str::<Uuid>(&json).unwrap(), uuid);
        assert!(serde_json::from_str::<Uuid>("\"0102\"").is_err());
    }
}
