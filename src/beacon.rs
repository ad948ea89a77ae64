//! Decoded beacon entity.

use crate::field::{Field, Fields};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A beacon decoded from (or destined for) an advertisement.
///
/// `ids` and `data` line up positionally with the identifier and data terms of
/// the layout named by `beacon_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    #[serde(rename = "type")]
    pub beacon_type: String,
    pub ids: Fields,
    pub data: Fields,
    pub power: Field,
    /// Tag of the scan source that saw this beacon. Not part of the payload.
    #[serde(default)]
    pub device: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rssi_samples: Vec<i8>,
}

impl Beacon {
    pub fn new(beacon_type: impl Into<String>, ids: Fields, data: Fields, power: Field) -> Self {
        Beacon {
            beacon_type: beacon_type.into(),
            ids,
            data,
            power,
            device: String::new(),
            rssi_samples: Vec::new(),
        }
    }

    /// Whether `self` and `other` are sightings of the same beacon.
    ///
    /// Identity is the device tag plus the identifiers. Type and data are not
    /// compared, so two beacon families that happen to produce the same
    /// identifier bytes on the same device are treated as one beacon.
    pub fn same_beacon(&self, other: &Beacon) -> bool {
        self.device == other.device && self.ids == other.ids
    }

    pub fn add_rssi_sample(&mut self, rssi: i8) {
        self.rssi_samples.push(rssi);
    }

    pub fn rssi_samples(&self) -> &[i8] {
        &self.rssi_samples
    }

    /// Mean of the RSSI samples, `NaN` when there are none.
    pub fn rssi(&self) -> f64 {
        if self.rssi_samples.is_empty() {
            return f64::NAN;
        }
        let total: f64 = self.rssi_samples.iter().map(|&r| f64::from(r)).sum();
        total / self.rssi_samples.len() as f64
    }
}

impl fmt::Display for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}:", self.device, self.beacon_type)?;
        for id in &self.ids {
            write!(f, " {id}")?;
        }
        write!(
            f,
            ", rssi: {:.2}, scans: {}",
            self.rssi(),
            self.rssi_samples.len()
        )
    }
}
