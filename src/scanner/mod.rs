//! Scan sources that feed raw advertisements to the aggregator.
//!
//! A scan source produces [`ScanEvent`]s on a channel until its stop token is
//! cancelled, then releases the radio. Event bytes start at the 16-bit
//! identifier of a manufacturer specific data (AD type `0xFF`) or 16-bit
//! service data (AD type `0x16`) structure, which is the buffer beacon layouts
//! are written against.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Channel buffer size for scan events.
pub const SCAN_CHANNEL_BUFFER_SIZE: usize = 256;

/// AD type of manufacturer specific data.
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xff;

/// AD type of 16-bit UUID service data.
pub const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;

/// One advertisement seen by a scan source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    /// AD structure payload, starting at the little-endian 16-bit identifier.
    pub bytes: Vec<u8>,
    /// Tag of the originating device (the advertiser address).
    pub device: String,
    pub rssi: i8,
    /// The complete frame the event was cut from, for debugging.
    pub raw: Vec<u8>,
}

/// Error type for scan sources.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Future returned by [`ScanSource::start_scan`].
pub type StartScan<'a> =
    Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ScanEvent>, ScanError>> + Send + 'a>>;

/// Something that produces scan events until `stop` is cancelled.
///
/// Implementations must stop producing and release their radio promptly once
/// `stop` fires; the returned channel closes when they are done.
pub trait ScanSource: Send + Sync {
    fn start_scan(&self, stop: CancellationToken) -> StartScan<'_>;
}

/// Scan source backed by one of the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackendSource {
    pub backend: Backend,
}

impl BackendSource {
    pub fn new(backend: Backend) -> Self {
        BackendSource { backend }
    }
}

impl ScanSource for BackendSource {
    fn start_scan(&self, stop: CancellationToken) -> StartScan<'_> {
        let backend = self.backend;
        Box::pin(async move { start_scan(backend, stop).await })
    }
}

/// Start scanning with the specified backend.
pub async fn start_scan(
    backend: Backend,
    stop: CancellationToken,
) -> Result<mpsc::Receiver<ScanEvent>, ScanError> {
    tracing::info!(%backend, "Starting scan");
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(stop).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(stop).await,
    }
}

/// Walk the AD structures of one advertisement and return an event for every
/// manufacturer data or 16-bit service data structure in it.
pub fn events_from_ad_data(ad_data: &[u8], device: &str, rssi: i8, raw: &[u8]) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        if matches!(ad_type, AD_TYPE_MANUFACTURER_DATA | AD_TYPE_SERVICE_DATA_16) && len >= 3 {
            events.push(ScanEvent {
                bytes: ad_data[offset + 2..offset + 1 + len].to_vec(),
                device: device.to_string(),
                rssi,
                raw: raw.to_vec(),
            });
        }

        offset += 1 + len;
    }

    events
}

/// Build event bytes from a 16-bit identifier and its payload, as BlueZ hands
/// them out already split.
pub fn prefixed_bytes(id: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + payload.len());
    bytes.extend_from_slice(&id.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::LayoutSet;
    use crate::test_utils::{PROPER_ALTBEACON, eddystone_uid_ad, hex};
    use std::str::FromStr;

    fn ad_structure(ad_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![payload.len() as u8 + 1, ad_type];
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_events_from_ad_data() {
        let mut ad = ad_structure(0x01, &[0x06]); // flags
        ad.extend(ad_structure(0x03, &[0xaa, 0xfe])); // service uuid list
        ad.extend(ad_structure(AD_TYPE_SERVICE_DATA_16, &eddystone_uid_ad()));
        ad.extend(ad_structure(AD_TYPE_MANUFACTURER_DATA, &hex(PROPER_ALTBEACON)));

        let events = events_from_ad_data(&ad, "00:07:80:14:47:d5", -70, &ad);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].bytes, eddystone_uid_ad());
        assert_eq!(events[1].bytes, hex(PROPER_ALTBEACON));
        assert!(events.iter().all(|e| e.rssi == -70 && e.raw == ad));

        let set = LayoutSet::defaults();
        assert_eq!(set.parse(&events[0].bytes).unwrap().beacon_type, "eddystone_uid");
        assert_eq!(set.parse(&events[1].bytes).unwrap().beacon_type, "altbeacon");
    }

    #[test]
    fn test_events_from_truncated_ad_data() {
        let mut ad = ad_structure(AD_TYPE_MANUFACTURER_DATA, &[0x18, 0x01, 0xbe, 0xac]);
        ad.extend([0x10, AD_TYPE_SERVICE_DATA_16, 0xaa]);
        let events = events_from_ad_data(&ad, "dev", -40, &ad);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bytes, vec![0x18, 0x01, 0xbe, 0xac]);

        assert!(events_from_ad_data(&[0x00, 0xff, 0x01], "dev", -40, &[]).is_empty());
        assert!(events_from_ad_data(&[], "dev", -40, &[]).is_empty());
    }

    #[test]
    fn test_prefixed_bytes() {
        assert_eq!(prefixed_bytes(0xfeaa, &[0x10]), vec![0xaa, 0xfe, 0x10]);
    }

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Bluetooth("adapter missing".to_string());
        assert_eq!(err.to_string(), "Bluetooth error: adapter missing");
    }

    #[test]
    fn test_backend_from_str() {
        #[cfg(feature = "bluer")]
        {
            assert_eq!(Backend::from_str("bluer").unwrap(), Backend::Bluer);
            assert_eq!(Backend::from_str("bluez").unwrap(), Backend::Bluer);
        }
        #[cfg(feature = "hci")]
        {
            assert_eq!(Backend::from_str("hci").unwrap(), Backend::Hci);
            assert_eq!(Backend::from_str("raw").unwrap(), Backend::Hci);
        }
        assert!(Backend::from_str("invalid").is_err());
    }

    #[test]
    #[cfg(not(feature = "bluer"))]
    fn test_backend_from_str_without_bluer() {
        assert!(Backend::from_str("bluer").is_err());
    }

    #[test]
    fn test_backend_display() {
        #[cfg(feature = "bluer")]
        assert_eq!(format!("{}", Backend::Bluer), "bluer");
        #[cfg(feature = "hci")]
        assert_eq!(format!("{}", Backend::Hci), "hci");
        assert!(!Backend::default().to_string().is_empty());
    }
}
