//! BlueZ D-Bus scan source.
//!
//! Uses the `bluer` crate to talk to the BlueZ daemon via D-Bus. Requires the
//! `bluetoothd` daemon to be running. BlueZ reports manufacturer and service
//! data already split from their identifiers, so event bytes are rebuilt with
//! the identifier in front and `raw` holds the same bytes.

use super::{SCAN_CHANNEL_BUFFER_SIZE, ScanError, ScanEvent, prefixed_bytes};
use crate::mac_address::MacAddress;
use bluer::{
    Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session, Uuid,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bluetooth base UUID with the 16-bit short UUID bits cleared.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;
const SHORT_UUID_MASK: u128 = 0xffff << 96;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start scanning for advertisements using the BlueZ D-Bus backend.
///
/// Runs LE discovery with duplicate reporting on the default adapter and sends
/// a [`ScanEvent`] for every manufacturer or 16-bit service data entry each
/// time a device is reported. Discovery ends when `stop` is cancelled.
pub async fn start_scan(stop: CancellationToken) -> Result<mpsc::Receiver<ScanEvent>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let discovery = adapter.discover_devices_with_changes().await?;
    let (tx, rx) = mpsc::channel(SCAN_CHANNEL_BUFFER_SIZE);

    // The task owns all Bluetooth state; dropping the discovery stream ends
    // discovery on the adapter.
    tokio::spawn(async move {
        let _session = session;
        let mut discovery = Box::pin(discovery);

        loop {
            let event = tokio::select! {
                _ = stop.cancelled() => break,
                event = discovery.next() => event,
            };
            let address = match event {
                Some(AdapterEvent::DeviceAdded(address)) => address,
                Some(_) => continue,
                None => break,
            };

            match device_events(&adapter, address).await {
                Ok(events) => {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            debug!("Scan event receiver dropped");
                            return;
                        }
                    }
                }
                Err(e) => debug!(%address, error = %e, "Failed to read device data"),
            }
        }

        info!("BlueZ scan stopped");
    });

    Ok(rx)
}

/// Read the current advertisement data of one device.
async fn device_events(adapter: &Adapter, address: Address) -> Result<Vec<ScanEvent>, ScanError> {
    let device = adapter.device(address)?;
    let Some(rssi) = device.rssi().await? else {
        // No RSSI means the device was not seen in this scan
        return Ok(Vec::new());
    };
    let rssi = rssi.clamp(i8::MIN.into(), i8::MAX.into()) as i8;
    let tag = MacAddress::from(address).to_string();

    let mut events = Vec::new();
    let mut push = |bytes: Vec<u8>| {
        events.push(ScanEvent {
            raw: bytes.clone(),
            bytes,
            device: tag.clone(),
            rssi,
        })
    };

    if let Some(manufacturer_data) = device.manufacturer_data().await? {
        for (id, payload) in manufacturer_data {
            push(prefixed_bytes(id, &payload));
        }
    }
    if let Some(service_data) = device.service_data().await? {
        for (uuid, payload) in service_data {
            if let Some(short) = short_uuid(&uuid) {
                push(prefixed_bytes(short, &payload));
            }
        }
    }

    Ok(events)
}

/// The full UUID of a 16-bit service UUID.
pub(crate) fn service_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96))
}

/// The 16-bit form of a UUID derived from the Bluetooth base UUID.
fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    (value & !SHORT_UUID_MASK == BLUETOOTH_BASE_UUID).then_some((value >> 96) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_to_device_tag() {
        let addr = Address([0x00, 0x07, 0x80, 0x14, 0x47, 0xd5]);
        assert_eq!(MacAddress::from(addr).to_string(), "00:07:80:14:47:d5");
    }

    #[test]
    fn test_short_uuid() {
        let eddystone = Uuid::from_u128(0x0000_feaa_0000_1000_8000_0080_5f9b_34fb);
        assert_eq!(short_uuid(&eddystone), Some(0xfeaa));

        let custom = Uuid::from_u128(0x6648_4d6e_54bf_4d67_b269_8b10_0151_510b);
        assert_eq!(short_uuid(&custom), None);

        assert_eq!(service_uuid(0xfeaa), eddystone);
        assert_eq!(short_uuid(&service_uuid(0x1234)), Some(0x1234));
    }
}
