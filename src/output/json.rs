//! JSON lines snapshot output.

use crate::beacon::Beacon;
use crate::eddystone::Telemetry;
use crate::field::Field;
use crate::output::SnapshotFormatter;
use serde::Serialize;

/// Prints one JSON object per snapshot on a single line.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

#[derive(Serialize)]
struct SnapshotView<'a> {
    beacons: Vec<BeaconView<'a>>,
}

#[derive(Serialize)]
struct BeaconView<'a> {
    device: &'a str,
    #[serde(rename = "type")]
    beacon_type: &'a str,
    ids: &'a [Field],
    data: &'a [Field],
    #[serde(skip_serializing_if = "Option::is_none")]
    power: Option<i8>,
    /// Mean RSSI, `null` when no samples were recorded.
    rssi: Option<f64>,
    scans: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    telemetry: Option<Telemetry>,
}

impl<'a> From<&'a Beacon> for BeaconView<'a> {
    fn from(beacon: &'a Beacon) -> Self {
        let rssi = beacon.rssi();
        BeaconView {
            device: &beacon.device,
            beacon_type: &beacon.beacon_type,
            ids: &beacon.ids,
            data: &beacon.data,
            power: beacon.power.as_i8(),
            rssi: (!rssi.is_nan()).then_some(rssi),
            scans: beacon.rssi_samples().len(),
            url: beacon.url().and_then(Result::ok),
            telemetry: Telemetry::from_beacon(beacon),
        }
    }
}

impl SnapshotFormatter for JsonFormatter {
    fn format(&self, snapshot: &[Beacon]) -> String {
        let view = SnapshotView {
            beacons: snapshot.iter().map(BeaconView::from).collect(),
        };
        match serde_json::to_string(&view) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize snapshot");
                String::new()
            }
        }
    }
}
