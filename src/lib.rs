//! `beacon-listener` library.
//!
//! Decodes AltBeacon and Eddystone advertisements with declarative byte
//! layouts, aggregates repeated sightings into per-window snapshots and
//! generates advertisements for local broadcast.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, signals and
//! process exit codes. The run loops live in [`crate::app`] where they can be
//! tested with injected scan sources, advertisers and output streams.

pub mod advertiser;
pub mod aggregator;
pub mod altbeacon;
pub mod app;
pub mod beacon;
pub mod codec;
pub mod duration;
pub mod eddystone;
pub mod field;
pub mod layout;
pub mod mac_address;
pub mod output;
pub mod scanner;
pub mod uuid;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertiser::{AdvertiseError, Advertiser};
pub use aggregator::{AggregatorConfig, AggregatorHandle, AggregatorState, ScanAggregator, Snapshot};
pub use beacon::Beacon;
pub use codec::{GenerateError, LayoutSet};
pub use eddystone::{Telemetry, UrlError, compress_url, decompress_url};
pub use field::{Field, FieldError, Fields};
pub use layout::{DEFAULT_LAYOUTS, FieldSpec, Layout, LayoutError};
pub use mac_address::MacAddress;
pub use output::{JsonFormatter, SnapshotFormatter, TextFormatter};
pub use scanner::{Backend, ScanError, ScanEvent, ScanSource};
pub use uuid::Uuid;
