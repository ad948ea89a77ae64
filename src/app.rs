//! Core application runner for `beacon-listener`.
//!
//! Kept apart from process setup (signals, exit codes, logging) so the scan
//! and advertise flows can be driven from tests with fake hardware.

use crate::advertiser::{self, AdvertiseError, Advertiser};
use crate::aggregator::{AggregatorConfig, ScanAggregator};
use crate::altbeacon;
use crate::beacon::Beacon;
use crate::codec::LayoutSet;
use crate::duration::parse_duration;
use crate::eddystone::{self, UrlError};
use crate::field::FieldError;
use crate::layout::{Layout, parse_layout_arg};
use crate::output::Format;
use crate::scanner::{Backend, ScanError, ScanSource};
use crate::uuid::Uuid;
use clap::{Args, Parser, Subcommand};
use std::io;
use std::io::Write;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Command line interface. Without a subcommand, scans for beacons.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(flatten)]
    pub scan: Options,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scan for beacons and print one snapshot per window (the default)
    Scan(Options),
    /// Advertise a beacon until interrupted
    Advertise(AdvertiseOptions),
}

/// Scan configuration.
#[derive(Args, Debug, Clone)]
pub struct Options {
    /// Aggregation window. Accepts 500ms, 3s, 1m, 2h; a bare number is seconds.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub window: Duration,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Add or replace a beacon layout.
    /// Format: --layout ibeacon=m:2-3=0215,i:4-19,i:20-21,i:22-23,p:24-24
    #[arg(long = "layout", value_parser = parse_layout_arg, value_name = "NAME=LAYOUT")]
    pub layouts: Vec<Layout>,

    /// Only decode these beacon types (repeatable)
    #[arg(long = "only", value_name = "TYPE")]
    pub only: Vec<String>,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// Print the partially filled window when stopping
    #[arg(long)]
    pub flush_on_stop: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            window: Duration::from_secs(1),
            backend: Backend::default(),
            layouts: Vec::new(),
            only: Vec::new(),
            format: Format::default(),
            flush_on_stop: false,
        }
    }
}

impl Options {
    /// Default layouts with overrides applied, restricted by `--only`.
    pub fn layout_set(&self) -> LayoutSet {
        let mut set = LayoutSet::defaults();
        for layout in &self.layouts {
            set.insert(layout.clone());
        }
        if !self.only.is_empty() {
            set.retain_names(&self.only);
        }
        set
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            window: self.window,
            flush_on_stop: self.flush_on_stop,
        }
    }
}

/// Advertising configuration.
#[derive(Args, Debug, Clone)]
pub struct AdvertiseOptions {
    #[command(subcommand)]
    pub beacon: BeaconArgs,

    /// Measured power in dBm (at 1 m for AltBeacon, 0 m for Eddystone)
    #[arg(long, default_value_t = -59, allow_negative_numbers = true)]
    pub power: i8,

    /// Manufacturer id for beacons advertised as manufacturer data
    #[arg(long, default_value = "0x0118", value_parser = parse_u16)]
    pub manufacturer_id: u16,
}

#[derive(Subcommand, Debug, Clone)]
pub enum BeaconArgs {
    /// AltBeacon with uuid, major and minor
    Altbeacon { uuid: Uuid, major: u16, minor: u16 },
    /// Eddystone-UID with a 10 byte namespace and 6 byte instance, in hex
    Uid { namespace: String, instance: String },
    /// Eddystone-URL
    Url { url: String },
    /// Eddystone-EID with an 8 byte ephemeral id, in hex
    Eid { ephemeral_id: String },
}

impl BeaconArgs {
    pub fn to_beacon(&self, power: i8) -> Result<Beacon, RunError> {
        Ok(match self {
            BeaconArgs::Altbeacon { uuid, major, minor } => {
                altbeacon::new(*uuid, *major, *minor, power)
            }
            BeaconArgs::Uid {
                namespace,
                instance,
            } => eddystone::uid(namespace, instance, power)?,
            BeaconArgs::Url { url } => eddystone::url(url, power)?,
            BeaconArgs::Eid { ephemeral_id } => eddystone::eid(ephemeral_id, power)?,
        })
    }
}

fn parse_u16(src: &str) -> Result<u16, String> {
    let parsed = match src.strip_prefix("0x").or_else(|| src.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => src.parse(),
    };
    parsed.map_err(|_| format!("invalid 16-bit id: {src}"))
}

/// Errors returned by the run loops.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Advertise(#[from] AdvertiseError),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scan, aggregate and write one formatted block per snapshot to `out` until
/// `shutdown` is cancelled or the scan source closes.
pub async fn run_scan_with_io(
    options: Options,
    source: &dyn ScanSource,
    shutdown: CancellationToken,
    out: &mut dyn Write,
) -> Result<(), RunError> {
    let layouts = options.layout_set();
    if layouts.is_empty() {
        tracing::warn!(only = ?options.only, "No layouts selected, nothing will be decoded");
    }
    let formatter = options.format.formatter();

    let stop = shutdown.child_token();
    let events = source.start_scan(stop.clone()).await?;
    let aggregator = ScanAggregator::new(layouts, options.aggregator_config());
    let mut handle = aggregator.spawn_with_stop(events, stop);

    let mut result = Ok(());
    while let Some(snapshot) = handle.snapshots.recv().await {
        let block = formatter.format(&snapshot);
        if let Err(e) = out.write_all(block.as_bytes()).and_then(|_| out.flush()) {
            result = Err(e.into());
            break;
        }
    }

    // Stops the scan source too when output failed
    handle.shutdown().await;
    result
}

/// Advertise the configured beacon until `shutdown` is cancelled.
pub async fn run_advertise(
    options: AdvertiseOptions,
    advertiser: &mut dyn Advertiser,
    shutdown: CancellationToken,
) -> Result<(), RunError> {
    let beacon = options.beacon.to_beacon(options.power)?;
    let layouts = LayoutSet::defaults();

    advertiser::advertise_beacon(advertiser, &layouts, &beacon, options.manufacturer_id).await?;
    shutdown.cancelled().await;
    advertiser.stop().await?;
    Ok(())
}
