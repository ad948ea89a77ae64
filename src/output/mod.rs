//! Output formatters for beacon snapshots.
//!
//! Each emitted window is rendered as one block of text by a
//! [`SnapshotFormatter`]. The run loop writes the block to stdout as is.

pub mod json;
pub mod text;

use crate::beacon::Beacon;

pub use json::JsonFormatter;
pub use text::TextFormatter;

/// Output formats selectable on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// One line per beacon, snapshots separated by a blank line
    #[default]
    Text,
    /// One JSON document per snapshot
    Json,
}

impl Format {
    pub fn formatter(self) -> Box<dyn SnapshotFormatter> {
        match self {
            Format::Text => Box::new(TextFormatter),
            Format::Json => Box::new(JsonFormatter),
        }
    }
}

/// Trait for rendering a snapshot into an output block.
pub trait SnapshotFormatter: Send + Sync {
    /// Format one window's beacons. The returned block includes its trailing
    /// newline(s).
    fn format(&self, snapshot: &[Beacon]) -> String;
}
