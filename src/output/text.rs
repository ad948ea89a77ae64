//! Human readable snapshot output.

use crate::beacon::Beacon;
use crate::output::SnapshotFormatter;
use std::fmt::Write;

/// Prints each beacon's display line, then a blank line ending the window.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl SnapshotFormatter for TextFormatter {
    fn format(&self, snapshot: &[Beacon]) -> String {
        let mut out = String::new();
        for beacon in snapshot {
            // Writing to a String cannot fail
            let _ = writeln!(out, "{beacon}");
        }
        out.push('\n');
        out
    }
}
