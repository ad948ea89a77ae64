//! Layout driven advertisement codec.
//!
//! [`Layout`] recognises, decodes and generates advertisements of one beacon
//! family; [`LayoutSet`] dispatches over an ordered list of layouts. All
//! operations are pure: a short or foreign buffer is a non-match, never a
//! panic.

use crate::beacon::Beacon;
use crate::field::{Field, Fields};
use crate::layout::{ByteRange, DEFAULT_LAYOUTS, Layout};
use thiserror::Error;

/// Errors returned when generating an advertisement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("layout '{layout}' expects {expected} {role} fields, beacon has {actual}")]
    FieldCountMismatch {
        layout: String,
        role: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("no layout named '{0}'")]
    UnknownLayout(String),
}

impl Layout {
    /// Whether every matcher of this layout holds its expected bytes in `buf`.
    pub fn matches(&self, buf: &[u8]) -> bool {
        self.matchers()
            .all(|(range, expected)| range.slice(buf) == Some(expected))
    }

    /// Identifier fields in declaration order, or `None` if `buf` is too short.
    pub fn extract_ids(&self, buf: &[u8]) -> Option<Fields> {
        extract(self.identifiers(), buf)
    }

    /// Data fields in declaration order, or `None` if `buf` is too short.
    pub fn extract_data(&self, buf: &[u8]) -> Option<Fields> {
        extract(self.data_fields(), buf)
    }

    /// The measured power field. Layouts without a power term yield an empty
    /// field.
    pub fn extract_power(&self, buf: &[u8]) -> Option<Field> {
        match self.power() {
            Some(range) => range.slice(buf).map(Field::from),
            None => Some(Field::default()),
        }
    }

    /// Decode `buf` into a beacon of this layout's type.
    pub fn decode(&self, buf: &[u8]) -> Option<Beacon> {
        if !self.matches(buf) {
            return None;
        }
        let ids = self.extract_ids(buf)?;
        let data = self.extract_data(buf)?;
        let power = self.extract_power(buf)?;
        Some(Beacon::new(self.name(), ids, data, power))
    }

    /// Serialize `beacon` into an advertisement.
    ///
    /// Identifiers are written first, then data, then power, then the matcher
    /// bytes, so matchers win where ranges overlap. The buffer grows as needed
    /// and gaps are zero filled.
    pub fn generate(&self, beacon: &Beacon) -> Result<Vec<u8>, GenerateError> {
        self.check_count("identifier", self.identifiers().count(), beacon.ids.len())?;
        self.check_count("data", self.data_fields().count(), beacon.data.len())?;

        let mut ad = Vec::with_capacity(32);
        for (range, field) in self.identifiers().zip(&beacon.ids) {
            insert(&mut ad, range, field.as_bytes());
        }
        for (range, field) in self.data_fields().zip(&beacon.data) {
            insert(&mut ad, range, field.as_bytes());
        }
        if let Some(range) = self.power() {
            insert(&mut ad, range, beacon.power.as_bytes());
        }
        for (range, expected) in self.matchers() {
            insert(&mut ad, range, expected);
        }
        Ok(ad)
    }

    fn check_count(
        &self,
        role: &'static str,
        expected: usize,
        actual: usize,
    ) -> Result<(), GenerateError> {
        if expected == actual {
            Ok(())
        } else {
            Err(GenerateError::FieldCountMismatch {
                layout: self.name().to_string(),
                role,
                expected,
                actual,
            })
        }
    }
}

fn extract<'a>(ranges: impl Iterator<Item = &'a ByteRange>, buf: &[u8]) -> Option<Fields> {
    ranges.map(|range| range.slice(buf).map(Field::from)).collect()
}

fn insert(ad: &mut Vec<u8>, range: &ByteRange, bytes: &[u8]) {
    let end = range.start + bytes.len();
    if ad.len() < end {
        ad.resize(end, 0);
    }
    ad[range.start..end].copy_from_slice(bytes);
}

/// An ordered set of layouts, tried first to last.
///
/// Built once from configuration and shared by the scan aggregator; there is
/// no global layout table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutSet {
    layouts: Vec<Layout>,
}

impl LayoutSet {
    pub fn new(layouts: Vec<Layout>) -> Self {
        LayoutSet { layouts }
    }

    /// AltBeacon followed by the Eddystone UID, URL, TLM and EID layouts.
    pub fn defaults() -> Self {
        let layouts = DEFAULT_LAYOUTS
            .iter()
            .map(|(name, text)| {
                Layout::parse(*name, text).expect("built-in layouts are well formed")
            })
            .collect();
        LayoutSet { layouts }
    }

    /// Add `layout`, replacing any layout with the same name in place.
    pub fn insert(&mut self, layout: Layout) {
        match self.layouts.iter_mut().find(|l| l.name() == layout.name()) {
            Some(existing) => *existing = layout,
            None => self.layouts.push(layout),
        }
    }

    /// Keep only the layouts whose names appear in `names`.
    pub fn retain_names(&mut self, names: &[String]) {
        self.layouts.retain(|l| names.iter().any(|n| n == l.name()));
    }

    pub fn get(&self, name: &str) -> Option<&Layout> {
        self.layouts.iter().find(|l| l.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layout> {
        self.layouts.iter()
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Decode `buf` with the first layout that accepts it.
    pub fn parse(&self, buf: &[u8]) -> Option<Beacon> {
        decode(buf, &self.layouts)
    }

    /// Generate an advertisement with the layout named by the beacon's type.
    pub fn generate(&self, beacon: &Beacon) -> Result<Vec<u8>, GenerateError> {
        self.get(&beacon.beacon_type)
            .ok_or_else(|| GenerateError::UnknownLayout(beacon.beacon_type.clone()))?
            .generate(beacon)
    }
}

impl Default for LayoutSet {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Decode `buf` with the first of `layouts` that accepts it.
pub fn decode(buf: &[u8], layouts: &[Layout]) -> Option<Beacon> {
    layouts.iter().find_map(|layout| layout.decode(buf))
}
