//! Beacon layout grammar.
//!
//! A layout is a comma separated list of `role:start-end[=hex]` terms that
//! describes where a beacon family keeps its matchers, identifiers, data and
//! measured power inside an advertisement. For example AltBeacon:
//!
//! ```text
//! m:2-3=beac,i:4-19,i:20-21,i:22-23,p:24-24,d:25-25
//! ```
//!
//! Roles:
//! - `m` matcher: the range must hold the given bytes
//! - `s` service matcher: like `m`, but the two bytes are written big-endian
//!   in the layout and stored little-endian, as they appear on air
//! - `i` identifier, `d` data: extracted in declaration order
//! - `p` measured power: at most one; an attached value is ignored
//!
//! A trailing `v` on the range (`i:4-21v`) marks a variable length field
//! that runs to the end of the advertisement.

use crate::field::{self, FieldError};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Layouts shipped by default, in dispatch order.
pub const DEFAULT_LAYOUTS: &[(&str, &str)] = &[
    (ALTBEACON, "m:2-3=beac,i:4-19,i:20-21,i:22-23,p:24-24,d:25-25"),
    (EDDYSTONE_UID, "s:0-1=feaa,m:2-2=00,p:3-3:-41,i:4-13,i:14-19,d:20-21"),
    (EDDYSTONE_URL, "s:0-1=feaa,m:2-2=10,p:3-3:-41,i:4-21v"),
    (EDDYSTONE_TLM, "s:0-1=feaa,m:2-2=20,d:3-3,d:4-5,d:6-7,d:8-11,d:12-15"),
    (EDDYSTONE_EID, "s:0-1=feaa,m:2-2=30,p:3-3:-41,i:4-11"),
];

pub const ALTBEACON: &str = "altbeacon";
pub const EDDYSTONE_UID: &str = "eddystone_uid";
pub const EDDYSTONE_URL: &str = "eddystone_url";
pub const EDDYSTONE_TLM: &str = "eddystone_tlm";
pub const EDDYSTONE_EID: &str = "eddystone_eid";

/// Errors produced while parsing layout text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("empty term in layout")]
    EmptyTerm,
    #[error("term '{0}' has no role")]
    MissingRole(String),
    #[error("term '{0}' has unknown role")]
    UnknownRole(String),
    #[error("term '{0}' has no start-end range")]
    MissingRange(String),
    #[error("term '{term}' has invalid offset '{offset}'")]
    InvalidOffset { term: String, offset: String },
    #[error("term '{0}' ends before it starts")]
    ReversedRange(String),
    #[error("term '{0}' requires an expected value")]
    MissingExpectedValue(String),
    #[error("term '{0}' does not take a value")]
    UnexpectedValue(String),
    #[error("term '{term}' has invalid expected value: {source}")]
    InvalidHex { term: String, source: FieldError },
    #[error("term '{term}' expects {expected} bytes but its range covers {range}")]
    ExpectedLength {
        term: String,
        expected: usize,
        range: usize,
    },
    #[error("layout declares more than one power field")]
    DuplicatePower,
    #[error("term '{0}' cannot be variable length")]
    VariableLengthRole(String),
    #[error("variable length field at offset {0} is not the last field")]
    VariableLengthNotLast(usize),
}

/// An inclusive byte range inside an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
    /// Runs from `start` to the end of the buffer, ignoring `end`.
    pub variable: bool,
}

impl ByteRange {
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Slice the range out of `buf`, or `None` if `buf` is too short.
    pub fn slice<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        if self.variable {
            buf.get(self.start..)
        } else {
            buf.get(self.start..=self.end)
        }
    }
}

/// One parsed layout term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSpec {
    Matcher { range: ByteRange, expected: Vec<u8> },
    /// Expected bytes are stored already swapped to on-air order.
    ServiceMatcher { range: ByteRange, expected: Vec<u8> },
    Identifier(ByteRange),
    Data(ByteRange),
    Power(ByteRange),
}

impl FieldSpec {
    pub fn range(&self) -> &ByteRange {
        match self {
            FieldSpec::Matcher { range, .. }
            | FieldSpec::ServiceMatcher { range, .. }
            | FieldSpec::Identifier(range)
            | FieldSpec::Data(range)
            | FieldSpec::Power(range) => range,
        }
    }
}

/// A named, parsed beacon layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    name: String,
    text: String,
    fields: Vec<FieldSpec>,
}

impl Layout {
    /// Parse layout text for the beacon type `name`.
    ///
    /// # Example
    /// ```
    /// use beacon_listener::layout::Layout;
    ///
    /// let layout = Layout::parse("eddystone_eid", "s:0-1=feaa,m:2-2=30,p:3-3:-41,i:4-11").unwrap();
    /// assert_eq!(layout.identifiers().count(), 1);
    /// ```
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, LayoutError> {
        let name = name.into();
        let mut fields = Vec::new();
        let mut has_power = false;

        for term in text.split(',') {
            let spec = parse_term(term.trim())?;
            if let FieldSpec::Power(_) = spec {
                if has_power {
                    return Err(LayoutError::DuplicatePower);
                }
                has_power = true;
            }
            fields.push(spec);
        }

        check_variable_length(&fields)?;
        debug!(layout = %name, terms = fields.len(), "Parsed beacon layout");

        Ok(Layout {
            name,
            text: text.to_string(),
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The layout text this layout was parsed from.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// All terms in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Matchers and service matchers with their on-air expected bytes.
    pub fn matchers(&self) -> impl Iterator<Item = (&ByteRange, &[u8])> {
        self.fields.iter().filter_map(|spec| match spec {
            FieldSpec::Matcher { range, expected }
            | FieldSpec::ServiceMatcher { range, expected } => Some((range, expected.as_slice())),
            _ => None,
        })
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &ByteRange> {
        self.fields.iter().filter_map(|spec| match spec {
            FieldSpec::Identifier(range) => Some(range),
            _ => None,
        })
    }

    pub fn data_fields(&self) -> impl Iterator<Item = &ByteRange> {
        self.fields.iter().filter_map(|spec| match spec {
            FieldSpec::Data(range) => Some(range),
            _ => None,
        })
    }

    pub fn power(&self) -> Option<&ByteRange> {
        self.fields.iter().find_map(|spec| match spec {
            FieldSpec::Power(range) => Some(range),
            _ => None,
        })
    }

    /// The 16-bit service UUID of the first service matcher, if any.
    pub fn service_uuid(&self) -> Option<u16> {
        self.fields.iter().find_map(|spec| match spec {
            FieldSpec::ServiceMatcher { expected, .. } => {
                Some(u16::from_le_bytes([*expected.first()?, *expected.get(1)?]))
            }
            _ => None,
        })
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.text)
    }
}

/// Parse a `NAME=LAYOUT` command line argument.
pub fn parse_layout_arg(src: &str) -> Result<Layout, String> {
    let (name, text) = src
        .split_once('=')
        .ok_or_else(|| "invalid layout: expected format NAME=LAYOUT".to_string())?;
    Layout::parse(name.trim(), text).map_err(|e| format!("invalid layout '{name}': {e}"))
}

fn parse_term(term: &str) -> Result<FieldSpec, LayoutError> {
    if term.is_empty() {
        return Err(LayoutError::EmptyTerm);
    }

    let (role, rest) = term
        .split_once(':')
        .ok_or_else(|| LayoutError::MissingRole(term.to_string()))?;

    // Power terms have historically been written as `p:3-3:-41`, so both
    // separators introduce a value.
    let (range_text, value) = match rest.find(['=', ':']) {
        Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
        None => (rest, None),
    };
    let range = parse_range(term, range_text)?;

    match role.trim() {
        "m" => {
            let expected = expected_bytes(term, &range, value)?;
            Ok(FieldSpec::Matcher { range, expected })
        }
        "s" => {
            let mut expected = expected_bytes(term, &range, value)?;
            if expected.len() != 2 {
                return Err(LayoutError::ExpectedLength {
                    term: term.to_string(),
                    expected: 2,
                    range: expected.len(),
                });
            }
            expected.swap(0, 1);
            Ok(FieldSpec::ServiceMatcher { range, expected })
        }
        "i" | "d" if value.is_some() => Err(LayoutError::UnexpectedValue(term.to_string())),
        "i" => Ok(FieldSpec::Identifier(range)),
        "d" => Ok(FieldSpec::Data(range)),
        "p" if range.variable => Err(LayoutError::VariableLengthRole(term.to_string())),
        "p" => Ok(FieldSpec::Power(range)),
        _ => Err(LayoutError::UnknownRole(term.to_string())),
    }
}

fn parse_range(term: &str, text: &str) -> Result<ByteRange, LayoutError> {
    let text = text.trim();
    let (text, variable) = match text.strip_suffix('v') {
        Some(stripped) => (stripped, true),
        None => (text, false),
    };
    let (start, end) = text
        .split_once('-')
        .ok_or_else(|| LayoutError::MissingRange(term.to_string()))?;

    let offset = |s: &str| {
        s.trim()
            .parse::<usize>()
            .map_err(|_| LayoutError::InvalidOffset {
                term: term.to_string(),
                offset: s.to_string(),
            })
    };
    let (start, end) = (offset(start)?, offset(end)?);
    if end < start {
        return Err(LayoutError::ReversedRange(term.to_string()));
    }

    Ok(ByteRange {
        start,
        end,
        variable,
    })
}

fn expected_bytes(
    term: &str,
    range: &ByteRange,
    value: Option<&str>,
) -> Result<Vec<u8>, LayoutError> {
    if range.variable {
        return Err(LayoutError::VariableLengthRole(term.to_string()));
    }
    let value = value.ok_or_else(|| LayoutError::MissingExpectedValue(term.to_string()))?;
    let bytes = field::decode_hex(value.trim()).map_err(|source| LayoutError::InvalidHex {
        term: term.to_string(),
        source,
    })?;
    if bytes.len() != range.len() {
        return Err(LayoutError::ExpectedLength {
            term: term.to_string(),
            expected: bytes.len(),
            range: range.len(),
        });
    }
    Ok(bytes)
}

/// A variable length field must be the last identifier or data field: it
/// must be last in its own role and nothing extracted may start after it.
fn check_variable_length(fields: &[FieldSpec]) -> Result<(), LayoutError> {
    let extracted: Vec<(usize, &ByteRange, bool)> = fields
        .iter()
        .enumerate()
        .filter_map(|(idx, spec)| match spec {
            FieldSpec::Identifier(range) => Some((idx, range, true)),
            FieldSpec::Data(range) => Some((idx, range, false)),
            FieldSpec::Power(range) => Some((idx, range, false)),
            _ => None,
        })
        .collect();

    for &(idx, range, is_id) in extracted.iter().filter(|(_, r, _)| r.variable) {
        let same_role_after = fields[idx + 1..].iter().any(|spec| match spec {
            FieldSpec::Identifier(_) => is_id,
            FieldSpec::Data(_) => !is_id,
            _ => false,
        });
        let starts_after = extracted
            .iter()
            .any(|&(other, r, _)| other != idx && r.start >= range.start);
        if same_role_after || starts_after {
            return Err(LayoutError::VariableLengthNotLast(range.start));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: usize, end: usize) -> ByteRange {
        ByteRange {
            start,
            end,
            variable: false,
        }
    }

    #[test]
    fn test_default_layouts_parse() {
        for (name, text) in DEFAULT_LAYOUTS {
            let layout = Layout::parse(*name, text).unwrap();
            assert_eq!(layout.name(), *name);
            assert_eq!(layout.text(), *text);
        }
    }

    #[test]
    fn test_altbeacon_buckets_keep_declaration_order() {
        let (name, text) = DEFAULT_LAYOUTS[0];
        let layout = Layout::parse(name, text).unwrap();

        let matchers: Vec<_> = layout.matchers().collect();
        assert_eq!(matchers, vec![(&range(2, 3), &[0xbe, 0xac][..])]);

        let ids: Vec<_> = layout.identifiers().copied().collect();
        assert_eq!(ids, vec![range(4, 19), range(20, 21), range(22, 23)]);
        assert_eq!(ids[0].len(), 16);

        let data: Vec<_> = layout.data_fields().copied().collect();
        assert_eq!(data, vec![range(25, 25)]);
        assert_eq!(layout.power(), Some(&range(24, 24)));
    }

    #[test]
    fn test_service_matcher_bytes_are_swapped() {
        let layout = Layout::parse("x", "s:0-1=feaa,m:2-2=10").unwrap();
        assert_eq!(
            layout.fields()[0],
            FieldSpec::ServiceMatcher {
                range: range(0, 1),
                expected: vec![0xaa, 0xfe],
            }
        );
        assert_eq!(
            layout.fields()[1],
            FieldSpec::Matcher {
                range: range(2, 2),
                expected: vec![0x10],
            }
        );
    }

    #[test]
    fn test_power_value_is_ignored_in_either_form() {
        let colon = Layout::parse("x", "p:3-3:-41,i:4-5").unwrap();
        let equals = Layout::parse("x", "p:3-3=-41, i:4-5").unwrap();
        assert_eq!(colon.power(), Some(&range(3, 3)));
        assert_eq!(colon.fields(), equals.fields());
    }

    #[test]
    fn test_variable_length_identifier() {
        let layout = Layout::parse("x", "s:0-1=feaa,m:2-2=10,p:3-3:-41,i:4-21v").unwrap();
        let id = layout.identifiers().next().unwrap();
        assert!(id.variable);
        assert_eq!(id.slice(&[0u8; 30]).map(<[u8]>::len), Some(26));
        assert_eq!(id.slice(&[0u8; 4]).map(<[u8]>::len), Some(0));
        assert_eq!(id.slice(&[0u8; 3]), None);
    }

    #[test]
    fn test_variable_length_must_be_last() {
        assert_eq!(
            Layout::parse("x", "i:4-10v,i:11-12"),
            Err(LayoutError::VariableLengthNotLast(4))
        );
        assert_eq!(
            Layout::parse("x", "i:4-10v,d:11-12"),
            Err(LayoutError::VariableLengthNotLast(4))
        );
        assert!(matches!(
            Layout::parse("x", "m:0-1v=beac"),
            Err(LayoutError::VariableLengthRole(_))
        ));
        assert!(matches!(
            Layout::parse("x", "p:0-1v"),
            Err(LayoutError::VariableLengthRole(_))
        ));
    }

    #[test]
    fn test_malformed_layouts() {
        assert_eq!(Layout::parse("x", ""), Err(LayoutError::EmptyTerm));
        assert_eq!(Layout::parse("x", "i:4-5,"), Err(LayoutError::EmptyTerm));
        assert!(matches!(Layout::parse("x", "i4-5"), Err(LayoutError::MissingRole(_))));
        assert!(matches!(Layout::parse("x", "q:4-5"), Err(LayoutError::UnknownRole(_))));
        assert!(matches!(Layout::parse("x", "i:45"), Err(LayoutError::MissingRange(_))));
        assert!(matches!(
            Layout::parse("x", "i:a-5"),
            Err(LayoutError::InvalidOffset { .. })
        ));
        assert!(matches!(Layout::parse("x", "i:5-4"), Err(LayoutError::ReversedRange(_))));
        assert!(matches!(
            Layout::parse("x", "m:2-3"),
            Err(LayoutError::MissingExpectedValue(_))
        ));
        assert!(matches!(
            Layout::parse("x", "m:2-3=bexc"),
            Err(LayoutError::InvalidHex { .. })
        ));
        assert!(matches!(
            Layout::parse("x", "m:2-3=be"),
            Err(LayoutError::ExpectedLength { .. })
        ));
        assert!(matches!(
            Layout::parse("x", "s:0-2=feaa01"),
            Err(LayoutError::ExpectedLength { .. })
        ));
        assert!(matches!(
            Layout::parse("x", "i:4-5=00"),
            Err(LayoutError::UnexpectedValue(_))
        ));
        assert_eq!(
            Layout::parse("x", "p:1-1,p:2-2"),
            Err(LayoutError::DuplicatePower)
        );
    }

    #[test]
    fn test_parse_layout_arg() {
        let layout = parse_layout_arg("ibeacon=m:2-3=0215,i:4-19,i:20-21,i:22-23,p:24-24").unwrap();
        assert_eq!(layout.name(), "ibeacon");
        assert_eq!(layout.identifiers().count(), 3);
        assert!(parse_layout_arg("no-equals").is_err());
        assert!(parse_layout_arg("bad=q:1-2").is_err());
    }

    #[test]
    fn test_display() {
        let layout = Layout::parse("eddystone_eid", DEFAULT_LAYOUTS[4].1).unwrap();
        assert_eq!(
            layout.to_string(),
            "eddystone_eid: s:0-1=feaa,m:2-2=30,p:3-3:-41,i:4-11"
        );
    }

    #[test]
    fn test_service_uuid() {
        let eid = Layout::parse("eddystone_eid", DEFAULT_LAYOUTS[4].1).unwrap();
        assert_eq!(eid.service_uuid(), Some(0xfeaa));

        let altbeacon = Layout::parse("altbeacon", DEFAULT_LAYOUTS[0].1).unwrap();
        assert_eq!(altbeacon.service_uuid(), None);
    }
}
