//! Eddystone frame helpers: URL compression, beacon constructors and TLM
//! decoding.

use crate::beacon::Beacon;
use crate::field::{self, Field, FieldError};
use crate::layout::{EDDYSTONE_EID, EDDYSTONE_TLM, EDDYSTONE_UID, EDDYSTONE_URL};
use serde::Serialize;
use thiserror::Error;

/// Eddystone 16-bit service UUID.
pub const EDDYSTONE_SERVICE_UUID: u16 = 0xfeaa;

/// Longest compressed URL that fits an Eddystone-URL frame.
pub const MAX_COMPRESSED_URL_LEN: usize = 18;

const SCHEMES: &[(&str, u8)] = &[
    ("http://www.", 0x00),
    ("https://www.", 0x01),
    ("http://", 0x02),
    ("https://", 0x03),
];

// Tokens with a trailing slash must be substituted before their bare form.
const EXPANSIONS: &[(&str, u8)] = &[
    (".com/", 0x00),
    (".org/", 0x01),
    (".edu/", 0x02),
    (".net/", 0x03),
    (".info/", 0x04),
    (".biz/", 0x05),
    (".gov/", 0x06),
    (".com", 0x07),
    (".org", 0x08),
    (".edu", 0x09),
    (".net", 0x0a),
    (".info", 0x0b),
    (".biz", 0x0c),
    (".gov", 0x0d),
];

/// Errors returned by Eddystone-URL compression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("URL does not have a valid scheme")]
    InvalidScheme,
    #[error("URL is too long: {0} bytes compressed, at most 18 allowed")]
    TooLong(usize),
}

/// Compress `url` into the Eddystone-URL encoding.
///
/// # Example
/// ```
/// use beacon_listener::eddystone::compress_url;
///
/// let field = compress_url("https://www.google.com").unwrap();
/// assert_eq!(field.to_hex(), "01676f6f676c6507");
/// ```
pub fn compress_url(url: &str) -> Result<Field, UrlError> {
    let (rest, code) = SCHEMES
        .iter()
        .find_map(|(scheme, code)| url.strip_prefix(scheme).map(|rest| (rest, *code)))
        .ok_or(UrlError::InvalidScheme)?;

    let mut body = rest.as_bytes().to_vec();
    for (token, token_code) in EXPANSIONS {
        body = replace_all(&body, token.as_bytes(), *token_code);
    }

    let mut compressed = Vec::with_capacity(body.len() + 1);
    compressed.push(code);
    compressed.extend_from_slice(&body);

    if compressed.len() > MAX_COMPRESSED_URL_LEN {
        return Err(UrlError::TooLong(compressed.len()));
    }
    Ok(Field::from_bytes(compressed))
}

/// Expand an Eddystone-URL encoded field back into the literal URL.
pub fn decompress_url(field: &Field) -> Result<String, UrlError> {
    let (first, rest) = field
        .as_bytes()
        .split_first()
        .ok_or(UrlError::InvalidScheme)?;
    let scheme = SCHEMES
        .iter()
        .find(|(_, code)| code == first)
        .map(|(scheme, _)| *scheme)
        .ok_or(UrlError::InvalidScheme)?;

    let mut url = scheme.as_bytes().to_vec();
    for &b in rest {
        match EXPANSIONS.iter().find(|(_, code)| *code == b) {
            Some((token, _)) => url.extend_from_slice(token.as_bytes()),
            None => url.push(b),
        }
    }
    Ok(String::from_utf8_lossy(&url).into_owned())
}

fn replace_all(haystack: &[u8], needle: &[u8], with: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            out.push(with);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

/// An Eddystone-UID beacon from a 10 byte namespace and 6 byte instance.
pub fn uid(namespace: &str, instance: &str, power: i8) -> Result<Beacon, FieldError> {
    let namespace = sized_field(namespace, 10)?;
    let instance = sized_field(instance, 6)?;
    Ok(Beacon::new(
        EDDYSTONE_UID,
        vec![namespace, instance],
        vec![Field::from_bytes([0x00, 0x00])],
        Field::from_i8(power),
    ))
}

/// An Eddystone-URL beacon advertising `url`.
pub fn url(url: &str, power: i8) -> Result<Beacon, UrlError> {
    Ok(Beacon::new(
        EDDYSTONE_URL,
        vec![compress_url(url)?],
        vec![],
        Field::from_i8(power),
    ))
}

/// An Eddystone-EID beacon from an 8 byte ephemeral identifier.
pub fn eid(ephemeral_id: &str, power: i8) -> Result<Beacon, FieldError> {
    Ok(Beacon::new(
        EDDYSTONE_EID,
        vec![sized_field(ephemeral_id, 8)?],
        vec![],
        Field::from_i8(power),
    ))
}

impl Beacon {
    /// The URL of an Eddystone-URL beacon, `None` for other beacon types.
    pub fn url(&self) -> Option<Result<String, UrlError>> {
        if self.beacon_type != EDDYSTONE_URL {
            return None;
        }
        self.ids.first().map(decompress_url)
    }
}

fn sized_field(src: &str, expected: usize) -> Result<Field, FieldError> {
    let bytes = field::decode_hex(src)?;
    if bytes.len() != expected {
        return Err(FieldError::Length {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(Field::from_bytes(bytes))
}

/// Unencrypted Eddystone-TLM telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub version: u8,
    /// Battery voltage in millivolts, `None` when not battery powered.
    pub battery_mv: Option<u16>,
    /// Beacon temperature in Celsius, `None` when not supported.
    pub temperature: Option<f64>,
    /// Advertising PDUs sent since power-up.
    pub adv_count: u32,
    /// Time since power-up in seconds.
    pub uptime_secs: f64,
}

impl Telemetry {
    /// Read the telemetry out of the data fields of an `eddystone_tlm` beacon.
    pub fn from_beacon(beacon: &Beacon) -> Option<Self> {
        if beacon.beacon_type != EDDYSTONE_TLM {
            return None;
        }
        let [version, battery, temperature, adv_count, uptime] = beacon.data.as_slice() else {
            return None;
        };

        let version = *version.as_bytes().first()?;
        let battery_mv = battery.as_u16()?;
        let temperature = temperature.as_u16()?;
        let adv_count = u32::from_be_bytes(adv_count.as_bytes().try_into().ok()?);
        let uptime = u32::from_be_bytes(uptime.as_bytes().try_into().ok()?);

        Some(Telemetry {
            version,
            battery_mv: (battery_mv != 0).then_some(battery_mv),
            temperature: (temperature != 0x8000)
                .then(|| f64::from(temperature as i16) / 256.0),
            adv_count,
            uptime_secs: f64::from(uptime) / 10.0,
        })
    }
}
