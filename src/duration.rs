//! Human friendly duration parsing for command line flags.

use std::time::Duration;

/// Parse a duration such as `1s`, `250ms`, `2m` or `1h`.
///
/// A bare number is taken as seconds. Zero is rejected since it is never a
/// usable window length.
///
/// # Example
/// ```
/// use beacon_listener::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    let split = src
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(src.len());
    let (number, unit) = src.split_at(split);

    if number.is_empty() {
        return Err(format!("invalid duration: '{src}'"));
    }
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: '{src}'"))?;

    let duration = match unit.trim() {
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3600)),
        other => return Err(format!("unknown duration unit '{other}' in '{src}'")),
    };

    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}
