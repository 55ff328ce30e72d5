//! Relative time offsets for `$fromNow` and `fromNow()`
//!
//! Offsets look like `1 day`, `-2 hours 30 minutes`, `1y 2mo 3w`.
//! A year counts as 365 days and a month as 30 days.

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::scope::{Binding, Scope};

static OFFSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)^\s*
        (?P<sign>[-+])?\s*
        (?:(?P<years>\d+)\s*(?:years|year|yrs|yr|y)\s*)?
        (?:(?P<months>\d+)\s*(?:months|month|mo)\s*)?
        (?:(?P<weeks>\d+)\s*(?:weeks|week|wks|wk|w)\s*)?
        (?:(?P<days>\d+)\s*(?:days|day|d)\s*)?
        (?:(?P<hours>\d+)\s*(?:hours|hour|hrs|hr|h)\s*)?
        (?:(?P<minutes>\d+)\s*(?:minutes|minute|mins|min|m)\s*)?
        (?:(?P<seconds>\d+)\s*(?:seconds|second|secs|sec|s)\s*)?
        $",
    )
    .unwrap()
});

const UNITS: [(&str, i64); 7] = [
    ("years", 365 * 86_400),
    ("months", 30 * 86_400),
    ("weeks", 7 * 86_400),
    ("days", 86_400),
    ("hours", 3_600),
    ("minutes", 60),
    ("seconds", 1),
];

/// Parse an offset into a signed duration
pub fn parse_offset(offset: &str) -> Result<TimeDelta, String> {
    let invalid = || format!("String '{offset}' isn't a time expression");
    let caps = OFFSET_RE.captures(offset).ok_or_else(invalid)?;

    let mut seconds: i64 = 0;
    for (unit, factor) in UNITS {
        if let Some(m) = caps.name(unit) {
            let amount: i64 = m.as_str().parse().map_err(|_| invalid())?;
            seconds = amount
                .checked_mul(factor)
                .and_then(|s| seconds.checked_add(s))
                .ok_or_else(invalid)?;
        }
    }
    if caps.name("sign").is_some_and(|m| m.as_str() == "-") {
        seconds = -seconds;
    }

    TimeDelta::try_seconds(seconds).ok_or_else(invalid)
}

/// Format the way json-e does: millisecond precision, `Z` suffix
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{text}': {e}"))
}

/// Reference time: the context's `now` if set, the wall clock otherwise
pub fn reference_time(scope: &Scope<'_>) -> Result<DateTime<Utc>, String> {
    match scope.lookup("now") {
        Some(Binding::Value(Value::String(now))) => parse_timestamp(now),
        _ => Ok(Utc::now()),
    }
}

pub fn from_now(offset: &str, reference: DateTime<Utc>) -> Result<String, String> {
    let delta = parse_offset(offset)?;
    let at = reference
        .checked_add_signed(delta)
        .ok_or_else(|| format!("offset '{offset}' is out of range"))?;
    Ok(format_timestamp(at))
}
