//! Date normalization.
//!
//! Request endpoints and stored `FechaEvento` values arrive in several human
//! formats. Everything is interpreted as UTC and rendered back out as RFC 3339
//! with a `Z` suffix.

use std::fmt;

use bson::Bson;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Calendar-only formats, tried first. Day-first is never read as month-first.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

const ISO_OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"];

const ISO_NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateParseError {
    raw: String,
}

impl DateParseError {
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for DateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unrecognized date '{}'; expected YYYY-MM-DD, DD/MM/YYYY, YYYY/MM/DD or ISO-8601",
            self.raw
        )
    }
}

impl std::error::Error for DateParseError {}

pub fn parse(raw: &str) -> Result<DateTime<Utc>, DateParseError> {
    let text = raw.trim();

    for format in DATE_FORMATS {
        if let Some(instant) = NaiveDate::parse_from_str(text, format)
            .ok()
            .and_then(start_of_day)
        {
            return Ok(instant);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }

    parse_iso(text).ok_or_else(|| DateParseError {
        raw: raw.to_string(),
    })
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}

fn parse_iso(text: &str) -> Option<DateTime<Utc>> {
    let rewritten = match text.strip_suffix('Z').or_else(|| text.strip_suffix('z')) {
        Some(head) => format!("{}+00:00", head),
        None => text.to_string(),
    };

    for format in ISO_OFFSET_FORMATS {
        if let Ok(instant) = DateTime::parse_from_str(&rewritten, format) {
            return Some(instant.with_timezone(&Utc));
        }
    }

    for format in ISO_NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&rewritten, format) {
            return Some(naive.and_utc());
        }
    }

    None
}

pub fn to_canonical(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn to_bson(instant: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(instant.timestamp_millis())
}

/// Like [`to_bson`] but rounds a sub-millisecond remainder up, for inclusive
/// lower bounds.
pub(crate) fn to_bson_ceil(instant: DateTime<Utc>) -> bson::DateTime {
    let millis = instant.timestamp_millis();
    if instant.timestamp_subsec_nanos() % 1_000_000 == 0 {
        bson::DateTime::from_millis(millis)
    } else {
        bson::DateTime::from_millis(millis.saturating_add(1))
    }
}

pub(crate) fn from_bson(value: bson::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value.timestamp_millis())
}

/// Closed interval `[start, end]`; construction orders the endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Canonical text for a stored date value. Unparsable strings come back
/// verbatim; non-date values yield `None`.
pub fn normalize_stored(value: &Bson) -> Option<String> {
    match value {
        Bson::DateTime(stored) => Some(match from_bson(*stored) {
            Some(instant) => to_canonical(instant),
            None => stored.to_string(),
        }),
        Bson::String(text) => Some(match parse(text) {
            Ok(instant) => to_canonical(instant),
            Err(_) => text.clone(),
        }),
        _ => None,
    }
}
