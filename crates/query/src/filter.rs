//! Translation of request-level filters into store filters and pipelines.

use bson::{Bson, Document, doc};
use sightings_contracts::{TaxonomicRank, fields};
use sightings_store::FindQuery;

use crate::dates::{self, DateRange};

/// How a field is persisted on the records a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredForm {
    Native,
    Text,
}

/// A store request ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Find(FindQuery),
    Aggregate(Vec<Document>),
}

const PARSED_DATE_FIELD: &str = "_observed_at_instant";

/// Day-first format, tried before the server's own parser so `03/04/2024`
/// never reads month-first.
const TEXT_DATE_FORMAT: &str = "%d/%m/%Y";

pub fn exact(path: &str, value: &str) -> Document {
    doc! { path: value }
}

pub fn rank(rank: TaxonomicRank, value: &str) -> Document {
    exact(rank.field_path(), value)
}

/// Cheap existence probe for records storing `path` as text.
pub fn text_probe(path: &str) -> Document {
    doc! { path: { "$type": "string" } }
}

pub fn date_range(range: &DateRange, form: StoredForm, limit: u64) -> Plan {
    let bounds = doc! {
        "$gte": dates::to_bson_ceil(range.start()),
        "$lte": dates::to_bson(range.end()),
    };

    match form {
        StoredForm::Native => Plan::Find(
            FindQuery::new(doc! { fields::OBSERVED_AT: bounds }).limit(limit),
        ),
        StoredForm::Text => {
            let source = format!("${}", fields::OBSERVED_AT);
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            Plan::Aggregate(vec![
                doc! { "$match": text_probe(fields::OBSERVED_AT) },
                doc! { "$addFields": { PARSED_DATE_FIELD: { "$ifNull": [
                    { "$dateFromString": {
                        "dateString": source.as_str(),
                        "format": TEXT_DATE_FORMAT,
                        "onError": Bson::Null,
                        "onNull": Bson::Null,
                    } },
                    { "$dateFromString": {
                        "dateString": source.as_str(),
                        "onError": Bson::Null,
                        "onNull": Bson::Null,
                    } },
                ] } } },
                doc! { "$match": { PARSED_DATE_FIELD: bounds } },
                doc! { "$project": { PARSED_DATE_FIELD: 0 } },
                doc! { "$limit": limit },
            ])
        }
    }
}

/// One taxonomy query: a literal or a wildcard per rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyFilter {
    segments: [Option<String>; 7],
}

/// `-`, `*` and blank segments match any value.
pub fn is_wildcard(segment: &str) -> bool {
    matches!(segment.trim(), "" | "-" | "*")
}

impl TaxonomyFilter {
    /// Segments in rank order, kingdom first.
    pub fn from_segments(segments: [&str; 7]) -> Self {
        Self {
            segments: segments.map(|segment| {
                if is_wildcard(segment) {
                    None
                } else {
                    Some(segment.trim().to_string())
                }
            }),
        }
    }

    pub fn literal(&self, rank: TaxonomicRank) -> Option<&str> {
        let index = TaxonomicRank::ALL.iter().position(|r| *r == rank)?;
        self.segments[index].as_deref()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.segments.iter().all(Option::is_none)
    }

    /// Anchored, escaped, case-insensitive match per literal rank.
    pub fn to_document(&self) -> Document {
        let mut filter = Document::new();
        for (rank, literal) in TaxonomicRank::ALL.iter().zip(&self.segments) {
            if let Some(literal) = literal {
                filter.insert(
                    rank.field_path(),
                    doc! {
                        "$regex": format!("^{}$", regex::escape(literal)),
                        "$options": "i",
                    },
                );
            }
        }
        filter
    }
}

/// A coordinate as requested: the parsed value plus the raw path segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    value: f64,
    raw: String,
}

impl Coordinate {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let value: f64 = trimmed.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        Some(Self {
            value,
            raw: trimmed.to_string(),
        })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Textual spellings a string-stored coordinate may carry.
    fn text_candidates(&self) -> Vec<Bson> {
        let mut candidates = vec![Bson::String(self.raw.clone())];
        let formatted = float_text(self.value);
        if formatted != self.raw {
            candidates.push(Bson::String(formatted));
        }
        candidates
    }
}

/// Default float text: integral values keep one decimal (`10.0`), others use
/// the shortest round-trip form. Magnitudes below `1e-4` or from `1e16` up
/// switch to exponent form with a signed two-digit exponent (`1e-05`).
pub fn float_text(value: f64) -> String {
    let magnitude = value.abs();
    if value != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        exponent_text(value)
    } else if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

fn exponent_text(value: f64) -> String {
    let shortest = format!("{:e}", value);
    let Some((mantissa, exponent)) = shortest.split_once('e') else {
        return shortest;
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

/// Axis-aligned `[v - tolerance, v + tolerance]` box on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    pub fn around(latitude: f64, longitude: f64, tolerance: f64) -> Self {
        Self {
            min_latitude: latitude - tolerance,
            max_latitude: latitude + tolerance,
            min_longitude: longitude - tolerance,
            max_longitude: longitude + tolerance,
        }
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&latitude)
            && (self.min_longitude..=self.max_longitude).contains(&longitude)
    }

    pub fn to_document(&self) -> Document {
        doc! {
            fields::LATITUDE: { "$gte": self.min_latitude, "$lte": self.max_latitude },
            fields::LONGITUDE: { "$gte": self.min_longitude, "$lte": self.max_longitude },
        }
    }
}

pub fn location(
    latitude: &Coordinate,
    longitude: &Coordinate,
    tolerance: f64,
    form: StoredForm,
    limit: u64,
) -> Plan {
    let filter = match form {
        StoredForm::Native => {
            BoundingBox::around(latitude.value, longitude.value, tolerance).to_document()
        }
        StoredForm::Text => doc! {
            fields::LATITUDE: { "$in": latitude.text_candidates() },
            fields::LONGITUDE: { "$in": longitude.text_candidates() },
        },
    };
    Plan::Find(FindQuery::new(filter).limit(limit))
}
