//! Grouped-count pipelines.

use std::fmt;

use bson::{Bson, Document, doc};
use sightings_contracts::{GroupCount, TaxonomicRank, fields};

use crate::normalize::normalize_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    Country,
    Rank(TaxonomicRank),
    /// Groups by the raw stored value, so differently formatted spellings of
    /// one day land in separate groups.
    Date,
}

impl GroupField {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "country" | "pais" => Some(GroupField::Country),
            "date" | "fecha" => Some(GroupField::Date),
            other => TaxonomicRank::parse(other).map(GroupField::Rank),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroupField::Country => "country",
            GroupField::Rank(rank) => rank.as_str(),
            GroupField::Date => "date",
        }
    }

    pub fn field_path(self) -> &'static str {
        match self {
            GroupField::Country => fields::COUNTRY,
            GroupField::Rank(rank) => rank.field_path(),
            GroupField::Date => fields::OBSERVED_AT,
        }
    }

    fn sort_stage(self) -> Document {
        match self {
            GroupField::Date => doc! { "_id": 1 },
            GroupField::Country | GroupField::Rank(_) => doc! { "count": -1, "_id": 1 },
        }
    }
}

impl fmt::Display for GroupField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn group_pipeline(field: GroupField, cap: u64) -> Vec<Document> {
    let path = field.field_path();
    vec![
        doc! { "$match": { path: { "$exists": true, "$nin": [Bson::Null, ""] } } },
        doc! { "$group": { "_id": format!("${}", path), "count": { "$sum": 1 } } },
        doc! { "$sort": field.sort_stage() },
        doc! { "$limit": i64::try_from(cap).unwrap_or(i64::MAX) },
    ]
}

/// Converts `{_id, count}` rows, dropping any row without a positive count.
pub fn rows_to_counts(rows: Vec<Document>) -> Vec<GroupCount> {
    rows.into_iter()
        .filter_map(|row| {
            let count = match row.get("count") {
                Some(Bson::Int32(n)) => u64::try_from(*n).ok(),
                Some(Bson::Int64(n)) => u64::try_from(*n).ok(),
                Some(Bson::Double(n)) if *n >= 0.0 => Some(*n as u64),
                _ => None,
            }?;
            if count == 0 {
                return None;
            }
            let key = row.get("_id").and_then(normalize_key);
            Some(GroupCount { key, count })
        })
        .collect()
}
