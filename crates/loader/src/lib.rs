//! Offline bulk load of sightings exports into the document store.
//!
//! An export is a JSON array of records. Each record is validated and
//! converted to its stored form (native dates and numeric coordinates), then
//! written in unordered batches. Bad records are reported, not fatal.

use std::path::Path;

use bson::{Bson, Document};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use sightings_contracts::{Sighting, TaxonomicRank, fields};
use sightings_query::{dates, normalize};
use sightings_store::{BulkWriter, FindQuery, SightingStore, StoreError};

pub mod config;

const GEOLOCATION_KEYS: [&str; 2] = ["Latitud", "Longitud"];

#[derive(Debug)]
pub enum LoadError {
    Read {
        path: String,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    NotAnArray,
    Store(StoreError),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Read { path, source } => write!(f, "failed to read {}: {}", path, source),
            LoadError::Parse(err) => write!(f, "malformed JSON export: {}", err),
            LoadError::NotAnArray => write!(f, "export must be a JSON array of records"),
            LoadError::Store(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Read { source, .. } => Some(source),
            LoadError::Parse(err) => Some(err),
            LoadError::NotAnArray => None,
            LoadError::Store(err) => Some(err),
        }
    }
}

impl From<StoreError> for LoadError {
    fn from(value: StoreError) -> Self {
        LoadError::Store(value)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub total: usize,
    pub inserted: u64,
    pub errors: Vec<String>,
}

pub fn read_records(path: &Path) -> Result<Vec<Value>, LoadError> {
    let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_records(&contents)
}

pub fn parse_records(contents: &str) -> Result<Vec<Value>, LoadError> {
    match serde_json::from_str::<Value>(contents).map_err(LoadError::Parse)? {
        Value::Array(records) => Ok(records),
        _ => Err(LoadError::NotAnArray),
    }
}

/// Converts one exported record to its stored form. Unparseable text dates
/// are replaced by `now`; everything else that is wrong rejects the record.
pub fn transform_record(
    index: usize,
    record: Value,
    now: DateTime<Utc>,
) -> Result<Document, String> {
    let Value::Object(object) = record else {
        return Err(format!("record {}: expected a JSON object", index));
    };
    let mut document =
        bson::to_document(&object).map_err(|err| format!("record {}: {}", index, err))?;

    let observed_at = match document.get(fields::OBSERVED_AT) {
        Some(Bson::String(raw)) => Some(parse_observed_at(raw).unwrap_or_else(|| {
            tracing::warn!(record = index, value = %raw, "unparseable FechaEvento; using load time");
            now
        })),
        _ => None,
    };
    if let Some(instant) = observed_at {
        document.insert(
            fields::OBSERVED_AT,
            bson::DateTime::from_millis(instant.timestamp_millis()),
        );
    }

    let missing: Vec<&str> = fields::REQUIRED_TOP_LEVEL
        .iter()
        .copied()
        .filter(|field| !document.contains_key(field))
        .collect();
    if !missing.is_empty() {
        return Err(format!("record {}: missing fields {:?}", index, missing));
    }

    if let Ok(geo) = document
        .get_document_mut("Ubicacion")
        .and_then(|location| location.get_document_mut("Geolocalizacion"))
    {
        for key in GEOLOCATION_KEYS {
            let Some(value) = geo.get(key) else {
                continue;
            };
            let number = coordinate(value).ok_or_else(|| {
                format!("record {}: {} {} is not a number", index, key, value)
            })?;
            geo.insert(key, number);
        }
    }

    Ok(document)
}

pub fn transform(records: Vec<Value>, now: DateTime<Utc>) -> (Vec<Document>, Vec<String>) {
    let mut documents = Vec::with_capacity(records.len());
    let mut errors = Vec::new();
    for (index, record) in records.into_iter().enumerate() {
        match transform_record(index, record, now) {
            Ok(document) => documents.push(document),
            Err(err) => errors.push(err),
        }
    }
    (documents, errors)
}

/// Writes `documents` in batches, stopping at the first failed batch.
/// Returns what was written before the failure alongside it.
pub async fn insert_batches<W>(
    writer: &W,
    documents: Vec<Document>,
    batch_size: usize,
) -> (u64, Option<StoreError>)
where
    W: BulkWriter + ?Sized,
{
    let total = documents.len();
    let mut inserted = 0;
    let mut pending = documents.into_iter().peekable();

    while pending.peek().is_some() {
        let batch: Vec<Document> = pending.by_ref().take(batch_size.max(1)).collect();
        match writer.insert_many(batch).await {
            Ok(written) => {
                inserted += written;
                tracing::info!(inserted, total, "batch inserted");
            }
            Err(err) => return (inserted, Some(err)),
        }
    }

    (inserted, None)
}

/// Transforms, inserts and indexes. Record and batch failures end up in the
/// report rather than aborting the load.
pub async fn run<S>(
    store: &S,
    records: Vec<Value>,
    batch_size: usize,
    now: DateTime<Utc>,
) -> LoadReport
where
    S: SightingStore + BulkWriter + ?Sized,
{
    let total = records.len();
    let (documents, mut errors) = transform(records, now);
    tracing::info!(valid = documents.len(), total, "records transformed");

    let (inserted, failure) = insert_batches(store, documents, batch_size).await;
    if let Some(err) = failure {
        tracing::warn!(inserted, error = %err, "insert stopped early");
        errors.push(format!("insert stopped after {} documents: {}", inserted, err));
    }

    let indexed = sightings_store::ensure_indexes(store, &fields::INDEXED).await;
    tracing::info!(indexed, requested = fields::INDEXED.len(), "indexes ensured");

    LoadReport {
        total,
        inserted,
        errors,
    }
}

/// One-line summary of a stored record, read through the typed record model.
/// Documents that do not fit the model yield `None`.
pub fn describe(document: Document) -> Option<String> {
    let sighting: Sighting =
        serde_json::from_value(normalize::normalize_document(document)).ok()?;
    let id = sighting
        .id
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    let family = sighting.taxonomy.rank(TaxonomicRank::Family);
    Some(format!(
        "{} {} [{}] {} ({}, {}) {}",
        id,
        sighting.scientific_name,
        if family.is_empty() { "-" } else { family },
        sighting.location.country,
        sighting.location.geolocation.latitude,
        sighting.location.geolocation.longitude,
        dates::to_canonical(sighting.observed_at),
    ))
}

/// Describes the first stored record, if any.
pub async fn sample<S>(store: &S) -> Result<Option<String>, StoreError>
where
    S: SightingStore + ?Sized,
{
    let mut found = store.find(FindQuery::new(Document::new()).limit(1)).await?;
    Ok(found.pop().and_then(describe))
}

fn parse_observed_at(raw: &str) -> Option<DateTime<Utc>> {
    dates::parse(raw).ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    })
}

fn coordinate(value: &Bson) -> Option<f64> {
    let number = match value {
        Bson::Double(v) => *v,
        Bson::Int32(v) => f64::from(*v),
        Bson::Int64(v) => *v as f64,
        Bson::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}
