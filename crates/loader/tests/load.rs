use std::sync::Mutex;

use async_trait::async_trait;
use bson::{Document, doc};
use chrono::Utc;
use serde_json::{Value, json};
use sightings_store::{BulkWriter, FindQuery, MemoryStore, SightingStore, StoreError};

fn record(species: &str, lat: Value, observed: &str) -> Value {
    json!({
        "Taxonomia": { "Reino": "Animalia", "Especie": species },
        "Ubicacion": {
            "Pais": "Colombia",
            "Geolocalizacion": { "Latitud": lat, "Longitud": -74.2 },
        },
        "FechaEvento": observed,
        "NombreCientifico": format!("Felis {}", species),
    })
}

#[tokio::test]
async fn valid_records_are_inserted_and_bad_ones_reported() {
    let store = MemoryStore::new();
    let records = vec![
        record("catus", json!("10.5"), "2024-03-15"),
        json!({ "Taxonomia": { "Especie": "leo" } }),
    ];

    let report = sightings_loader::run(&store, records, 1000, Utc::now()).await;

    assert_eq!(report.total, 2);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("record 1: missing fields"));

    let stored = store
        .find(FindQuery::new(doc! { "Ubicacion.Geolocalizacion.Latitud": { "$gte": 10.0 } }))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].get_datetime("FechaEvento").is_ok());
    assert!(stored[0].get_object_id("_id").is_ok());

    let summary = sightings_loader::sample(&store).await.unwrap().unwrap();
    assert!(summary.contains("Felis catus [-] Colombia (10.5, -74.2) 2024-03-15T00:00:00Z"));
}

#[tokio::test]
async fn empty_store_has_no_sample() {
    let store = MemoryStore::new();
    assert_eq!(sightings_loader::sample(&store).await.unwrap(), None);
}

#[tokio::test]
async fn loads_in_batches_and_indexes_afterwards() {
    let store = MemoryStore::new();
    let records: Vec<Value> = (0..5)
        .map(|i| record(&format!("sp{i}"), json!(i), "2024-01-01"))
        .collect();

    let report = sightings_loader::run(&store, records, 2, Utc::now()).await;

    assert_eq!(report.inserted, 5);
    assert!(report.errors.is_empty());
    assert_eq!(store.len(), 5);
    assert!(
        store
            .indexed_fields()
            .iter()
            .any(|field| field == "Taxonomia.Especie")
    );
}

struct FlakyWriter {
    inner: MemoryStore,
    accept_batches: usize,
    seen: Mutex<usize>,
}

#[async_trait]
impl BulkWriter for FlakyWriter {
    async fn insert_many(&self, documents: Vec<Document>) -> Result<u64, StoreError> {
        let batch = {
            let mut seen = self.seen.lock().unwrap();
            *seen += 1;
            *seen
        };
        if batch > self.accept_batches {
            return Err(StoreError::Evaluation("write conflict".to_string()));
        }
        self.inner.insert_many(documents).await
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        self.inner.delete_all().await
    }
}

#[tokio::test]
async fn failed_batch_stops_the_load_and_keeps_earlier_writes() {
    let writer = FlakyWriter {
        inner: MemoryStore::new(),
        accept_batches: 1,
        seen: Mutex::new(0),
    };
    let documents: Vec<Document> = (0..5).map(|i| doc! { "n": i }).collect();

    let (inserted, failure) = sightings_loader::insert_batches(&writer, documents, 2).await;

    assert_eq!(inserted, 2);
    assert!(failure.is_some());
    assert_eq!(writer.inner.len(), 2);
}
