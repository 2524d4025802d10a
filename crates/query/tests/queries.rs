use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use serde_json::Value;
use sightings_contracts::{GroupCount, TaxonomicRank};
use sightings_query::{
    GroupField, QueryError, QueryLimits, SightingQueries, Strategy, TaxonomyFilter,
};
use sightings_store::{FindQuery, MemoryStore, SightingStore, StoreError};

fn native(y: i32, m: u32, d: u32) -> Bson {
    use chrono::TimeZone;
    let instant = chrono::Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap();
    Bson::DateTime(bson::DateTime::from_millis(instant.timestamp_millis()))
}

fn sighting(
    species: &str,
    family: &str,
    country: &str,
    lat: impl Into<Bson>,
    lng: impl Into<Bson>,
    date: Bson,
) -> Document {
    let (lat, lng) = (lat.into(), lng.into());
    doc! {
        "Taxonomia": {
            "Reino": "Animalia",
            "Filo": "Chordata",
            "Clase": "Mammalia",
            "Orden": "Carnivora",
            "Familia": family,
            "Genero": "Felis",
            "Especie": species,
        },
        "Ubicacion": {
            "Pais": country,
            "Geolocalizacion": { "Latitud": lat, "Longitud": lng },
        },
        "FechaEvento": date,
        "NombreCientifico": format!("Felis {}", species),
    }
}

fn fixture() -> Vec<Document> {
    vec![
        sighting("catus", "Felidae", "Colombia", 10.5005, -74.1996, native(2024, 3, 15)),
        sighting("catus", "felidae", "Peru", 10.6, -74.2, native(2024, 5, 1)),
        sighting("leo", "Felidae", "Colombia", 1.0, 2.0, native(2023, 11, 20)),
        sighting("", "Canidae", "", 3.0, 4.0, native(2022, 1, 1)),
    ]
}

fn queries_over(documents: Vec<Document>, limits: QueryLimits) -> SightingQueries {
    SightingQueries::new(Arc::new(MemoryStore::with_documents(documents)), limits)
}

fn queries() -> SightingQueries {
    queries_over(fixture(), QueryLimits::default())
}

fn species_of(items: &[Value]) -> Vec<&str> {
    items
        .iter()
        .map(|item| item["Taxonomia"]["Especie"].as_str().unwrap())
        .collect()
}

fn assert_string_ids(items: &[Value]) {
    for item in items {
        assert!(item["_id"].is_string(), "identifier must be a string: {item}");
    }
}

#[tokio::test]
async fn native_date_range_returns_records_inside_the_interval() {
    let fetched = queries()
        .by_date_range("2024-01-01", "2024-06-30", None)
        .await
        .unwrap();
    assert_eq!(fetched.strategy, Strategy::Primary);
    assert_eq!(fetched.items.len(), 2);
    assert_string_ids(&fetched.items);
    let mut countries: Vec<&str> = fetched
        .items
        .iter()
        .map(|item| item["Ubicacion"]["Pais"].as_str().unwrap())
        .collect();
    countries.sort_unstable();
    assert_eq!(countries, vec!["Colombia", "Peru"]);
}

#[tokio::test]
async fn reversed_date_range_matches_the_swapped_call() {
    let queries = queries();
    let forward = queries
        .by_date_range("01/01/2024", "2024/06/30", None)
        .await
        .unwrap();
    let reversed = queries
        .by_date_range("2024-06-30", "01/01/2024", None)
        .await
        .unwrap();
    assert_eq!(forward, reversed);
}

#[tokio::test]
async fn date_range_honors_limit_and_rejects_zero() {
    let queries = queries();
    let fetched = queries
        .by_date_range("2020-01-01", "2030-01-01", Some(1))
        .await
        .unwrap();
    assert_eq!(fetched.items.len(), 1);

    let err = queries
        .by_date_range("2020-01-01", "2030-01-01", Some(0))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidParams(_)));
}

#[tokio::test]
async fn unparsable_date_is_rejected_before_the_store() {
    let queries = SightingQueries::new(Arc::new(FailingStore), QueryLimits::default());
    let err = queries
        .by_date_range("2024-01-01", "mid-june", None)
        .await
        .unwrap_err();
    match err {
        QueryError::InvalidDate { endpoint, source } => {
            assert_eq!(endpoint, "to");
            assert_eq!(source.raw(), "mid-june");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn text_dates_are_found_through_the_fallback() {
    let mut documents = fixture();
    documents.push(sighting(
        "pardalis",
        "Felidae",
        "Ecuador",
        0.5,
        0.5,
        Bson::String("20/08/2024".into()),
    ));
    documents.push(sighting(
        "yagouaroundi",
        "Felidae",
        "Ecuador",
        0.5,
        0.5,
        Bson::String("2024-08-02T10:00:00Z".into()),
    ));
    let queries = queries_over(documents, QueryLimits::default());

    let fetched = queries
        .by_date_range("2024-08-01", "2024-08-31", None)
        .await
        .unwrap();
    assert_eq!(fetched.strategy, Strategy::Fallback);
    let mut species = species_of(&fetched.items);
    species.sort_unstable();
    assert_eq!(species, vec!["pardalis", "yagouaroundi"]);
    assert!(fetched.items.iter().all(|item| item.get("_observed_at_instant").is_none()));
    assert_string_ids(&fetched.items);

    let native_hit = queries
        .by_date_range("2024-03-01", "2024-03-31", None)
        .await
        .unwrap();
    assert_eq!(native_hit.strategy, Strategy::Primary);
    assert_eq!(species_of(&native_hit.items), vec!["catus"]);
}

#[tokio::test]
async fn empty_primary_without_text_values_skips_the_fallback() {
    let fetched = queries()
        .by_date_range("1990-01-01", "1990-12-31", None)
        .await
        .unwrap();
    assert!(fetched.items.is_empty());
    assert_eq!(fetched.strategy, Strategy::Primary);
}

#[tokio::test]
async fn ambiguous_text_dates_read_day_first() {
    let documents = vec![sighting(
        "pardalis",
        "Felidae",
        "Ecuador",
        0.5,
        0.5,
        Bson::String("03/04/2024".into()),
    )];
    let queries = queries_over(documents, QueryLimits::default());

    let april = queries
        .by_date_range("2024-04-01", "2024-04-05", None)
        .await
        .unwrap();
    assert_eq!(april.strategy, Strategy::Fallback);
    assert_eq!(species_of(&april.items), vec!["pardalis"]);

    let march = queries
        .by_date_range("2024-03-01", "2024-03-10", None)
        .await
        .unwrap();
    assert!(march.items.is_empty());
}

#[tokio::test]
async fn sub_millisecond_start_excludes_the_preceding_millisecond() {
    use chrono::TimeZone;
    let instant = chrono::Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
    let documents = vec![sighting(
        "catus",
        "Felidae",
        "Colombia",
        1.0,
        1.0,
        Bson::DateTime(bson::DateTime::from_millis(instant.timestamp_millis())),
    )];
    let queries = queries_over(documents, QueryLimits::default());

    let fetched = queries
        .by_date_range("2024-03-15T10:00:00.000500", "2024-03-16", None)
        .await
        .unwrap();
    assert!(fetched.items.is_empty());

    let inclusive = queries
        .by_date_range("2024-03-15T10:00:00", "2024-03-16", None)
        .await
        .unwrap();
    assert_eq!(species_of(&inclusive.items), vec!["catus"]);
}

#[tokio::test]
async fn location_uses_a_bounding_box() {
    let fetched = queries()
        .by_location("10.5", "-74.2", Some(0.001), None)
        .await
        .unwrap();
    assert_eq!(fetched.items.len(), 1);
    assert_eq!(fetched.items[0]["Ubicacion"]["Pais"], "Colombia");
    assert_eq!(fetched.items[0]["Ubicacion"]["Geolocalizacion"]["Latitud"], 10.5005);
}

#[tokio::test]
async fn location_falls_back_to_text_coordinates() {
    let queries = queries_over(
        vec![sighting(
            "catus",
            "Felidae",
            "Colombia",
            "10.0",
            "-74.25",
            native(2024, 1, 1),
        )],
        QueryLimits::default(),
    );
    let fetched = queries.by_location("10", "-74.25", None, None).await.unwrap();
    assert_eq!(fetched.strategy, Strategy::Fallback);
    assert_eq!(fetched.items.len(), 1);
    assert_eq!(fetched.items[0]["Ubicacion"]["Geolocalizacion"]["Latitud"], 10.0);
}

#[tokio::test]
async fn location_rejects_bad_numbers() {
    let queries = queries();
    for (lat, lng, tolerance) in [
        ("north", "-74.2", None),
        ("10.5", "NaN", None),
        ("10.5", "-74.2", Some(-1.0)),
        ("10.5", "-74.2", Some(f64::INFINITY)),
    ] {
        let err = queries.by_location(lat, lng, tolerance, None).await.unwrap_err();
        assert!(err.is_client_error(), "{lat}/{lng}/{tolerance:?}: {err}");
    }
}

#[tokio::test]
async fn grouped_species_counts_sum_to_non_empty_values() {
    let fetched = queries()
        .grouped(GroupField::Rank(TaxonomicRank::Species))
        .await
        .unwrap();
    assert_eq!(
        fetched.items,
        vec![
            GroupCount { key: Some("catus".into()), count: 2 },
            GroupCount { key: Some("leo".into()), count: 1 },
        ]
    );
    let total: u64 = fetched.items.iter().map(|g| g.count).sum();
    assert_eq!(total, 3);
}

#[tokio::test]
async fn grouped_country_orders_by_count_then_key() {
    let mut documents = fixture();
    documents.push(sighting("x", "Felidae", "Argentina", 0.0, 0.0, native(2024, 1, 1)));
    let fetched = queries_over(documents, QueryLimits::default())
        .grouped(GroupField::Country)
        .await
        .unwrap();
    let keys: Vec<_> = fetched.items.iter().map(|g| g.key.as_deref().unwrap()).collect();
    assert_eq!(keys, vec!["Colombia", "Argentina", "Peru"]);
}

#[tokio::test]
async fn grouped_dates_are_keyed_by_canonical_text_in_ascending_order() {
    let fetched = queries().grouped(GroupField::Date).await.unwrap();
    let keys: Vec<_> = fetched.items.iter().map(|g| g.key.clone().unwrap()).collect();
    assert_eq!(
        keys,
        vec![
            "2022-01-01T00:00:00Z",
            "2023-11-20T00:00:00Z",
            "2024-03-15T00:00:00Z",
            "2024-05-01T00:00:00Z",
        ]
    );
}

#[tokio::test]
async fn group_cap_bounds_the_number_of_groups() {
    let limits = QueryLimits {
        group_cap: 1,
        ..QueryLimits::default()
    };
    let fetched = queries_over(fixture(), limits)
        .grouped(GroupField::Rank(TaxonomicRank::Family))
        .await
        .unwrap();
    assert_eq!(fetched.items.len(), 1);
    assert_eq!(fetched.items[0].key.as_deref(), Some("Felidae"));
}

#[tokio::test]
async fn taxonomy_wildcards_never_restrict_and_literals_ignore_case() {
    let queries = queries();

    let everything = queries
        .by_taxonomy(&TaxonomyFilter::from_segments(["-", "*", "-", "-", "-", "-", "-"]))
        .await
        .unwrap();
    assert_eq!(everything.items.len(), 4);

    let felids = queries
        .by_taxonomy(&TaxonomyFilter::from_segments([
            "ANIMALIA", "-", "-", "-", "FELIDAE", "*", "-",
        ]))
        .await
        .unwrap();
    assert_eq!(felids.items.len(), 3);

    let literal_dot = queries
        .by_taxonomy(&TaxonomyFilter::from_segments(["-", "-", "-", "-", "Felid.e", "-", "-"]))
        .await
        .unwrap();
    assert!(literal_dot.items.is_empty());
}

#[tokio::test]
async fn single_rank_and_exact_matches_are_case_sensitive() {
    let queries = queries();
    let family = queries
        .by_rank(TaxonomicRank::Family, "Felidae")
        .await
        .unwrap();
    assert_eq!(family.items.len(), 2);

    let country = queries.by_country("colombia").await.unwrap();
    assert!(country.items.is_empty());
    let country = queries.by_country("Colombia").await.unwrap();
    assert_eq!(country.items.len(), 2);

    let name = queries.by_scientific_name("Felis leo").await.unwrap();
    assert_eq!(species_of(&name.items), vec!["leo"]);
    assert_string_ids(&name.items);
}

#[tokio::test]
async fn result_cap_applies_to_exact_matches() {
    let limits = QueryLimits {
        result_cap: 1,
        ..QueryLimits::default()
    };
    let queries = queries_over(fixture(), limits);
    assert_eq!(queries.by_scientific_name("Felis catus").await.unwrap().items.len(), 1);
    assert_eq!(queries.by_country("Colombia").await.unwrap().items.len(), 1);
}

#[tokio::test]
async fn listing_pages_in_id_order() {
    let limits = QueryLimits {
        result_cap: 3,
        ..QueryLimits::default()
    };
    let queries = queries_over(fixture(), limits);

    let all = queries.list(None, Some(50)).await.unwrap();
    assert_eq!(all.items.len(), 3, "limit is clamped to the result cap");
    let ids: Vec<&str> = all.items.iter().map(|i| i["_id"].as_str().unwrap()).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);

    let second = queries.list(Some(1), Some(1)).await.unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0]["_id"], all.items[1]["_id"]);

    let err = queries.list(None, Some(0)).await.unwrap_err();
    assert!(matches!(err, QueryError::InvalidParams(_)));
}

#[tokio::test]
async fn store_failures_carry_the_operation_name() {
    let queries = SightingQueries::new(Arc::new(FailingStore), QueryLimits::default());
    let err = queries.by_country("Colombia").await.unwrap_err();
    assert!(matches!(err, QueryError::Store { operation: "find_by_country", .. }));
    assert_eq!(
        err.to_string(),
        "find_by_country failed: store evaluation failed: disk on fire"
    );
    assert!(!err.is_client_error());
}

#[tokio::test]
async fn slow_store_hits_the_deadline() {
    let limits = QueryLimits {
        deadline: Duration::from_millis(20),
        ..QueryLimits::default()
    };
    let queries = SightingQueries::new(Arc::new(SlowStore), limits);
    let err = queries
        .grouped(GroupField::Country)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Timeout { operation: "group_by" }));
}

struct FailingStore;

#[async_trait]
impl SightingStore for FailingStore {
    async fn find(&self, _query: FindQuery) -> Result<Vec<Document>, StoreError> {
        Err(StoreError::Evaluation("disk on fire".to_string()))
    }

    async fn aggregate(&self, _pipeline: Vec<Document>) -> Result<Vec<Document>, StoreError> {
        Err(StoreError::Evaluation("disk on fire".to_string()))
    }

    async fn count(&self, _filter: Document, _limit: Option<u64>) -> Result<u64, StoreError> {
        Err(StoreError::Evaluation("disk on fire".to_string()))
    }

    async fn create_index(&self, _field: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Evaluation("disk on fire".to_string()))
    }
}

struct SlowStore;

#[async_trait]
impl SightingStore for SlowStore {
    async fn find(&self, _query: FindQuery) -> Result<Vec<Document>, StoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }

    async fn aggregate(&self, _pipeline: Vec<Document>) -> Result<Vec<Document>, StoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }

    async fn count(&self, _filter: Document, _limit: Option<u64>) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn create_index(&self, _field: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
