use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bson::{Document, doc};
use serde_json::Value;
use sightings_contracts::{GroupCount, TaxonomicRank, fields};
use sightings_store::{FindQuery, SightingStore, StoreError};
use tokio::time::Instant;

use crate::aggregate::{self, GroupField};
use crate::dates::{self, DateRange};
use crate::error::QueryError;
use crate::filter::{self, Coordinate, Plan, StoredForm, TaxonomyFilter};
use crate::normalize::normalize_document;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryLimits {
    pub result_cap: u64,
    pub group_cap: u64,
    pub list_default_limit: u64,
    pub geo_tolerance_default: f64,
    pub deadline: Duration,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            result_cap: 1000,
            group_cap: 1000,
            list_default_limit: 100,
            geo_tolerance_default: 0.0001,
            deadline: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Primary,
    /// Re-run against text-stored values after an empty primary result.
    Fallback,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Primary => "primary",
            Strategy::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub items: Vec<T>,
    pub strategy: Strategy,
}

impl<T> Fetched<T> {
    fn primary(items: Vec<T>) -> Self {
        Self {
            items,
            strategy: Strategy::Primary,
        }
    }
}

/// Read operations over the sightings collection. Cheap to clone; every clone
/// shares the same store handle.
#[derive(Clone)]
pub struct SightingQueries {
    store: Arc<dyn SightingStore>,
    limits: QueryLimits,
}

impl SightingQueries {
    pub fn new(store: Arc<dyn SightingStore>, limits: QueryLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    pub fn store(&self) -> &Arc<dyn SightingStore> {
        &self.store
    }

    /// Stable page ordered by `_id`.
    pub async fn list(
        &self,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Fetched<Value>, QueryError> {
        let limit = self.page_limit(limit.unwrap_or(self.limits.list_default_limit))?;
        let query = FindQuery::new(Document::new())
            .skip(skip.unwrap_or(0))
            .limit(limit)
            .sort(doc! { fields::ID: 1 });
        self.fetch("list", self.deadline(), Plan::Find(query))
            .await
            .map(Fetched::primary)
    }

    pub async fn by_scientific_name(&self, name: &str) -> Result<Fetched<Value>, QueryError> {
        let query = FindQuery::new(filter::exact(fields::SCIENTIFIC_NAME, name))
            .limit(self.limits.result_cap);
        self.fetch("find_by_scientific_name", self.deadline(), Plan::Find(query))
            .await
            .map(Fetched::primary)
    }

    pub async fn by_country(&self, country: &str) -> Result<Fetched<Value>, QueryError> {
        let query =
            FindQuery::new(filter::exact(fields::COUNTRY, country)).limit(self.limits.result_cap);
        self.fetch("find_by_country", self.deadline(), Plan::Find(query))
            .await
            .map(Fetched::primary)
    }

    pub async fn by_rank(
        &self,
        rank: TaxonomicRank,
        value: &str,
    ) -> Result<Fetched<Value>, QueryError> {
        let query = FindQuery::new(filter::rank(rank, value)).limit(self.limits.result_cap);
        self.fetch("find_by_rank", self.deadline(), Plan::Find(query))
            .await
            .map(Fetched::primary)
    }

    pub async fn by_taxonomy(
        &self,
        taxonomy: &TaxonomyFilter,
    ) -> Result<Fetched<Value>, QueryError> {
        let query = FindQuery::new(taxonomy.to_document()).limit(self.limits.result_cap);
        self.fetch("find_by_taxonomy", self.deadline(), Plan::Find(query))
            .await
            .map(Fetched::primary)
    }

    /// Closed interval; reversed endpoints are swapped. Falls back to
    /// converting text-stored dates in-pipeline when no native date matches.
    pub async fn by_date_range(
        &self,
        from_raw: &str,
        to_raw: &str,
        limit: Option<u64>,
    ) -> Result<Fetched<Value>, QueryError> {
        let from = dates::parse(from_raw).map_err(|source| QueryError::InvalidDate {
            endpoint: "from",
            source,
        })?;
        let to = dates::parse(to_raw).map_err(|source| QueryError::InvalidDate {
            endpoint: "to",
            source,
        })?;
        let limit = self.page_limit(limit.unwrap_or(self.limits.result_cap))?;
        let range = DateRange::new(from, to);

        self.fetch_with_fallback("find_by_date_range", fields::OBSERVED_AT, |form| {
            filter::date_range(&range, form, limit)
        })
        .await
    }

    /// Bounding box of `tolerance` degrees on each axis. Falls back to exact
    /// text matches when coordinates are stored as strings.
    pub async fn by_location(
        &self,
        latitude_raw: &str,
        longitude_raw: &str,
        tolerance: Option<f64>,
        limit: Option<u64>,
    ) -> Result<Fetched<Value>, QueryError> {
        let latitude = Coordinate::parse(latitude_raw).ok_or_else(|| {
            QueryError::InvalidParams(format!(
                "latitude must be a finite number, got '{}'",
                latitude_raw
            ))
        })?;
        let longitude = Coordinate::parse(longitude_raw).ok_or_else(|| {
            QueryError::InvalidParams(format!(
                "longitude must be a finite number, got '{}'",
                longitude_raw
            ))
        })?;
        let tolerance = tolerance.unwrap_or(self.limits.geo_tolerance_default);
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(QueryError::InvalidParams(
                "tolerance must be a finite, non-negative number".to_string(),
            ));
        }
        let limit = self.page_limit(limit.unwrap_or(self.limits.result_cap))?;

        self.fetch_with_fallback("find_by_location", fields::LATITUDE, |form| {
            filter::location(&latitude, &longitude, tolerance, form, limit)
        })
        .await
    }

    pub async fn grouped(&self, field: GroupField) -> Result<Fetched<GroupCount>, QueryError> {
        let pipeline = aggregate::group_pipeline(field, self.limits.group_cap);
        let rows = within(
            "group_by",
            self.deadline(),
            self.store.aggregate(pipeline),
        )
        .await?;
        Ok(Fetched::primary(aggregate::rows_to_counts(rows)))
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.limits.deadline
    }

    fn page_limit(&self, requested: u64) -> Result<u64, QueryError> {
        if requested == 0 {
            return Err(QueryError::InvalidParams(
                "limit must be at least 1".to_string(),
            ));
        }
        Ok(requested.min(self.limits.result_cap))
    }

    async fn fetch(
        &self,
        operation: &'static str,
        deadline: Instant,
        plan: Plan,
    ) -> Result<Vec<Value>, QueryError> {
        let documents = match plan {
            Plan::Find(query) => within(operation, deadline, self.store.find(query)).await?,
            Plan::Aggregate(pipeline) => {
                within(operation, deadline, self.store.aggregate(pipeline)).await?
            }
        };
        Ok(documents.into_iter().map(normalize_document).collect())
    }

    /// Runs the native plan; only when it comes back empty and a probe finds
    /// text-stored values at `probe_path` is the text plan tried.
    async fn fetch_with_fallback<F>(
        &self,
        operation: &'static str,
        probe_path: &str,
        build: F,
    ) -> Result<Fetched<Value>, QueryError>
    where
        F: Fn(StoredForm) -> Plan,
    {
        let deadline = self.deadline();
        let primary = self
            .fetch(operation, deadline, build(StoredForm::Native))
            .await?;
        if !primary.is_empty() {
            return Ok(Fetched::primary(primary));
        }

        let text_stored = within(
            operation,
            deadline,
            self.store.count(filter::text_probe(probe_path), Some(1)),
        )
        .await?;
        if text_stored == 0 {
            return Ok(Fetched::primary(primary));
        }

        tracing::info!(
            operation,
            field = probe_path,
            "no native matches; querying text-stored values"
        );
        let items = self
            .fetch(operation, deadline, build(StoredForm::Text))
            .await?;
        Ok(Fetched {
            items,
            strategy: Strategy::Fallback,
        })
    }
}

async fn within<T, F>(operation: &'static str, deadline: Instant, call: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout_at(deadline, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(StoreError::Timeout)) | Err(_) => Err(QueryError::Timeout { operation }),
        Ok(Err(source)) => Err(QueryError::Store { operation, source }),
    }
}
