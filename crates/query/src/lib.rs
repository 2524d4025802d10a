//! Query translation and result normalization for sightings.
//!
//! Request parameters are validated and turned into store filters or
//! aggregation pipelines, executed against a [`sightings_store::SightingStore`]
//! under a per-request deadline, and the results normalized to wire JSON.

pub mod aggregate;
pub mod dates;
mod error;
pub mod filter;
pub mod normalize;
mod service;

pub use aggregate::GroupField;
pub use error::QueryError;
pub use filter::{StoredForm, TaxonomyFilter};
pub use service::{Fetched, QueryLimits, SightingQueries, Strategy};
