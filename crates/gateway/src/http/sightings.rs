use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{MatchedPath, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use serde::Deserialize;
use sightings_contracts::TaxonomicRank;
use sightings_query::TaxonomyFilter;

use super::{AppState, ApiError, invalid_params, not_found, query_error_response, respond};

/// Path segment names for one language of the public API.
pub(super) struct Vocabulary {
    prefix: &'static str,
    scientific_name: &'static str,
    date: &'static str,
    country: &'static str,
    taxonomy: &'static str,
    location: &'static str,
    grouped: &'static str,
}

pub(super) const ENGLISH: Vocabulary = Vocabulary {
    prefix: "/api/sightings",
    scientific_name: "scientific_name",
    date: "date",
    country: "country",
    taxonomy: "taxonomy",
    location: "location",
    grouped: "grouped",
};

pub(super) const SPANISH: Vocabulary = Vocabulary {
    prefix: "/api/avistamientos",
    scientific_name: "nombre_cientifico",
    date: "fecha",
    country: "pais",
    taxonomy: "taxonomia",
    location: "ubicacion",
    grouped: "agrupados",
};

pub(super) fn mount(router: Router<AppState>, v: &Vocabulary) -> Router<AppState> {
    let p = v.prefix;
    router
        .route(p, get(list))
        .route(
            &format!("{}/{}/{{name}}", p, v.scientific_name),
            get(by_scientific_name),
        )
        .route(&format!("{}/{}/{{from}}/{{to}}", p, v.date), get(by_date_range))
        .route(&format!("{}/{}/{{name}}", p, v.country), get(by_country))
        .route(
            &format!(
                "{}/{}/{{kingdom}}/{{phylum}}/{{class}}/{{order}}/{{family}}/{{genus}}/{{species}}",
                p, v.taxonomy
            ),
            get(by_taxonomy),
        )
        .route(
            &format!("{}/{}/{{lat}}/{{lng}}", p, v.location),
            get(by_location),
        )
        .route(
            &format!("{}/{}/{{field}}", p, v.grouped),
            get(super::grouped::grouped),
        )
        .route(&format!("{}/{{rank}}/{{value}}", p), get(by_rank))
}

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    skip: Option<u64>,
    limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitParams {
    limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LocationParams {
    tolerance: Option<f64>,
    /// Older clients send the half-width as `radius`.
    radius: Option<f64>,
    limit: Option<u64>,
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(params)| params)
        .map_err(|rejection| invalid_params(format!("invalid query string: {}", rejection.body_text())))
}

async fn list(
    State(state): State<AppState>,
    route: MatchedPath,
    headers: HeaderMap,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Response {
    respond(&route, &headers, "list", async {
        let params = query_params(params)?;
        state
            .queries
            .list(params.skip, params.limit)
            .await
            .map_err(query_error_response)
    })
    .await
}

async fn by_scientific_name(
    State(state): State<AppState>,
    route: MatchedPath,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    respond(&route, &headers, "find_by_scientific_name", async {
        state
            .queries
            .by_scientific_name(&name)
            .await
            .map_err(query_error_response)
    })
    .await
}

async fn by_country(
    State(state): State<AppState>,
    route: MatchedPath,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    respond(&route, &headers, "find_by_country", async {
        state
            .queries
            .by_country(&name)
            .await
            .map_err(query_error_response)
    })
    .await
}

async fn by_date_range(
    State(state): State<AppState>,
    route: MatchedPath,
    headers: HeaderMap,
    Path((from, to)): Path<(String, String)>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> Response {
    respond(&route, &headers, "find_by_date_range", async {
        let params = query_params(params)?;
        state
            .queries
            .by_date_range(&from, &to, params.limit)
            .await
            .map_err(query_error_response)
    })
    .await
}

type TaxonomySegments = (String, String, String, String, String, String, String);

async fn by_taxonomy(
    State(state): State<AppState>,
    route: MatchedPath,
    headers: HeaderMap,
    Path(segments): Path<TaxonomySegments>,
) -> Response {
    let (kingdom, phylum, class, order, family, genus, species) = segments;
    let filter = TaxonomyFilter::from_segments([
        kingdom.as_str(),
        phylum.as_str(),
        class.as_str(),
        order.as_str(),
        family.as_str(),
        genus.as_str(),
        species.as_str(),
    ]);
    respond(&route, &headers, "find_by_taxonomy", async {
        state
            .queries
            .by_taxonomy(&filter)
            .await
            .map_err(query_error_response)
    })
    .await
}

async fn by_rank(
    State(state): State<AppState>,
    route: MatchedPath,
    headers: HeaderMap,
    Path((rank, value)): Path<(String, String)>,
) -> Response {
    respond(&route, &headers, "find_by_rank", async {
        let rank = TaxonomicRank::parse(&rank)
            .ok_or_else(|| not_found(format!("unknown taxonomic rank '{}'", rank)))?;
        state
            .queries
            .by_rank(rank, &value)
            .await
            .map_err(query_error_response)
    })
    .await
}

async fn by_location(
    State(state): State<AppState>,
    route: MatchedPath,
    headers: HeaderMap,
    Path((lat, lng)): Path<(String, String)>,
    params: Result<Query<LocationParams>, QueryRejection>,
) -> Response {
    respond(&route, &headers, "find_by_location", async {
        let params = query_params(params)?;
        state
            .queries
            .by_location(&lat, &lng, params.tolerance.or(params.radius), params.limit)
            .await
            .map_err(query_error_response)
    })
    .await
}
