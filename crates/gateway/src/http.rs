use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sightings_contracts::fields;
use sightings_query::{Fetched, QueryError, SightingQueries};
use sightings_store::{MongoStore, SightingStore};
use tracing::Instrument;
use ulid::Ulid;

use crate::config::{GatewayConfig, StartupError};

mod grouped;
mod sightings;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    queries: SightingQueries,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn connect_store(config: &GatewayConfig) -> Result<MongoStore, StartupError> {
    let store = MongoStore::connect(&config.store_config())
        .await
        .map_err(|err| StartupError {
            code: "ERR_STORE_UNAVAILABLE",
            message: format!("failed to connect to document store: {}", err),
        })?;
    tracing::info!(
        database = %config.mongo_db,
        collection = %store.collection_name(),
        "connected to document store"
    );
    Ok(store)
}

pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let store = connect_store(&config).await?;
    Ok(router_with_store(config, Arc::new(store)).await)
}

pub async fn router_with_store(config: GatewayConfig, store: Arc<dyn SightingStore>) -> Router {
    if config.ensure_indexes {
        let created = sightings_store::ensure_indexes(store.as_ref(), &fields::INDEXED).await;
        tracing::info!(created, requested = fields::INDEXED.len(), "indexes ensured");
    }

    let queries = SightingQueries::new(store, config.query_limits());
    let state = AppState { config, queries };

    let router = Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics));

    let router = sightings::mount(router, &sightings::ENGLISH);
    sightings::mount(router, &sightings::SPANISH).with_state(state)
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "sightings-gateway",
        "status": "ok",
    }))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let store_ready = tokio::time::timeout(
        Duration::from_millis(state.config.connect_timeout_ms.max(50)),
        state.queries.store().ping(),
    )
    .await
    .is_ok_and(|res| res.is_ok());
    checks.insert("store", store_ready);

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Runs one lookup inside a request span, records metrics and maps the
/// outcome to a JSON response tagged with the request id.
async fn respond<T, F>(
    route: &MatchedPath,
    headers: &HeaderMap,
    operation: &'static str,
    work: F,
) -> Response
where
    T: Serialize,
    F: Future<Output = Result<Fetched<T>, ApiError>>,
{
    let request_id = extract_request_id(headers);
    let span = tracing::info_span!(
        "sightings.query",
        request_id = %request_id,
        route = %route.as_str(),
        operation,
        strategy = tracing::field::Empty,
        results = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let result = async move {
        let result = work.await;
        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::Span::current().record("latency_ms", latency_ms);

        match result {
            Ok(fetched) => {
                let strategy = fetched.strategy.as_str();
                tracing::Span::current().record("strategy", strategy);
                tracing::Span::current().record("results", fetched.items.len() as u64);
                tracing::Span::current().record("outcome", "ok");
                crate::metrics::observe_query_strategy(operation, strategy);
                tracing::info!("query served");
                Ok(Json(fetched.items))
            }
            Err((status, body)) => {
                tracing::Span::current().record("outcome", body.code.as_str());
                if status.is_server_error() {
                    tracing::warn!(status = status.as_u16(), message = %body.message, "query failed");
                } else {
                    tracing::info!(status = status.as_u16(), message = %body.message, "query rejected");
                }
                Err((status, body))
            }
        }
    }
    .instrument(span)
    .await;

    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(route.as_str(), "GET", status.as_u16(), started.elapsed());

    let mut response = result.into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
        }),
    )
}

fn query_error_response(err: QueryError) -> ApiError {
    match err {
        QueryError::InvalidDate { .. } => json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_DATE",
            err.to_string(),
            false,
        ),
        QueryError::InvalidParams(message) => json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_PARAMS",
            message,
            false,
        ),
        QueryError::Store { .. } => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_STORE_FAILURE",
            err.to_string(),
            false,
        ),
        QueryError::Timeout { .. } => json_error(
            StatusCode::GATEWAY_TIMEOUT,
            "ERR_STORE_TIMEOUT",
            err.to_string(),
            true,
        ),
    }
}

fn not_found(message: impl Into<String>) -> ApiError {
    json_error(StatusCode::NOT_FOUND, "ERR_NOT_FOUND", message, false)
}

fn invalid_params(message: impl Into<String>) -> ApiError {
    json_error(StatusCode::BAD_REQUEST, "ERR_INVALID_PARAMS", message, false)
}
