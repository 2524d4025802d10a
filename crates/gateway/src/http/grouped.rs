use axum::extract::{MatchedPath, Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use sightings_query::GroupField;

use super::{AppState, not_found, query_error_response, respond};

pub(super) async fn grouped(
    State(state): State<AppState>,
    route: MatchedPath,
    headers: HeaderMap,
    Path(field): Path<String>,
) -> Response {
    respond(&route, &headers, "group_by", async {
        let field = GroupField::parse(&field)
            .ok_or_else(|| not_found(format!("cannot group by '{}'", field)))?;
        state
            .queries
            .grouped(field)
            .await
            .map_err(query_error_response)
    })
    .await
}
