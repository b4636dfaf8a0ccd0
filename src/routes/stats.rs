use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use axum_valid::Valid;

use crate::{
    dao::models::MemberId,
    dto::stats::{MemberTotalQuery, MemberTotalResponse},
    error::AppError,
    services::stats_service,
    state::SharedState,
};

/// Sum the persisted voice time of a member, optionally within a time window.
#[utoipa::path(
    get,
    path = "/members/{id}/total",
    tag = "stats",
    params(
        ("id" = u64, Path, description = "Member identifier"),
        MemberTotalQuery
    ),
    responses(
        (status = 200, description = "Persisted total", body = MemberTotalResponse),
        (status = 400, description = "Malformed time window"),
        (status = 503, description = "Store unavailable"),
        (status = 504, description = "Store did not answer in time")
    )
)]
pub async fn member_total(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
    Valid(Query(query)): Valid<Query<MemberTotalQuery>>,
) -> Result<Json<MemberTotalResponse>, AppError> {
    Ok(Json(
        stats_service::member_total(&state, MemberId(id), query).await?,
    ))
}

/// Configure the stats routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/members/{id}/total", get(member_total))
}
