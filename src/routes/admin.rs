use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use subtle::ConstantTimeEq;

use crate::{
    dto::admin::{SessionReportResponse, TrackedSessionItem},
    error::AppError,
    services::admin_service,
    state::SharedState,
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Operator endpoints for inspecting and flushing open sessions.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/sessions", get(list_sessions))
        .route("/admin/sessions/flush", post(flush_sessions))
        .route("/admin/sessions/drain", post(drain_sessions))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// List every open session with its unflushed time.
#[utoipa::path(
    get,
    path = "/admin/sessions",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token configured through ADMIN_TOKEN")),
    responses(
        (status = 200, description = "Open sessions", body = [TrackedSessionItem]),
        (status = 401, description = "Missing or invalid admin token")
    )
)]
pub async fn list_sessions(State(state): State<SharedState>) -> Json<Vec<TrackedSessionItem>> {
    Json(admin_service::list_tracked(&state))
}

/// Persist the accrued time of every open session right away.
#[utoipa::path(
    post,
    path = "/admin/sessions/flush",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token configured through ADMIN_TOKEN")),
    responses(
        (status = 200, description = "Flush report", body = SessionReportResponse),
        (status = 401, description = "Missing or invalid admin token")
    )
)]
pub async fn flush_sessions(State(state): State<SharedState>) -> Json<SessionReportResponse> {
    Json(admin_service::flush_all(&state).await)
}

/// Close every open session with a final flush. The tracker keeps accepting joins.
#[utoipa::path(
    post,
    path = "/admin/sessions/drain",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token configured through ADMIN_TOKEN")),
    responses(
        (status = 200, description = "Drain report", body = SessionReportResponse),
        (status = 401, description = "Missing or invalid admin token")
    )
)]
pub async fn drain_sessions(State(state): State<SharedState>) -> Json<SessionReportResponse> {
    Json(admin_service::drain(&state).await)
}

/// Reject requests that do not carry the configured admin token.
pub(crate) async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    let matches = provided.as_bytes().ct_eq(state.admin_token().as_bytes());
    if bool::from(matches) {
        Ok(next.run(req).await)
    } else {
        Err(AppError::Unauthorized("invalid admin token".into()))
    }
}
