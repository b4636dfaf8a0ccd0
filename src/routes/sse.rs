use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    middleware,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{routes::admin::require_admin_token, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/sessions",
    tag = "sse",
    params(("X-Admin-Token" = String, Header, description = "Admin token configured through ADMIN_TOKEN")),
    responses((status = 200, description = "Session activity stream", content_type = "text/event-stream", body = String))
)]
/// Stream session lifecycle and storage status events to operators.
pub async fn session_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (receiver, handshake) = sse_service::subscribe_sessions(&state);
    info!("New session SSE connection");
    sse_service::to_sse_stream(receiver, handshake, state.stopping().clone())
}

/// Configure the SSE endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/sessions", get(session_stream))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}
