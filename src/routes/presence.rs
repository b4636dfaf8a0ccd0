use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::get,
};

use crate::{
    routes::admin::require_admin_token, services::presence_service, state::SharedState,
};

#[utoipa::path(
    get,
    path = "/presence",
    tag = "presence",
    params(("X-Admin-Token" = String, Header, description = "Admin token configured through ADMIN_TOKEN")),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 401, description = "Missing or invalid admin token")
    )
)]
/// Upgrade the HTTP connection into a presence feed carrying voice state updates.
pub async fn presence_handler(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| presence_service::handle_socket(state, socket))
}

/// Configure the presence feed endpoint.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/presence", get(presence_handler))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}
