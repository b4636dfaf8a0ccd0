use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the voice ledger service.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::stats::member_total,
        crate::routes::admin::list_sessions,
        crate::routes::admin::flush_sessions,
        crate::routes::admin::drain_sessions,
        crate::routes::sse::session_stream,
        crate::routes::presence::presence_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::stats::MemberTotalResponse,
            crate::dto::admin::TrackedSessionItem,
            crate::dto::admin::SessionReportResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::SessionOpenedEvent,
            crate::dto::sse::SessionFlushedEvent,
            crate::dto::sse::SessionClosedEvent,
            crate::dto::sse::CloseReason,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "stats", description = "Persisted voice time queries"),
        (name = "admin", description = "Operator controls over open sessions"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "presence", description = "WebSocket feed from the gateway bridge"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/members/{id}/total",
            "/admin/sessions",
            "/admin/sessions/flush",
            "/admin/sessions/drain",
            "/sse/sessions",
            "/presence",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
