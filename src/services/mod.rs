/// Admin operations over open sessions.
pub mod admin_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Per-session periodic flush task.
pub mod flush_loop;
/// Health check service.
pub mod health_service;
/// Presence feed classification, dispatch and connectivity watch.
pub mod presence_service;
/// Retry policy applied to store calls.
pub mod retry;
/// Tracker drain, shutdown and process stop triggers.
pub mod shutdown;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Per-member voice time queries.
pub mod stats_service;
/// Storage health supervision and degraded mode.
pub mod storage_supervisor;
/// Session lifecycle manager.
pub mod tracker;
