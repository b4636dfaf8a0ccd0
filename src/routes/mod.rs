use axum::Router;

use crate::state::SharedState;

pub mod admin;
pub mod docs;
pub mod health;
pub mod presence;
pub mod sse;
pub mod stats;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(stats::router())
        .merge(admin::router(state.clone()))
        .merge(sse::router(state.clone()))
        .merge(presence::router(state.clone()));

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}

#[cfg(test)]
mod tests {
    use std::{future::IntoFuture, sync::Arc, time::Duration};

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::oneshot,
        time::{sleep, timeout},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{models::MemberId, session_store::memory::MemoryStore},
        services::shutdown::{self, ShutdownTrigger},
        state::{AppState, clock::MonotonicClock},
    };

    const TOKEN: &str = "secret";

    fn app() -> Router<()> {
        router(AppState::new(
            AppConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MonotonicClock::new()),
            TOKEN.into(),
        ))
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("x-admin-token", token);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthcheck_reports_ok_without_token() {
        let response = app().oneshot(get("/healthcheck", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["open_sessions"], 0);
    }

    #[tokio::test]
    async fn admin_routes_require_the_configured_token() {
        let missing = app().oneshot(get("/admin/sessions", None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app()
            .oneshot(get("/admin/sessions", Some("nope")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let ok = app()
            .oneshot(get("/admin/sessions", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(json_body(ok).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn near_miss_tokens_are_rejected() {
        for token in ["secre", "secretx", "SECRET"] {
            let response = app()
                .oneshot(get("/admin/sessions", Some(token)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{token}");
        }
    }

    #[tokio::test]
    async fn stop_flushes_sessions_while_an_sse_client_is_connected() {
        let store = MemoryStore::new();
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(store.clone()),
            Arc::new(MonotonicClock::new()),
            TOKEN.into(),
        );
        state.tracker().join(MemberId(9)).await;
        sleep(Duration::from_millis(1100)).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let trigger = async move {
            let _ = stop_rx.await;
            ShutdownTrigger::Signal
        };
        let server = tokio::spawn(
            axum::serve(listener, router(state.clone()).into_make_service())
                .with_graceful_shutdown(shutdown::stop_when(state.clone(), trigger))
                .into_future(),
        );

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                format!(
                    "GET /sse/sessions HTTP/1.1\r\nhost: localhost\r\nx-admin-token: {TOKEN}\r\n\r\n"
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        let mut head = [0u8; 64];
        let read = client.read(&mut head).await.unwrap();
        assert!(String::from_utf8_lossy(&head[..read]).starts_with("HTTP/1.1 200"));

        stop_tx.send(()).unwrap();
        let served = timeout(Duration::from_secs(5), server).await;
        assert!(served.is_ok(), "server kept running with a live SSE client");

        let records = store.records_for(MemberId(9));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].duration_seconds, 1);
        assert_eq!(state.tracker().open_sessions(), 0);
        assert!(state.stopping().is_cancelled());
    }

    #[tokio::test]
    async fn presence_feed_requires_the_token() {
        let response = app().oneshot(get("/presence", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn member_total_validates_the_window() {
        let bad = app()
            .oneshot(get("/members/7/total?from=yesterday", None))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let ok = app().oneshot(get("/members/7/total", None)).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let body = json_body(ok).await;
        assert_eq!(body["member_id"], 7);
        assert_eq!(body["total_seconds"], 0);
    }
}
