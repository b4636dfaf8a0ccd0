//! Voice Ledger binary entrypoint wiring the presence feed, REST, SSE and the session store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_ledger::{
    config::{AdminToken, AppConfig, StoreBackend},
    dao::session_store::{SessionStore, memory::MemoryStore},
    routes,
    services::{presence_service, shutdown, storage_supervisor},
    state::{AppState, SharedState, clock::MonotonicClock},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = StoreBackend::from_env().context("reading STORE_BACKEND")?;
    let store = connect_store(backend).await?;
    let admin_token = admin_token();

    let app_state = AppState::new(config, store, Arc::new(MonotonicClock::new()), admin_token);

    tokio::spawn(storage_supervisor::run(app_state.clone()));
    tokio::spawn(presence_service::watch_feeds(app_state.clone()));
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, ?backend, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let trigger = shutdown::wait_for_trigger(app_state.feeds().lost_watcher());
    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown::stop_when(app_state.clone(), trigger))
        .await;

    // No-op after a graceful stop; covers the server failing before any trigger.
    let leftover = app_state.tracker().shutdown().await;
    if leftover.sessions_closed > 0 {
        warn!(
            sessions_closed = leftover.sessions_closed,
            "sessions closed after the server stopped unexpectedly"
        );
    }
    served.context("serving axum")?;
    Ok(())
}

/// Connect to the configured durable store. An unreachable store at startup is fatal.
async fn connect_store(backend: StoreBackend) -> anyhow::Result<Arc<dyn SessionStore>> {
    match backend {
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => {
            use voice_ledger::dao::session_store::mongodb::{MongoConfig, MongoSessionStore};

            let config = MongoConfig::from_env().await.context("reading MongoDB settings")?;
            let store = MongoSessionStore::connect(config)
                .await
                .context("connecting to MongoDB")?;
            info!("connected to MongoDB");
            Ok(Arc::new(store))
        }
        #[cfg(feature = "couch-store")]
        StoreBackend::Couch => {
            use voice_ledger::dao::session_store::couchdb::{CouchConfig, CouchSessionStore};

            let config = CouchConfig::from_env().context("reading CouchDB settings")?;
            let store = CouchSessionStore::connect(config)
                .await
                .context("connecting to CouchDB")?;
            info!("connected to CouchDB");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("using the in-memory store; records are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("store backend {other:?} is not compiled into this build"),
    }
}

/// Read the operator token. A generated token goes to stderr once, never to the log.
fn admin_token() -> String {
    match AdminToken::from_env() {
        AdminToken::Configured(token) => token,
        AdminToken::Generated(token) => {
            warn!("ADMIN_TOKEN not set; generated a token for this run and printed it to stderr");
            eprintln!("voice-ledger admin token: {token}");
            token
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
