pub mod clock;
pub mod feed;
pub mod registry;
pub mod sse;

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    config::AppConfig,
    dao::session_store::SessionStore,
    services::{presence_service::PresenceFilter, sse_events, tracker::SessionTracker},
};

pub use self::sse::SseHub;
use self::{clock::Clock, feed::FeedMonitor};

pub type SharedState = Arc<AppState>;

/// Central application state: the tracking engine, the durable store and connectivity flags.
pub struct AppState {
    tracker: SessionTracker,
    store: Arc<dyn SessionStore>,
    presence: PresenceFilter,
    feeds: FeedMonitor,
    config: AppConfig,
    degraded: watch::Sender<bool>,
    admin_token: String,
    /// Cancelled once the process starts stopping; ends SSE streams and presence sockets.
    stopping: CancellationToken,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The store must already be reachable; the application starts healthy.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        admin_token: String,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(false);
        let tracker = SessionTracker::new(
            store.clone(),
            clock,
            config.tracker_settings(),
            SseHub::new(config.sse_capacity),
        );
        Arc::new(Self {
            tracker,
            store,
            presence: PresenceFilter::from(&config.tracking),
            feeds: FeedMonitor::new(),
            config,
            degraded: degraded_tx,
            admin_token,
            stopping: CancellationToken::new(),
        })
    }

    /// Session lifecycle manager.
    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Durable store shared with the tracker.
    pub fn store(&self) -> Arc<dyn SessionStore> {
        self.store.clone()
    }

    /// Channel and bot rules applied to presence updates.
    pub fn presence(&self) -> &PresenceFilter {
        &self.presence
    }

    /// Connectivity of presence feeds.
    pub fn feeds(&self) -> &FeedMonitor {
        &self.feeds
    }

    /// Configuration loaded at startup.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Broadcast hub carrying session activity.
    pub fn activity(&self) -> &SseHub {
        self.tracker.activity()
    }

    /// Token expected in the `X-Admin-Token` header of privileged routes.
    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    /// Token cancelled when the process begins stopping.
    pub fn stopping(&self) -> &CancellationToken {
        &self.stopping
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        let changed = self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        if changed {
            sse_events::broadcast_system_status(self.activity(), value);
        }
    }
}
