use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::state::SharedState;

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Poll the store and keep the shared state in degraded mode while it is unreachable.
///
/// Flushes keep going through the retry policy in degraded mode; failed intervals stay
/// in memory until the store answers again.
pub async fn run(state: SharedState) {
    let store = state.store();
    let mut delay = INITIAL_DELAY;

    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
                delay = INITIAL_DELAY;
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                let mut reconnect_delay = INITIAL_DELAY;
                let mut reconnected = false;

                for attempt in 0..MAX_RECONNECT_ATTEMPTS {
                    match store.try_reconnect().await {
                        Ok(()) => {
                            info!(attempt, "storage reconnection succeeded after health check failure");
                            reconnected = true;
                            break;
                        }
                        Err(reconnect_err) => {
                            if attempt == 0 {
                                warn!(
                                    attempt, error = %reconnect_err,
                                    "storage reconnect first attempt failed; entering degraded mode"
                                );
                                state.update_degraded(true);
                            } else {
                                warn!(attempt, error = %reconnect_err, "storage reconnect attempt failed");
                            }
                            sleep(reconnect_delay).await;
                            reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                        }
                    }
                }

                if reconnected {
                    state.update_degraded(false);
                    sleep(HEALTH_POLL_INTERVAL).await;
                } else {
                    warn!("exhausted storage reconnect attempts; staying in degraded mode");
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_DELAY);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::memory::MemoryStore,
        services::tracker::tests::{secs, t0},
        state::{AppState, clock::MonotonicClock},
    };

    #[tokio::test(start_paused = true)]
    async fn toggles_degraded_mode_with_store_health() {
        let store = MemoryStore::new();
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(store.clone()),
            Arc::new(MonotonicClock::anchored_at(t0())),
            "token".into(),
        );
        let mut events = state.activity().subscribe();
        tokio::spawn(run(state.clone()));

        sleep(secs(1)).await;
        assert!(!state.is_degraded());

        store.set_offline(true);
        sleep(HEALTH_POLL_INTERVAL + secs(1)).await;
        assert!(state.is_degraded());

        store.set_offline(false);
        sleep(MAX_DELAY * 3).await;
        assert!(!state.is_degraded());

        let first = events.try_recv().unwrap();
        assert_eq!(first.event.as_deref(), Some("system.status"));
        assert_eq!(first.data, r#"{"degraded":true}"#);
    }
}
