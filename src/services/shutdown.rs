//! Draining and shutting down the tracker, and the process-level stop triggers.

use std::future::Future;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    dao::models::MemberId,
    dto::sse::CloseReason,
    services::tracker::{SessionReport, SessionTracker},
    state::SharedState,
};

/// Why the process is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGINT or SIGTERM.
    Signal,
    /// Every presence feed stayed disconnected past the grace period.
    FeedLost,
}

impl SessionTracker {
    /// Whether joins are still admitted.
    pub async fn is_accepting(&self) -> bool {
        *self.inner.admission.read().await
    }

    /// Close every open session while continuing to admit new joins.
    pub async fn drain(&self) -> SessionReport {
        let members = self.open_members();
        if members.is_empty() {
            return SessionReport::default();
        }
        let report = self.close_members(members, CloseReason::Drain).await;
        info!(
            sessions_closed = report.sessions_closed,
            seconds_flushed = report.seconds_flushed,
            failures = report.failures,
            "drained open sessions"
        );
        report
    }

    /// Refuse further joins, stop every flush task with its final flush and empty the
    /// registry. Later or concurrent calls wait for the first one and return an empty
    /// report.
    pub async fn shutdown(&self) -> SessionReport {
        let mut done = self.inner.shutdown_done.lock().await;
        if *done {
            debug!("tracker already shut down");
            return SessionReport::default();
        }

        // Waits for joins in flight; queued joins observe the closed gate.
        *self.inner.admission.write().await = false;

        let with_tasks: Vec<MemberId> = self.inner.tasks.iter().map(|entry| *entry.key()).collect();
        let mut report = self
            .close_members(with_tasks, CloseReason::Shutdown)
            .await;

        let leftovers = self.open_members();
        if !leftovers.is_empty() {
            warn!(count = leftovers.len(), "closing sessions left without a flush task");
            report.merge(self.close_members(leftovers, CloseReason::Shutdown).await);
        }

        *done = true;
        info!(
            sessions_closed = report.sessions_closed,
            records_written = report.records_written,
            seconds_flushed = report.seconds_flushed,
            failures = report.failures,
            "session tracker shut down"
        );
        report
    }

    fn open_members(&self) -> Vec<MemberId> {
        self.inner
            .registry
            .all()
            .into_iter()
            .map(|(member_id, _)| member_id)
            .collect()
    }
}

/// Wait for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Wait for `trigger`, then close every session with its final flush and end live SSE
/// streams and presence sockets. Used as the server's graceful-shutdown future, so
/// sessions are persisted before connections are drained.
pub async fn stop_when<F>(state: SharedState, trigger: F)
where
    F: Future<Output = ShutdownTrigger>,
{
    match trigger.await {
        ShutdownTrigger::Signal => info!("termination signal received"),
        ShutdownTrigger::FeedLost => warn!("presence feed lost; shutting down"),
    }
    state.tracker().shutdown().await;
    state.stopping().cancel();
}

/// Resolve once the process should stop, either on a signal or when `feed_lost` flips
/// to `true`.
pub async fn wait_for_trigger(mut feed_lost: watch::Receiver<bool>) -> ShutdownTrigger {
    let feed = async move {
        if feed_lost.wait_for(|lost| *lost).await.is_ok() {
            return ShutdownTrigger::FeedLost;
        }
        // The sender is gone, so only a signal can stop us.
        std::future::pending().await
    };

    tokio::select! {
        _ = shutdown_signal() => ShutdownTrigger::Signal,
        trigger = feed => trigger,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::{
        dao::session_store::memory::MemoryStore,
        services::tracker::{
            JoinOutcome,
            tests::{secs, t0, tracker_with},
        },
    };

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_every_session_once() {
        let store = MemoryStore::new();
        let tracker = tracker_with(&store);
        for id in 1..=3 {
            tracker.join(MemberId(id)).await;
        }
        sleep(secs(10)).await;

        let report = tracker.shutdown().await;
        assert_eq!(
            report,
            SessionReport {
                sessions_closed: 3,
                records_written: 3,
                seconds_flushed: 30,
                failures: 0,
            }
        );
        assert_eq!(tracker.open_sessions(), 0);
        assert!(tracker.inner.tasks.is_empty());

        sleep(secs(120)).await;
        assert_eq!(tracker.shutdown().await, SessionReport::default());
        assert_eq!(store.records().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_shutdowns_do_the_work_once() {
        let store = MemoryStore::new();
        let tracker = tracker_with(&store);
        tracker.join(MemberId(1)).await;
        tracker.join(MemberId(2)).await;
        sleep(secs(5)).await;

        let (first, second) = tokio::join!(tracker.shutdown(), tracker.shutdown());

        assert_eq!(first.sessions_closed + second.sessions_closed, 2);
        assert!(first == SessionReport::default() || second == SessionReport::default());
        assert_eq!(store.records().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn joins_are_rejected_after_shutdown() {
        let store = MemoryStore::new();
        let tracker = tracker_with(&store);
        tracker.shutdown().await;

        assert_eq!(tracker.join(MemberId(1)).await, JoinOutcome::Rejected);
        assert!(!tracker.is_accepting().await);
        assert_eq!(tracker.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_mid_sleep_and_keeps_the_pending_interval() {
        let store = MemoryStore::new();
        let tracker = tracker_with(&store);
        tracker.join(MemberId(1)).await;
        sleep(Duration::from_millis(90_700)).await;

        tracker.shutdown().await;

        let records = store.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].start_time, t0() + secs(60));
        assert_eq!(records[1].duration_seconds, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_closes_sessions_but_keeps_admitting() {
        let store = MemoryStore::new();
        let tracker = tracker_with(&store);
        tracker.join(MemberId(1)).await;
        tracker.join(MemberId(2)).await;
        sleep(secs(7)).await;

        let report = tracker.drain().await;
        assert_eq!(report.sessions_closed, 2);
        assert_eq!(report.seconds_flushed, 14);
        assert_eq!(tracker.open_sessions(), 0);

        assert!(matches!(tracker.join(MemberId(1)).await, JoinOutcome::Opened(_)));
        assert!(tracker.is_accepting().await);
    }

    #[tokio::test(start_paused = true)]
    async fn feed_loss_resolves_the_trigger() {
        let (sender, receiver) = watch::channel(false);
        let waiter = tokio::spawn(wait_for_trigger(receiver));

        sleep(secs(1)).await;
        sender.send_replace(true);

        assert_eq!(waiter.await.unwrap(), ShutdownTrigger::FeedLost);
    }
}
