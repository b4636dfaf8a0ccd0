//! Session lifecycle manager: turns joins and leaves into registry mutations and
//! per-session flush tasks, and owns every write of session time to the store.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
    dao::{
        models::{MemberId, SessionRecordEntity},
        session_store::SessionStore,
    },
    dto::sse::CloseReason,
    services::{flush_loop::FlushTask, retry::RetryPolicy, sse_events},
    state::{
        clock::Clock,
        registry::{Session, SessionId, SessionRegistry},
        sse::SseHub,
    },
};

/// Runtime knobs of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Period of each session's flush task.
    pub flush_interval: Duration,
    /// Policy applied to every record write.
    pub retry: RetryPolicy,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a single flush attempt on one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The session was closed or replaced before the flush could run.
    Gone,
    /// Less than one whole second was pending.
    Skipped,
    /// A record was persisted and the checkpoint advanced to its end.
    Written(SessionRecordEntity),
    /// Every attempt failed; the checkpoint did not move.
    Failed { pending_seconds: u64 },
}

/// What a join did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new session was opened.
    Opened(SessionId),
    /// An open session was force-closed before the new one was opened.
    Reopened {
        session_id: SessionId,
        previous: ClosedSession,
    },
    /// The tracker is shutting down.
    Rejected,
}

/// A session that has been removed from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSession {
    /// Session state at removal; `last_checkpoint` marks how far it was persisted.
    pub session: Session,
    /// Why the session ended.
    pub reason: CloseReason,
    /// Tracker clock reading at removal.
    pub closed_at: SystemTime,
    /// Records written by the final flushes of this close.
    pub records_written: usize,
    /// Seconds persisted by those records.
    pub seconds_flushed: u64,
    /// Whole seconds that could not be persisted and were dropped.
    pub lost_seconds: u64,
}

/// Totals accumulated over a bulk operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Sessions removed from the registry.
    pub sessions_closed: usize,
    /// Records persisted.
    pub records_written: usize,
    /// Seconds covered by those records.
    pub seconds_flushed: u64,
    /// Flushes that exhausted their retries.
    pub failures: usize,
}

impl SessionReport {
    fn add_flush(&mut self, outcome: &FlushOutcome) {
        match outcome {
            FlushOutcome::Written(record) => {
                self.records_written += 1;
                self.seconds_flushed += record.duration_seconds;
            }
            FlushOutcome::Failed { .. } => self.failures += 1,
            FlushOutcome::Gone | FlushOutcome::Skipped => {}
        }
    }

    pub(crate) fn merge(&mut self, other: SessionReport) {
        self.sessions_closed += other.sessions_closed;
        self.records_written += other.records_written;
        self.seconds_flushed += other.seconds_flushed;
        self.failures += other.failures;
    }

    pub(crate) fn add_close(&mut self, closed: &ClosedSession) {
        self.sessions_closed += 1;
        self.records_written += closed.records_written;
        self.seconds_flushed += closed.seconds_flushed;
        if closed.lost_seconds > 0 {
            self.failures += 1;
        }
    }
}

/// Cheaply cloneable handle on the tracking engine.
#[derive(Clone)]
pub struct SessionTracker {
    pub(crate) inner: Arc<TrackerInner>,
}

pub(crate) struct TrackerInner {
    pub(crate) registry: SessionRegistry,
    pub(crate) tasks: DashMap<MemberId, FlushTask>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    settings: TrackerSettings,
    /// `true` while joins are admitted. Joins hold a read guard for their whole run.
    pub(crate) admission: RwLock<bool>,
    /// Set once shutdown has completed.
    pub(crate) shutdown_done: Mutex<bool>,
    activity: SseHub,
}

impl SessionTracker {
    /// Build a tracker over `store`, reading time from `clock` and publishing lifecycle
    /// events on `activity`.
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        settings: TrackerSettings,
        activity: SseHub,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                registry: SessionRegistry::new(),
                tasks: DashMap::new(),
                store,
                clock,
                settings,
                admission: RwLock::new(true),
                shutdown_done: Mutex::new(false),
                activity,
            }),
        }
    }

    /// Current tracker clock reading.
    pub fn now(&self) -> SystemTime {
        self.inner.clock.now()
    }

    /// Hub carrying session lifecycle events.
    pub fn activity(&self) -> &SseHub {
        &self.inner.activity
    }

    /// Interval and retry settings in effect.
    pub fn settings(&self) -> TrackerSettings {
        self.inner.settings
    }

    /// Open sessions ordered by member id.
    pub fn tracked(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .inner
            .registry
            .all()
            .into_iter()
            .map(|(_, session)| session)
            .collect();
        sessions.sort_by_key(|session| session.member_id);
        sessions
    }

    /// The member's open session, if any.
    pub fn session(&self, member_id: MemberId) -> Option<Session> {
        self.inner.registry.get(member_id)
    }

    /// Number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.inner.registry.len()
    }

    /// Start tracking a member.
    ///
    /// An already open session is force-closed, final flush included, before the new
    /// one is opened.
    pub async fn join(&self, member_id: MemberId) -> JoinOutcome {
        let admission = self.inner.admission.read().await;
        if !*admission {
            debug!(member_id = %member_id, "join ignored; tracker is shutting down");
            return JoinOutcome::Rejected;
        }

        let _lifecycle = self.inner.registry.lifecycle_lock(member_id).await;

        let previous = if self.inner.registry.get(member_id).is_some() {
            warn!(member_id = %member_id, "join for a member with an open session; force-closing it");
            self.close_locked(member_id, CloseReason::DuplicateJoin)
                .await
        } else {
            None
        };

        // A task without a session should not exist, but it must never outlive its slot.
        if let Some((_, stray)) = self.inner.tasks.remove(&member_id) {
            warn!(member_id = %member_id, session_id = %stray.session_id, "stopping stray flush task");
            stray.stop().await;
        }

        let opened_at = self.now();
        if !self.inner.registry.open(member_id, opened_at) {
            error!(member_id = %member_id, "session slot still occupied after force-close");
            return JoinOutcome::Rejected;
        }
        let Some(session) = self.inner.registry.get(member_id) else {
            return JoinOutcome::Rejected;
        };

        let task = FlushTask::spawn(
            self.clone(),
            member_id,
            session.id,
            self.inner.settings.flush_interval,
        );
        self.inner.tasks.insert(member_id, task);

        info!(member_id = %member_id, session_id = %session.id, "session opened");
        sse_events::broadcast_session_opened(&self.inner.activity, &session);

        match previous {
            Some(previous) => JoinOutcome::Reopened {
                session_id: session.id,
                previous,
            },
            None => JoinOutcome::Opened(session.id),
        }
    }

    /// Stop tracking a member. A leave without an open session is a no-op.
    pub async fn leave(&self, member_id: MemberId) -> Option<ClosedSession> {
        self.close(member_id, CloseReason::Leave).await
    }

    /// Close a member's session, if any, under its lifecycle lock.
    pub async fn close(&self, member_id: MemberId, reason: CloseReason) -> Option<ClosedSession> {
        let _lifecycle = self.inner.registry.lifecycle_lock(member_id).await;
        let closed = self.close_locked(member_id, reason).await;
        if closed.is_none() {
            debug!(member_id = %member_id, ?reason, "no open session to close");
        }
        closed
    }

    /// Cancel and await the flush task, run one final flush and remove the session.
    /// Callers hold the member's lifecycle lock.
    async fn close_locked(&self, member_id: MemberId, reason: CloseReason) -> Option<ClosedSession> {
        let task_outcome = match self.inner.tasks.remove(&member_id) {
            Some((_, task)) => task.stop().await,
            None => None,
        };

        let session_id = self.inner.registry.get(member_id)?.id;
        let flush_lock = self.inner.registry.flush_lock(member_id, session_id)?;
        let _flushing = flush_lock.lock().await;

        let final_outcome = self.flush_locked(member_id, session_id).await;
        let session = self.inner.registry.close(member_id)?;
        let closed_at = self.now();

        let mut records_written = 0;
        let mut seconds_flushed = 0;
        for outcome in task_outcome.iter().chain(std::iter::once(&final_outcome)) {
            if let FlushOutcome::Written(record) = outcome {
                records_written += 1;
                seconds_flushed += record.duration_seconds;
            }
        }
        let lost_seconds = match final_outcome {
            FlushOutcome::Failed { pending_seconds } => pending_seconds,
            _ => 0,
        };

        if lost_seconds > 0 {
            error!(
                member_id = %member_id,
                session_id = %session_id,
                lost_seconds,
                "session closed with unpersisted time"
            );
        }
        info!(
            member_id = %member_id,
            session_id = %session_id,
            ?reason,
            seconds_flushed,
            "session closed"
        );

        let closed = ClosedSession {
            session,
            reason,
            closed_at,
            records_written,
            seconds_flushed,
            lost_seconds,
        };
        sse_events::broadcast_session_closed(&self.inner.activity, &closed);
        Some(closed)
    }

    /// Persist the time accrued by one session instance since its checkpoint.
    pub async fn flush_session(&self, member_id: MemberId, session_id: SessionId) -> FlushOutcome {
        let Some(flush_lock) = self.inner.registry.flush_lock(member_id, session_id) else {
            return FlushOutcome::Gone;
        };
        let _flushing = flush_lock.lock().await;
        self.flush_locked(member_id, session_id).await
    }

    /// Callers hold the session's flush lock.
    async fn flush_locked(&self, member_id: MemberId, session_id: SessionId) -> FlushOutcome {
        let Some(session) = self
            .inner
            .registry
            .get(member_id)
            .filter(|session| session.id == session_id)
        else {
            return FlushOutcome::Gone;
        };

        let seconds = session.pending(self.now()).as_secs();
        if seconds == 0 {
            return FlushOutcome::Skipped;
        }

        let record = SessionRecordEntity::new(member_id, session.last_checkpoint, seconds);
        let store = &self.inner.store;
        let written = self
            .inner
            .settings
            .retry
            .run("insert_session_record", || {
                store.insert_session_record(record.clone())
            })
            .await;

        match written {
            Ok(()) => {
                if !self
                    .inner
                    .registry
                    .advance_checkpoint(member_id, session_id, record.end_time)
                {
                    warn!(member_id = %member_id, session_id = %session_id, "checkpoint not advanced; session changed during flush");
                }
                debug!(
                    member_id = %member_id,
                    session_id = %session_id,
                    record_id = %record.id,
                    duration_seconds = record.duration_seconds,
                    "session slice persisted"
                );
                sse_events::broadcast_session_flushed(&self.inner.activity, session_id, &record);
                FlushOutcome::Written(record)
            }
            Err(err) => {
                error!(
                    member_id = %member_id,
                    session_id = %session_id,
                    pending_seconds = seconds,
                    error = %err,
                    "failed to persist session slice; keeping it for the next flush"
                );
                FlushOutcome::Failed {
                    pending_seconds: seconds,
                }
            }
        }
    }

    /// Flush every open session now, concurrently.
    pub async fn flush_all(&self) -> SessionReport {
        let flushes = self
            .inner
            .registry
            .all()
            .into_iter()
            .map(|(member_id, session)| self.flush_session(member_id, session.id));
        let mut report = SessionReport::default();
        for outcome in join_all(flushes).await {
            report.add_flush(&outcome);
        }
        report
    }

    /// Close the given members concurrently with the same reason.
    pub(crate) async fn close_members(
        &self,
        members: Vec<MemberId>,
        reason: CloseReason,
    ) -> SessionReport {
        let closes = members
            .into_iter()
            .map(|member_id| self.close(member_id, reason));
        let mut report = SessionReport::default();
        for closed in join_all(closes).await.into_iter().flatten() {
            report.add_close(&closed);
        }
        report
    }
}
