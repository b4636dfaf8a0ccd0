//! Authoritative in-memory map of open voice sessions.
//!
//! All state is sharded per member through [`DashMap`]; no lock spans unrelated members.
//! Two kinds of async locks complement the map:
//! - a lifecycle lock per member, held across open/close so those are mutually exclusive;
//! - a flush lock per session, held across a store write so two flushes of the same
//!   session never persist the same interval.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::dao::models::MemberId;

/// Identifier distinguishing successive sessions of the same member.
pub type SessionId = Uuid;

/// One continuous span of presence in a tracked channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Fresh for every open, so a stale flush task cannot touch a newer session.
    pub id: SessionId,
    /// Member whose presence opened the session.
    pub member_id: MemberId,
    /// Wall-clock time of the join.
    pub started_at: SystemTime,
    /// Instant through which the session's duration is already persisted.
    pub last_checkpoint: SystemTime,
}

impl Session {
    fn new(member_id: MemberId, started_at: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_id,
            started_at,
            last_checkpoint: started_at,
        }
    }

    /// Time accrued since the last checkpoint, zero if `now` is behind it.
    pub fn pending(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_checkpoint).unwrap_or_default()
    }
}

struct SessionSlot {
    session: Session,
    flush_lock: Arc<Mutex<()>>,
}

/// Registry of open sessions keyed by member.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<MemberId, SessionSlot>,
    lifecycle_locks: DashMap<MemberId, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh session unless one is already open; returns whether it inserted.
    pub fn open(&self, member_id: MemberId, at: SystemTime) -> bool {
        match self.sessions.entry(member_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(SessionSlot {
                    session: Session::new(member_id, at),
                    flush_lock: Arc::new(Mutex::new(())),
                });
                true
            }
        }
    }

    /// Atomically remove and return the member's session.
    pub fn close(&self, member_id: MemberId) -> Option<Session> {
        self.sessions
            .remove(&member_id)
            .map(|(_, slot)| slot.session)
    }

    /// Copy of the member's open session.
    pub fn get(&self, member_id: MemberId) -> Option<Session> {
        self.sessions
            .get(&member_id)
            .map(|slot| slot.session.clone())
    }

    /// Snapshot of every open session, used to drain on shutdown.
    pub fn all(&self) -> Vec<(MemberId, Session)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().session.clone()))
            .collect()
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Move the checkpoint of `session_id` forward to `to`.
    ///
    /// Refused when the member's current session is a different instance or when `to`
    /// would move the checkpoint backwards.
    pub fn advance_checkpoint(
        &self,
        member_id: MemberId,
        session_id: SessionId,
        to: SystemTime,
    ) -> bool {
        let Some(mut slot) = self.sessions.get_mut(&member_id) else {
            return false;
        };
        let session = &mut slot.session;
        if session.id != session_id || to < session.last_checkpoint {
            return false;
        }
        session.last_checkpoint = to;
        true
    }

    /// Flush lock of a specific session instance, if it is still the open one.
    pub fn flush_lock(&self, member_id: MemberId, session_id: SessionId) -> Option<Arc<Mutex<()>>> {
        self.sessions
            .get(&member_id)
            .filter(|slot| slot.session.id == session_id)
            .map(|slot| slot.flush_lock.clone())
    }

    /// Wait for exclusive lifecycle access to a member.
    ///
    /// Lock entries are kept for the life of the registry.
    pub async fn lifecycle_lock(&self, member_id: MemberId) -> OwnedMutexGuard<()> {
        let lock = self.lifecycle_locks.entry(member_id).or_default().clone();
        lock.lock_owned().await
    }
}
