//! Process-local session store used for development runs and as the test double.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::{
    models::{MemberId, MemberTotalEntity, SessionRecordEntity, TimeRange},
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

/// Failures the in-memory backend can produce.
#[derive(Debug, Error)]
pub enum MemoryStoreError {
    /// A write was rejected by the configured fault injection.
    #[error("injected write failure for record `{id}`")]
    InjectedFailure { id: Uuid },
    /// The record map lock was poisoned by a panicking writer.
    #[error("memory store lock poisoned")]
    Poisoned,
    /// The store was switched offline.
    #[error("memory store offline")]
    Offline,
}

impl From<MemoryStoreError> for StorageError {
    fn from(err: MemoryStoreError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}

/// Session store keeping every record in insertion order, keyed by record id.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    records: Mutex<IndexMap<Uuid, SessionRecordEntity>>,
    failures_remaining: AtomicU32,
    stalls_remaining: AtomicU32,
    attempts: AtomicU32,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` insert attempts.
    pub fn fail_next(&self, count: u32) {
        self.inner.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` insert attempts hang until the caller gives up.
    pub fn stall_next(&self, count: u32) {
        self.inner.stalls_remaining.store(count, Ordering::SeqCst);
    }

    /// Make health checks and reconnects fail until switched back online.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn probe(&self) -> Result<(), MemoryStoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(MemoryStoreError::Offline)
        } else {
            Ok(())
        }
    }

    /// Number of insert attempts received, successful or not.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored record in insertion order.
    pub fn records(&self) -> Vec<SessionRecordEntity> {
        self.inner
            .records
            .lock()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the records belonging to one member.
    pub fn records_for(&self, member_id: MemberId) -> Vec<SessionRecordEntity> {
        self.records()
            .into_iter()
            .filter(|record| record.member_id == member_id)
            .collect()
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn insert(&self, record: SessionRecordEntity) -> Result<(), MemoryStoreError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.inner.failures_remaining) {
            return Err(MemoryStoreError::InjectedFailure { id: record.id });
        }
        let mut records = self
            .inner
            .records
            .lock()
            .map_err(|_| MemoryStoreError::Poisoned)?;
        records.insert(record.id, record);
        Ok(())
    }

    fn total(
        &self,
        member_id: MemberId,
        range: TimeRange,
    ) -> Result<MemberTotalEntity, MemoryStoreError> {
        let records = self
            .inner
            .records
            .lock()
            .map_err(|_| MemoryStoreError::Poisoned)?;
        let (total_seconds, record_count) = records
            .values()
            .filter(|record| record.member_id == member_id && range.contains(record.start_time))
            .fold((0, 0), |(sum, count), record| {
                (sum + record.duration_seconds, count + 1)
            });
        Ok(MemberTotalEntity {
            member_id,
            total_seconds,
            record_count,
        })
    }
}

impl SessionStore for MemoryStore {
    fn insert_session_record(
        &self,
        record: SessionRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            if Self::take_one(&store.inner.stalls_remaining) {
                store.inner.attempts.fetch_add(1, Ordering::SeqCst);
                futures::future::pending::<()>().await;
            }
            store.insert(record).map_err(Into::into)
        })
    }

    fn member_total(
        &self,
        member_id: MemberId,
        range: TimeRange,
    ) -> BoxFuture<'static, StorageResult<MemberTotalEntity>> {
        let store = self.clone();
        Box::pin(async move { store.total(member_id, range).map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.probe().map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.probe().map_err(Into::into) })
    }
}
