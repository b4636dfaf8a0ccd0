#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{MemberId, MemberTotalEntity, SessionRecordEntity, TimeRange};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

/// Abstraction over the persistence layer holding voice session records.
///
/// Writes are append-only from the tracker's point of view. Implementations must make
/// `insert_session_record` idempotent for a given record id, because the retry policy
/// replays the exact same record after a failed or timed-out attempt.
pub trait SessionStore: Send + Sync {
    fn insert_session_record(
        &self,
        record: SessionRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn member_total(
        &self,
        member_id: MemberId,
        range: TimeRange,
    ) -> BoxFuture<'static, StorageResult<MemberTotalEntity>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
