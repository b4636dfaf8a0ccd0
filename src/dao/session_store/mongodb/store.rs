use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{Bson, Document, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoSessionRecordDocument, accumulator_as_u64, doc_id, member_range_filter},
};
use crate::dao::{
    models::{MemberId, MemberTotalEntity, SessionRecordEntity, TimeRange},
    session_store::SessionStore,
    storage::StorageResult,
};

const SESSION_COLLECTION_NAME: &str = "sessions";

#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.database().await.collection::<Document>(SESSION_COLLECTION_NAME);
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"member_id": 1, "start_time": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_member_start_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "member_id,start_time",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection(&self) -> Collection<MongoSessionRecordDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSessionRecordDocument>(SESSION_COLLECTION_NAME)
    }

    /// Upsert keyed on the record id, so replaying a record after an ambiguous failure
    /// leaves exactly one row.
    async fn insert_record(&self, record: SessionRecordEntity) -> MongoResult<()> {
        let id = record.id;
        let document: MongoSessionRecordDocument = record.into();
        self.collection()
            .await
            .replace_one(doc_id(document.id()), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::InsertRecord { id, source })?;
        Ok(())
    }

    async fn member_total(
        &self,
        member_id: MemberId,
        range: TimeRange,
    ) -> MongoResult<MemberTotalEntity> {
        let pipeline = vec![
            doc! {"$match": member_range_filter(member_id, range)},
            doc! {"$group": {
                "_id": Bson::Null,
                "total": {"$sum": "$duration_seconds"},
                "count": {"$sum": 1},
            }},
        ];

        let row = self
            .collection()
            .await
            .aggregate(pipeline)
            .await
            .map_err(|source| MongoDaoError::AggregateTotal { member_id, source })?
            .try_next()
            .await
            .map_err(|source| MongoDaoError::AggregateTotal { member_id, source })?;

        let Some(row) = row else {
            return Ok(MemberTotalEntity {
                member_id,
                total_seconds: 0,
                record_count: 0,
            });
        };

        let malformed = |reason| MongoDaoError::MalformedAggregate { member_id, reason };
        Ok(MemberTotalEntity {
            member_id,
            total_seconds: accumulator_as_u64(row.get("total")).map_err(malformed)?,
            record_count: accumulator_as_u64(row.get("count")).map_err(malformed)?,
        })
    }
}

impl SessionStore for MongoSessionStore {
    fn insert_session_record(
        &self,
        record: SessionRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_record(record).await.map_err(Into::into) })
    }

    fn member_total(
        &self,
        member_id: MemberId,
        range: TimeRange,
    ) -> BoxFuture<'static, StorageResult<MemberTotalEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .member_total(member_id, range)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
