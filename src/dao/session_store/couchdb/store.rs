use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::from_value;
use tracing::debug;

use crate::dao::{
    models::{MemberId, MemberTotalEntity, SessionRecordEntity, TimeRange},
    session_store::SessionStore,
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{AllDocsResponse, CouchSessionDocument, END_SUFFIX, member_prefix},
};

#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

/// Outcome of a create-only document write.
#[derive(Debug, PartialEq, Eq)]
enum PutOutcome {
    Created,
    AlreadyExists,
}

impl CouchSessionStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config.credentials.map(|credentials| {
            (
                Arc::<str>::from(credentials.username),
                Arc::<str>::from(credentials.password),
            )
        });

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorize(self.client.request(method, url))
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::Database {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::Database {
                        database: database.clone(),
                        source,
                    })?;
                // 412 means another instance created it between our GET and PUT.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    /// PUT a document that must never be overwritten. A 409 means a previous attempt of
    /// the same write already landed.
    async fn put_new_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<PutOutcome>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::InsertRecord {
                doc_id: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutOutcome::AlreadyExists),
            status if status.is_success() => Ok(PutOutcome::Created),
            status => Err(CouchDaoError::InsertStatus {
                doc_id: doc_id.to_string(),
                status,
            }),
        }
    }

    /// Fetch every record document of a member through `_all_docs` and its id prefix.
    async fn member_records(&self, member_id: MemberId) -> CouchResult<Vec<SessionRecordEntity>> {
        let prefix = member_prefix(member_id);
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{prefix}\"")),
            ("endkey", format!("\"{prefix}{END_SUFFIX}\"")),
        ];

        let response = self
            .request(Method::GET, "_all_docs")
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::ListRecords { member_id, source })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::ListStatus {
                member_id,
                status: response.status(),
            });
        }

        let payload = response
            .json::<AllDocsResponse>()
            .await
            .map_err(|source| CouchDaoError::ListRecords { member_id, source })?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                from_value::<CouchSessionDocument>(doc)
                    .map(SessionRecordEntity::from)
                    .map_err(|source| CouchDaoError::MalformedRecord { member_id, source })
            })
            .collect()
    }

    async fn insert_record(&self, record: SessionRecordEntity) -> CouchResult<()> {
        let document = CouchSessionDocument::from(record);
        let outcome = self.put_new_document(&document.id, &document).await?;
        if outcome == PutOutcome::AlreadyExists {
            debug!(doc_id = %document.id, "session record already stored by an earlier attempt");
        }
        Ok(())
    }

    async fn member_total(
        &self,
        member_id: MemberId,
        range: TimeRange,
    ) -> CouchResult<MemberTotalEntity> {
        let (total_seconds, record_count) = self
            .member_records(member_id)
            .await?
            .into_iter()
            .filter(|record| range.contains(record.start_time))
            .fold((0, 0), |(sum, count), record| {
                (sum + record.duration_seconds, count + 1)
            });

        Ok(MemberTotalEntity {
            member_id,
            total_seconds,
            record_count,
        })
    }

    async fn ping(&self) -> CouchResult<()> {
        let response = self
            .authorize(self.client.get(self.database_url()))
            .send()
            .await
            .map_err(|source| CouchDaoError::Database {
                database: self.database.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::DatabaseStatus {
                database: self.database.to_string(),
                status: response.status(),
            })
        }
    }
}

impl SessionStore for CouchSessionStore {
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
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
