//! Error types raised by the CouchDB session store.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::{models::MemberId, storage::StorageError};

/// Convenient result alias returning [`CouchDaoError`] failures.
pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures that can occur while reading or writing session records in CouchDB.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    /// Required environment variable is missing.
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The database endpoint could not be reached while checking or creating it.
    #[error("failed to reach CouchDB database `{database}`")]
    Database {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB answered a database-level request with an unexpected status.
    #[error("unexpected status {status} for CouchDB database `{database}`")]
    DatabaseStatus {
        database: String,
        status: StatusCode,
    },
    /// The session record PUT could not be sent.
    #[error("failed to write session record `{doc_id}`")]
    InsertRecord {
        doc_id: String,
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB refused the session record with something other than a conflict.
    #[error("session record `{doc_id}` rejected with status {status}")]
    InsertStatus { doc_id: String, status: StatusCode },
    /// Listing a member's records failed in transit or while decoding the response.
    #[error("failed to list session records of member `{member_id}`")]
    ListRecords {
        member_id: MemberId,
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB answered the listing with an unexpected status.
    #[error("listing session records of member `{member_id}` returned status {status}")]
    ListStatus {
        member_id: MemberId,
        status: StatusCode,
    },
    /// A stored document does not match the session record layout.
    #[error("malformed session record document for member `{member_id}`")]
    MalformedRecord {
        member_id: MemberId,
        #[source]
        source: serde_json::Error,
    },
}

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}
