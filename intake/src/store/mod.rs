//! Persistence seams for issues and bugs.
//!
//! The deduplication engine relies on [`BugStore::upsert_append`] being a
//! single atomic operation inside the backend, so that concurrent
//! submissions for one signature (from any number of processes sharing the
//! backend) can never create two bugs or lose an append.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::StoreConfig;
use crate::types::{Bug, Issue, IssueSummary, NewIssue, ObjectId};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("conflicting write: {0}")]
    Conflict(String),
}

/// Outcome of attaching an issue to the bug for its signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub bug_id: ObjectId,
    /// Whether the bug was created by this call.
    pub created: bool,
}

#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Stores a new issue and returns its generated identifier.
    async fn insert(&self, issue: NewIssue) -> Result<ObjectId, StoreError>;

    /// Looks up issues by identifier. Results follow the order of `ids`;
    /// unknown identifiers are skipped.
    async fn fetch(&self, ids: &[ObjectId]) -> Result<Vec<Issue>, StoreError>;

    /// Same as [`IssueStore::fetch`], projected to the summary fields.
    async fn fetch_summaries(&self, ids: &[ObjectId]) -> Result<Vec<IssueSummary>, StoreError>;

    /// Every issue in insertion order.
    async fn all(&self) -> Result<Vec<Issue>, StoreError>;

    async fn all_summaries(&self) -> Result<Vec<IssueSummary>, StoreError>;
}

#[async_trait]
pub trait BugStore: Send + Sync {
    /// Atomically finds the bug for `signature`, creating it when absent, and
    /// appends `issue_id` to its issue list.
    async fn upsert_append(
        &self,
        signature: &str,
        issue_id: ObjectId,
    ) -> Result<Attachment, StoreError>;

    async fn get(&self, id: ObjectId) -> Result<Option<Bug>, StoreError>;

    async fn find_by_signature(&self, signature: &str) -> Result<Option<Bug>, StoreError>;

    /// Every bug in creation order.
    async fn all(&self) -> Result<Vec<Bug>, StoreError>;
}

/// Issue and bug store handles backed by the same storage.
#[derive(Clone)]
pub struct Stores {
    pub issues: Arc<dyn IssueStore>,
    pub bugs: Arc<dyn BugStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Stores {
            issues: store.clone(),
            bugs: store,
        }
    }

    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        match config {
            StoreConfig::Memory => {
                tracing::warn!("using the in-memory store; data is lost on restart");
                Ok(Self::memory())
            }
            StoreConfig::Sqlite {
                url,
                max_connections,
                busy_timeout_ms,
            } => {
                let store = Arc::new(
                    SqliteStore::connect(
                        url,
                        *max_connections,
                        Duration::from_millis(*busy_timeout_ms),
                    )
                    .await?,
                );
                tracing::info!(url = %url, "opened sqlite store");
                Ok(Stores {
                    issues: store.clone(),
                    bugs: store,
                })
            }
        }
    }
}

/// Bounds a store call by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}
