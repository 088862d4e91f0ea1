use crate::store::{Attachment, BugStore, IssueStore, MemoryStore, StoreError};
use crate::types::{Bug, Issue, IssueSummary, NewIssue, ObjectId};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn sample_issue(exception: Option<&str>) -> NewIssue {
    NewIssue {
        exception: exception.map(str::to_owned),
        date_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
        os_name: Some("Linux".into()),
        os_version: Some("6.1.0".into()),
        java_version: Some("17.0.2".into()),
        args: Some("--verbose".into()),
        prog_description: "Saving the document".into(),
        user_description: "It crashed when I pressed save".into(),
        hist_undo_possible: true,
        hist_redo_possible: false,
        nav_backward_possible: true,
        nav_forward_possible: false,
        screenshot: vec!["data:image/png;base64,iVBORw0KGgo=".into()],
        misc: Some("plugins=3".into()),
    }
}

/// Issue store whose writes always fail.
pub struct FailingIssueStore;

#[async_trait]
impl IssueStore for FailingIssueStore {
    async fn insert(&self, _issue: NewIssue) -> Result<ObjectId, StoreError> {
        Err(StoreError::Conflict("insert rejected".into()))
    }

    async fn fetch(&self, _ids: &[ObjectId]) -> Result<Vec<Issue>, StoreError> {
        Ok(Vec::new())
    }

    async fn fetch_summaries(&self, _ids: &[ObjectId]) -> Result<Vec<IssueSummary>, StoreError> {
        Ok(Vec::new())
    }

    async fn all(&self) -> Result<Vec<Issue>, StoreError> {
        Ok(Vec::new())
    }

    async fn all_summaries(&self) -> Result<Vec<IssueSummary>, StoreError> {
        Ok(Vec::new())
    }
}

/// Bug store that waits before every call.
pub struct SlowBugStore {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

impl SlowBugStore {
    pub fn new(inner: Arc<MemoryStore>, delay: Duration) -> Self {
        SlowBugStore { inner, delay }
    }
}

#[async_trait]
impl BugStore for SlowBugStore {
    async fn upsert_append(
        &self,
        signature: &str,
        issue_id: ObjectId,
    ) -> Result<Attachment, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert_append(signature, issue_id).await
    }

    async fn get(&self, id: ObjectId) -> Result<Option<Bug>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(id).await
    }

    async fn find_by_signature(&self, signature: &str) -> Result<Option<Bug>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_by_signature(signature).await
    }

    async fn all(&self) -> Result<Vec<Bug>, StoreError> {
        tokio::time::sleep(self.delay).await;
        BugStore::all(self.inner.as_ref()).await
    }
}

/// Memory store that counts every call made through either trait.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IssueStore for CountingStore {
    async fn insert(&self, issue: NewIssue) -> Result<ObjectId, StoreError> {
        self.hit();
        self.inner.insert(issue).await
    }

    async fn fetch(&self, ids: &[ObjectId]) -> Result<Vec<Issue>, StoreError> {
        self.hit();
        self.inner.fetch(ids).await
    }

    async fn fetch_summaries(&self, ids: &[ObjectId]) -> Result<Vec<IssueSummary>, StoreError> {
        self.hit();
        self.inner.fetch_summaries(ids).await
    }

    async fn all(&self) -> Result<Vec<Issue>, StoreError> {
        self.hit();
        IssueStore::all(&self.inner).await
    }

    async fn all_summaries(&self) -> Result<Vec<IssueSummary>, StoreError> {
        self.hit();
        self.inner.all_summaries().await
    }
}

#[async_trait]
impl BugStore for CountingStore {
    async fn upsert_append(
        &self,
        signature: &str,
        issue_id: ObjectId,
    ) -> Result<Attachment, StoreError> {
        self.hit();
        self.inner.upsert_append(signature, issue_id).await
    }

    async fn get(&self, id: ObjectId) -> Result<Option<Bug>, StoreError> {
        self.hit();
        self.inner.get(id).await
    }

    async fn find_by_signature(&self, signature: &str) -> Result<Option<Bug>, StoreError> {
        self.hit();
        self.inner.find_by_signature(signature).await
    }

    async fn all(&self) -> Result<Vec<Bug>, StoreError> {
        self.hit();
        BugStore::all(&self.inner).await
    }
}
