//! Read-only projections over bugs and issues.

use crate::errors::{IntakeError, Result};
use crate::metrics_defs::QUERY_FAILED;
use crate::store::{BugStore, IssueStore, StoreError, Stores, with_timeout};
use crate::types::{Bug, BugProjection, BugView, IssueProjection, ObjectId, RecordKind};
use shared::counter;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Full,
    Summary,
}

#[derive(Clone)]
pub struct QueryService {
    issues: Arc<dyn IssueStore>,
    bugs: Arc<dyn BugStore>,
    store_timeout: Duration,
}

impl QueryService {
    pub fn new(stores: &Stores, store_timeout: Duration) -> Self {
        QueryService {
            issues: stores.issues.clone(),
            bugs: stores.bugs.clone(),
            store_timeout,
        }
    }

    pub async fn list_bugs(&self, view: View) -> Result<Vec<BugProjection>> {
        let bugs = self.call(RecordKind::Bug, self.bugs.all()).await?;
        let ids: Vec<ObjectId> = bugs.iter().flat_map(|b| b.issues.iter().copied()).collect();

        match view {
            View::Full => {
                let issues = self.call(RecordKind::Issue, self.issues.fetch(&ids)).await?;
                let mut by_id = index(issues, |i| i.id);
                Ok(bugs
                    .into_iter()
                    .map(|bug| BugProjection::Full(resolve(bug, &mut by_id)))
                    .collect())
            }
            View::Summary => {
                let issues = self
                    .call(RecordKind::Issue, self.issues.fetch_summaries(&ids))
                    .await?;
                let mut by_id = index(issues, |i| i.id);
                Ok(bugs
                    .into_iter()
                    .map(|bug| BugProjection::Summary(resolve(bug, &mut by_id)))
                    .collect())
            }
        }
    }

    /// Looks up one bug. `id` is validated before the store is touched.
    pub async fn get_bug(&self, id: &str, view: View) -> Result<BugProjection> {
        let id = ObjectId::parse(id)?;
        let bug = self
            .call(RecordKind::Bug, self.bugs.get(id))
            .await?
            .ok_or(IntakeError::NotFound {
                kind: RecordKind::Bug,
                id,
            })?;

        match view {
            View::Full => {
                let issues = self
                    .call(RecordKind::Issue, self.issues.fetch(&bug.issues))
                    .await?;
                Ok(BugProjection::Full(resolve(
                    bug,
                    &mut index(issues, |i| i.id),
                )))
            }
            View::Summary => {
                let issues = self
                    .call(RecordKind::Issue, self.issues.fetch_summaries(&bug.issues))
                    .await?;
                Ok(BugProjection::Summary(resolve(
                    bug,
                    &mut index(issues, |i| i.id),
                )))
            }
        }
    }

    pub async fn list_issues(&self, view: View) -> Result<Vec<IssueProjection>> {
        Ok(match view {
            View::Full => self
                .call(RecordKind::Issue, self.issues.all())
                .await?
                .into_iter()
                .map(IssueProjection::Full)
                .collect(),
            View::Summary => self
                .call(RecordKind::Issue, self.issues.all_summaries())
                .await?
                .into_iter()
                .map(IssueProjection::Summary)
                .collect(),
        })
    }

    /// Looks up one issue. `id` is validated before the store is touched.
    pub async fn get_issue(&self, id: &str, view: View) -> Result<IssueProjection> {
        let id = ObjectId::parse(id)?;
        let not_found = IntakeError::NotFound {
            kind: RecordKind::Issue,
            id,
        };

        match view {
            View::Full => {
                let issue = self
                    .call(RecordKind::Issue, self.issues.fetch(&[id]))
                    .await?
                    .pop()
                    .ok_or(not_found)?;
                Ok(IssueProjection::Full(issue))
            }
            View::Summary => {
                let summary = self
                    .call(RecordKind::Issue, self.issues.fetch_summaries(&[id]))
                    .await?
                    .pop()
                    .ok_or(not_found)?;
                Ok(IssueProjection::Summary(summary))
            }
        }
    }

    async fn call<T, F>(&self, kind: RecordKind, operation: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        with_timeout(self.store_timeout, operation)
            .await
            .map_err(|e| {
                counter!(QUERY_FAILED, "kind" => kind.to_string()).increment(1);
                tracing::error!(error = %e, %kind, "query failed");
                IntakeError::from(e)
            })
    }
}

fn index<T>(records: Vec<T>, key: impl Fn(&T) -> ObjectId) -> HashMap<ObjectId, T> {
    records.into_iter().map(|r| (key(&r), r)).collect()
}

/// Replaces the bug's issue identifiers with the matching records, keeping
/// the bug's order. Identifiers without a stored record are skipped.
fn resolve<T>(bug: Bug, records: &mut HashMap<ObjectId, T>) -> BugView<T> {
    let mut issues = Vec::with_capacity(bug.issues.len());
    for issue_id in &bug.issues {
        match records.remove(issue_id) {
            Some(record) => issues.push(record),
            None => {
                tracing::warn!(bug_id = %bug.id, %issue_id, "bug references a missing issue");
            }
        }
    }
    BugView {
        id: bug.id,
        signature: bug.signature,
        issues,
    }
}
