use crate::errors::{IntakeError, Result};
use crate::metrics_defs::{
    BUGS_CREATED, ISSUES_SUBMITTED, SUBMIT_DURATION, SUBMIT_FAILED, SUBMIT_PARTIAL_FAILURE,
};
use crate::signature::SignatureHasher;
use crate::store::{BugStore, IssueStore, StoreError, Stores, with_timeout};
use crate::types::{NewIssue, ObjectId};
use serde::Serialize;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a submitted issue ended up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub issue_id: ObjectId,
    pub bug_id: ObjectId,
    pub signature: String,
    /// Whether this submission created the bug.
    pub new_bug: bool,
}

/// Stores incoming issues and attaches each one to the bug for its
/// exception signature.
///
/// The issue is always written first. A bug therefore never references an
/// issue that failed to persist; the reverse failure leaves an orphan issue,
/// which is logged and reported as [`IntakeError::PartialFailure`].
#[derive(Clone)]
pub struct Deduplicator {
    issues: Arc<dyn IssueStore>,
    bugs: Arc<dyn BugStore>,
    hasher: Arc<dyn SignatureHasher>,
    store_timeout: Duration,
}

impl Deduplicator {
    pub fn new(stores: &Stores, hasher: Arc<dyn SignatureHasher>, store_timeout: Duration) -> Self {
        Deduplicator {
            issues: stores.issues.clone(),
            bugs: stores.bugs.clone(),
            hasher,
            store_timeout,
        }
    }

    pub async fn submit(&self, issue: NewIssue) -> Result<Submission> {
        let started = Instant::now();
        let signature = self.hasher.signature(issue.exception.as_deref());

        let issue_id = with_timeout(self.store_timeout, self.issues.insert(issue))
            .await
            .inspect_err(|e| {
                counter!(SUBMIT_FAILED).increment(1);
                tracing::error!(error = %e, signature = %signature, "failed to store issue");
            })?;

        let attachment =
            match with_timeout(self.store_timeout, self.bugs.upsert_append(&signature, issue_id))
                .await
            {
                Ok(attachment) => attachment,
                Err(source) => {
                    counter!(SUBMIT_PARTIAL_FAILURE).increment(1);
                    if matches!(source, StoreError::Timeout(_)) {
                        // The upsert may still have committed after the deadline.
                        tracing::error!(
                            issue_id = %issue_id,
                            signature = %signature,
                            error = %source,
                            "issue stored but attaching it timed out; attachment outcome unknown"
                        );
                    } else {
                        tracing::error!(
                            issue_id = %issue_id,
                            signature = %signature,
                            error = %source,
                            "issue stored but not attached to a bug; issue is orphaned"
                        );
                    }
                    return Err(IntakeError::PartialFailure {
                        issue_id,
                        signature,
                        source,
                    });
                }
            };

        counter!(ISSUES_SUBMITTED).increment(1);
        if attachment.created {
            counter!(BUGS_CREATED).increment(1);
        }
        histogram!(SUBMIT_DURATION).record(started.elapsed().as_secs_f64());

        tracing::info!(
            issue_id = %issue_id,
            bug_id = %attachment.bug_id,
            new_bug = attachment.created,
            "issue submitted"
        );

        Ok(Submission {
            issue_id,
            bug_id: attachment.bug_id,
            signature,
            new_bug: attachment.created,
        })
    }
}
