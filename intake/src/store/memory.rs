use super::{Attachment, BugStore, IssueStore, StoreError};
use crate::types::{Bug, Issue, IssueSummary, NewIssue, ObjectId};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

#[derive(Default)]
struct IssueTable {
    by_id: HashMap<ObjectId, Issue>,
    order: Vec<ObjectId>,
}

#[derive(Default)]
struct BugTable {
    by_id: HashMap<ObjectId, Bug>,
    by_signature: HashMap<String, ObjectId>,
    order: Vec<ObjectId>,
    // issue id -> owning bug id
    owners: HashMap<ObjectId, ObjectId>,
}

/// Process-local store. Atomicity of the bug upsert comes from holding the
/// bug table lock for the whole find-or-create-and-append.
#[derive(Default)]
pub struct MemoryStore {
    issues: RwLock<IssueTable>,
    bugs: Mutex<BugTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn select<T>(&self, ids: &[ObjectId], project: impl Fn(&Issue) -> T) -> Vec<T> {
        let table = self.issues.read();
        ids.iter()
            .filter_map(|id| table.by_id.get(id))
            .map(project)
            .collect()
    }

    fn select_all<T>(&self, project: impl Fn(&Issue) -> T) -> Vec<T> {
        let table = self.issues.read();
        table
            .order
            .iter()
            .filter_map(|id| table.by_id.get(id))
            .map(project)
            .collect()
    }
}

#[async_trait]
impl IssueStore for MemoryStore {
    async fn insert(&self, issue: NewIssue) -> Result<ObjectId, StoreError> {
        let id = ObjectId::new();
        let mut table = self.issues.write();
        table.by_id.insert(id, Issue { id, fields: issue });
        table.order.push(id);
        Ok(id)
    }

    async fn fetch(&self, ids: &[ObjectId]) -> Result<Vec<Issue>, StoreError> {
        Ok(self.select(ids, Issue::clone))
    }

    async fn fetch_summaries(&self, ids: &[ObjectId]) -> Result<Vec<IssueSummary>, StoreError> {
        Ok(self.select(ids, |issue| IssueSummary::from(issue)))
    }

    async fn all(&self) -> Result<Vec<Issue>, StoreError> {
        Ok(self.select_all(Issue::clone))
    }

    async fn all_summaries(&self) -> Result<Vec<IssueSummary>, StoreError> {
        Ok(self.select_all(|issue| IssueSummary::from(issue)))
    }
}

#[async_trait]
impl BugStore for MemoryStore {
    async fn upsert_append(
        &self,
        signature: &str,
        issue_id: ObjectId,
    ) -> Result<Attachment, StoreError> {
        let mut guard = self.bugs.lock();
        let table = &mut *guard;

        if let Some(owner) = table.owners.get(&issue_id) {
            return Err(StoreError::Conflict(format!(
                "issue {issue_id} already belongs to bug {owner}"
            )));
        }

        let (bug_id, created) = match table.by_signature.get(signature).copied() {
            Some(bug_id) => (bug_id, false),
            None => {
                let bug_id = ObjectId::new();
                table.by_signature.insert(signature.to_owned(), bug_id);
                table.by_id.insert(
                    bug_id,
                    Bug {
                        id: bug_id,
                        signature: signature.to_owned(),
                        issues: Vec::new(),
                    },
                );
                table.order.push(bug_id);
                (bug_id, true)
            }
        };

        let bug = table.by_id.get_mut(&bug_id).ok_or_else(|| {
            StoreError::Corrupt(format!("signature index points at missing bug {bug_id}"))
        })?;
        bug.issues.push(issue_id);
        table.owners.insert(issue_id, bug_id);

        Ok(Attachment { bug_id, created })
    }

    async fn get(&self, id: ObjectId) -> Result<Option<Bug>, StoreError> {
        Ok(self.bugs.lock().by_id.get(&id).cloned())
    }

    async fn find_by_signature(&self, signature: &str) -> Result<Option<Bug>, StoreError> {
        let table = self.bugs.lock();
        Ok(table
            .by_signature
            .get(signature)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn all(&self) -> Result<Vec<Bug>, StoreError> {
        let table = self.bugs.lock();
        Ok(table
            .order
            .iter()
            .filter_map(|id| table.by_id.get(id))
            .cloned()
            .collect())
    }
}
