use super::{Attachment, BugStore, IssueStore, StoreError};
use crate::types::{Bug, Issue, IssueSummary, NewIssue, ObjectId};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS issues (
        id TEXT PRIMARY KEY NOT NULL,
        exception TEXT,
        date_time TEXT NOT NULL,
        os_name TEXT,
        os_version TEXT,
        java_version TEXT,
        args TEXT,
        prog_description TEXT NOT NULL,
        user_description TEXT NOT NULL,
        hist_undo_possible INTEGER NOT NULL,
        hist_redo_possible INTEGER NOT NULL,
        nav_backward_possible INTEGER NOT NULL,
        nav_forward_possible INTEGER NOT NULL,
        screenshot TEXT NOT NULL,
        misc TEXT
    )",
    "CREATE TABLE IF NOT EXISTS bugs (
        id TEXT PRIMARY KEY NOT NULL,
        signature TEXT NOT NULL UNIQUE
    )",
    // An issue belongs to at most one bug; positions keep submission order.
    "CREATE TABLE IF NOT EXISTS bug_issues (
        issue_id TEXT PRIMARY KEY NOT NULL REFERENCES issues(id),
        bug_id TEXT NOT NULL REFERENCES bugs(id),
        position INTEGER NOT NULL,
        UNIQUE (bug_id, position)
    )",
];

const ISSUE_COLUMNS: &str = "id, exception, date_time, os_name, os_version, java_version, args, \
    prog_description, user_description, hist_undo_possible, hist_redo_possible, \
    nav_backward_possible, nav_forward_possible, screenshot, misc";

const SUMMARY_COLUMNS: &str = "id, date_time, prog_description, user_description, \
    hist_undo_possible, hist_redo_possible, nav_backward_possible, nav_forward_possible";

const BUG_SELECT: &str = "SELECT b.id AS bug_id, b.signature AS signature, bi.issue_id AS issue_id \
    FROM bugs b LEFT JOIN bug_issues bi ON bi.bug_id = b.id";

// Stays well below SQLite's host parameter limit.
const MAX_BIND_PARAMS: usize = 500;

/// SQLite-backed store. Several processes may share one database file; the
/// `UNIQUE` signature column and the upsert transaction keep bugs unique
/// across all of them.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(
        url: &str,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = SqliteStore { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn select_issues<T: Clone>(
        &self,
        columns: &str,
        ids: &[ObjectId],
        decode: fn(&SqliteRow) -> Result<T, StoreError>,
        id_of: fn(&T) -> ObjectId,
    ) -> Result<Vec<T>, StoreError> {
        let mut found = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_BIND_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT {columns} FROM issues WHERE id IN ({placeholders})");
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.to_hex());
            }
            for row in query.fetch_all(&self.pool).await? {
                let record = decode(&row)?;
                found.insert(id_of(&record), record);
            }
        }

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    async fn select_all_issues<T>(
        &self,
        columns: &str,
        decode: fn(&SqliteRow) -> Result<T, StoreError>,
    ) -> Result<Vec<T>, StoreError> {
        let sql = format!("SELECT {columns} FROM issues ORDER BY rowid");
        sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    async fn select_bugs(&self, filter: &str, value: Option<&str>) -> Result<Vec<Bug>, StoreError> {
        let sql = format!("{BUG_SELECT} {filter} ORDER BY b.rowid, bi.position");
        let mut query = sqlx::query(&sql);
        if let Some(value) = value {
            query = query.bind(value.to_owned());
        }
        let rows = query.fetch_all(&self.pool).await?;
        fold_bug_rows(&rows)
    }
}

fn parse_id(raw: &str) -> Result<ObjectId, StoreError> {
    ObjectId::parse(raw).map_err(|e| StoreError::Corrupt(format!("identifier {raw:?}: {e}")))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

fn format_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn issue_from_row(row: &SqliteRow) -> Result<Issue, StoreError> {
    let id: String = row.try_get("id")?;
    let date_time: String = row.try_get("date_time")?;
    let screenshot: String = row.try_get("screenshot")?;
    let screenshot = serde_json::from_str(&screenshot)
        .map_err(|e| StoreError::Corrupt(format!("screenshot of issue {id}: {e}")))?;

    Ok(Issue {
        id: parse_id(&id)?,
        fields: NewIssue {
            exception: row.try_get("exception")?,
            date_time: parse_time(&date_time)?,
            os_name: row.try_get("os_name")?,
            os_version: row.try_get("os_version")?,
            java_version: row.try_get("java_version")?,
            args: row.try_get("args")?,
            prog_description: row.try_get("prog_description")?,
            user_description: row.try_get("user_description")?,
            hist_undo_possible: row.try_get("hist_undo_possible")?,
            hist_redo_possible: row.try_get("hist_redo_possible")?,
            nav_backward_possible: row.try_get("nav_backward_possible")?,
            nav_forward_possible: row.try_get("nav_forward_possible")?,
            screenshot,
            misc: row.try_get("misc")?,
        },
    })
}

fn summary_from_row(row: &SqliteRow) -> Result<IssueSummary, StoreError> {
    let id: String = row.try_get("id")?;
    let date_time: String = row.try_get("date_time")?;

    Ok(IssueSummary {
        id: parse_id(&id)?,
        date_time: parse_time(&date_time)?,
        prog_description: row.try_get("prog_description")?,
        user_description: row.try_get("user_description")?,
        hist_undo_possible: row.try_get("hist_undo_possible")?,
        hist_redo_possible: row.try_get("hist_redo_possible")?,
        nav_backward_possible: row.try_get("nav_backward_possible")?,
        nav_forward_possible: row.try_get("nav_forward_possible")?,
    })
}

/// Groups joined bug rows, already ordered by bug then position, into bugs.
fn fold_bug_rows(rows: &[SqliteRow]) -> Result<Vec<Bug>, StoreError> {
    let mut bugs: Vec<Bug> = Vec::new();

    for row in rows {
        let bug_id = parse_id(&row.try_get::<String, _>("bug_id")?)?;
        let issue_id: Option<String> = row.try_get("issue_id")?;

        if bugs.last().is_none_or(|bug| bug.id != bug_id) {
            bugs.push(Bug {
                id: bug_id,
                signature: row.try_get("signature")?,
                issues: Vec::new(),
            });
        }
        if let (Some(bug), Some(issue_id)) = (bugs.last_mut(), issue_id) {
            bug.issues.push(parse_id(&issue_id)?);
        }
    }

    Ok(bugs)
}

fn conflict_or_sqlx(err: sqlx::Error, issue_id: ObjectId) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("issue {issue_id} is already attached to a bug"))
        }
        _ => StoreError::Sqlx(err),
    }
}

#[async_trait]
impl IssueStore for SqliteStore {
    async fn insert(&self, issue: NewIssue) -> Result<ObjectId, StoreError> {
        let id = ObjectId::new();
        let screenshot = serde_json::to_string(&issue.screenshot)
            .map_err(|e| StoreError::Corrupt(format!("screenshot encoding: {e}")))?;

        let sql = format!(
            "INSERT INTO issues ({ISSUE_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(id.to_hex())
            .bind(issue.exception)
            .bind(format_time(&issue.date_time))
            .bind(issue.os_name)
            .bind(issue.os_version)
            .bind(issue.java_version)
            .bind(issue.args)
            .bind(issue.prog_description)
            .bind(issue.user_description)
            .bind(issue.hist_undo_possible)
            .bind(issue.hist_redo_possible)
            .bind(issue.nav_backward_possible)
            .bind(issue.nav_forward_possible)
            .bind(screenshot)
            .bind(issue.misc)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn fetch(&self, ids: &[ObjectId]) -> Result<Vec<Issue>, StoreError> {
        self.select_issues(ISSUE_COLUMNS, ids, issue_from_row, |issue| issue.id)
            .await
    }

    async fn fetch_summaries(&self, ids: &[ObjectId]) -> Result<Vec<IssueSummary>, StoreError> {
        self.select_issues(SUMMARY_COLUMNS, ids, summary_from_row, |summary| summary.id)
            .await
    }

    async fn all(&self) -> Result<Vec<Issue>, StoreError> {
        self.select_all_issues(ISSUE_COLUMNS, issue_from_row).await
    }

    async fn all_summaries(&self) -> Result<Vec<IssueSummary>, StoreError> {
        self.select_all_issues(SUMMARY_COLUMNS, summary_from_row)
            .await
    }
}

#[async_trait]
impl BugStore for SqliteStore {
    async fn upsert_append(
        &self,
        signature: &str,
        issue_id: ObjectId,
    ) -> Result<Attachment, StoreError> {
        // The first statement writes, so the transaction takes the write lock
        // before anything is read and concurrent upserts serialize on it.
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO bugs (id, signature) VALUES (?, ?) ON CONFLICT(signature) DO NOTHING",
        )
        .bind(ObjectId::new().to_hex())
        .bind(signature.to_owned())
        .execute(&mut *tx)
        .await?;
        let created = inserted.rows_affected() == 1;

        let bug_id: String = sqlx::query_scalar("SELECT id FROM bugs WHERE signature = ?")
            .bind(signature.to_owned())
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO bug_issues (issue_id, bug_id, position) VALUES (?, ?, \
             (SELECT COALESCE(MAX(position) + 1, 0) FROM bug_issues WHERE bug_id = ?))",
        )
        .bind(issue_id.to_hex())
        .bind(bug_id.clone())
        .bind(bug_id.clone())
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or_sqlx(e, issue_id))?;

        tx.commit().await?;

        Ok(Attachment {
            bug_id: parse_id(&bug_id)?,
            created,
        })
    }

    async fn get(&self, id: ObjectId) -> Result<Option<Bug>, StoreError> {
        let bugs = self
            .select_bugs("WHERE b.id = ?", Some(&id.to_hex()))
            .await?;
        Ok(bugs.into_iter().next())
    }

    async fn find_by_signature(&self, signature: &str) -> Result<Option<Bug>, StoreError> {
        let bugs = self
            .select_bugs("WHERE b.signature = ?", Some(signature))
            .await?;
        Ok(bugs.into_iter().next())
    }

    async fn all(&self) -> Result<Vec<Bug>, StoreError> {
        self.select_bugs("", None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::sample_issue;
    use std::sync::Arc;

    async fn open(dir: &tempfile::TempDir) -> SqliteStore {
        let url = format!("sqlite://{}", dir.path().join("bugdesk.db").display());
        SqliteStore::connect(&url, 8, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_issue_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let mut fields = sample_issue(Some("java.lang.IllegalStateException"));
        fields.screenshot = vec!["data:image/png;base64,AAAA".into()];
        fields.misc = None;
        let id = store.insert(fields.clone()).await.unwrap();

        let fetched = store.fetch(&[id]).await.unwrap();
        assert_eq!(fetched, vec![Issue { id, fields }]);

        let summaries = store.fetch_summaries(&[id]).await.unwrap();
        assert_eq!(summaries, vec![IssueSummary::from(&fetched[0])]);
    }

    #[tokio::test]
    async fn test_fetch_keeps_requested_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.insert(sample_issue(Some(&format!("e{i}")))).await.unwrap());
        }
        let mut requested = ids.clone();
        requested.reverse();
        requested.insert(2, ObjectId::new());

        let fetched: Vec<ObjectId> = store
            .fetch(&requested)
            .await
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(fetched, expected);

        let all: Vec<ObjectId> = IssueStore::all(&store)
            .await
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(all, ids);
        assert_eq!(store.all_summaries().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_upsert_creates_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let first = store.insert(sample_issue(Some("boom"))).await.unwrap();
        let second = store.insert(sample_issue(Some("boom"))).await.unwrap();
        let other = store.insert(sample_issue(None)).await.unwrap();

        let a = store.upsert_append("sig-a", first).await.unwrap();
        let b = store.upsert_append("sig-a", second).await.unwrap();
        let c = store.upsert_append("sig-b", other).await.unwrap();
        assert!(a.created);
        assert!(!b.created);
        assert!(c.created);
        assert_eq!(a.bug_id, b.bug_id);

        let bug = store.get(a.bug_id).await.unwrap().unwrap();
        assert_eq!(bug.signature, "sig-a");
        assert_eq!(bug.issues, vec![first, second]);
        assert_eq!(
            store.find_by_signature("sig-b").await.unwrap().unwrap().issues,
            vec![other]
        );
        assert_eq!(store.get(ObjectId::new()).await.unwrap(), None);

        let signatures: Vec<String> = BugStore::all(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|bug| bug.signature)
            .collect();
        assert_eq!(signatures, vec!["sig-a", "sig-b"]);
    }

    #[tokio::test]
    async fn test_issue_attaches_to_one_bug_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let issue = store.insert(sample_issue(Some("x"))).await.unwrap();
        store.upsert_append("one", issue).await.unwrap();
        assert!(matches!(
            store.upsert_append("two", issue).await,
            Err(StoreError::Conflict(_))
        ));
        // The failed upsert rolled back, so no bug exists for "two".
        assert_eq!(store.find_by_signature("two").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_across_pools() {
        // Two pools on one file stand in for two server processes.
        let dir = tempfile::tempdir().unwrap();
        let stores = [Arc::new(open(&dir).await), Arc::new(open(&dir).await)];

        let mut issue_ids = Vec::new();
        for _ in 0..32 {
            issue_ids.push(stores[0].insert(sample_issue(Some("race"))).await.unwrap());
        }

        let handles: Vec<_> = issue_ids
            .iter()
            .enumerate()
            .map(|(i, issue_id)| {
                let store = stores[i % 2].clone();
                let issue_id = *issue_id;
                tokio::spawn(async move { store.upsert_append("race", issue_id).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().created {
                created += 1;
            }
        }
        assert_eq!(created, 1);

        let bugs = BugStore::all(stores[1].as_ref()).await.unwrap();
        assert_eq!(bugs.len(), 1);
        let mut attached = bugs[0].issues.clone();
        attached.sort();
        issue_ids.sort();
        assert_eq!(attached, issue_ids);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let issue = {
            let store = open(&dir).await;
            let issue = store.insert(sample_issue(None)).await.unwrap();
            store.upsert_append("persisted", issue).await.unwrap();
            issue
        };

        let store = open(&dir).await;
        let bug = store.find_by_signature("persisted").await.unwrap().unwrap();
        assert_eq!(bug.issues, vec![issue]);
        assert_eq!(store.fetch(&[issue]).await.unwrap().len(), 1);
    }
}
