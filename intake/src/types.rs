use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-process random bytes mixed into every generated identifier.
static PROCESS_UNIQUE: LazyLock<[u8; 5]> = LazyLock::new(|| {
    let random = uuid::Uuid::new_v4();
    let mut bytes = [0u8; 5];
    bytes.copy_from_slice(&random.as_bytes()[..5]);
    bytes
});

static COUNTER: LazyLock<AtomicU32> = LazyLock::new(|| {
    let random = uuid::Uuid::new_v4();
    let b = random.as_bytes();
    AtomicU32::new(u32::from_be_bytes([0, b[0], b[1], b[2]]))
});

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier must be {expected} characters, got {0}", expected = ObjectId::LEN)]
    Length(usize),
    #[error("identifier is not hexadecimal")]
    NotHex,
}

/// 12-byte record identifier, rendered as 24 hex characters.
///
/// Layout: 4-byte big-endian unix seconds, 5 per-process random bytes and a
/// 3-byte big-endian counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Length of the textual form.
    pub const LEN: usize = 24;

    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        let count = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        ObjectId(bytes)
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.len() != Self::LEN {
            return Err(IdError::Length(s.len()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| IdError::NotHex)?;
        Ok(ObjectId(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A validated issue report that has not been stored yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIssue {
    pub exception: Option<String>,
    pub date_time: DateTime<Utc>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub java_version: Option<String>,
    pub args: Option<String>,
    pub prog_description: String,
    pub user_description: String,
    pub hist_undo_possible: bool,
    pub hist_redo_possible: bool,
    pub nav_backward_possible: bool,
    pub nav_forward_possible: bool,
    /// Encoded screenshots, usually `data:image/png;base64,...` URIs.
    pub screenshot: Vec<String>,
    pub misc: Option<String>,
}

/// A stored issue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: ObjectId,
    #[serde(flatten)]
    pub fields: NewIssue,
}

/// Reduced projection of an issue without environment and diagnostic detail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummary {
    pub id: ObjectId,
    pub date_time: DateTime<Utc>,
    pub prog_description: String,
    pub user_description: String,
    pub hist_undo_possible: bool,
    pub hist_redo_possible: bool,
    pub nav_backward_possible: bool,
    pub nav_forward_possible: bool,
}

impl From<&Issue> for IssueSummary {
    fn from(issue: &Issue) -> Self {
        let f = &issue.fields;
        IssueSummary {
            id: issue.id,
            date_time: f.date_time,
            prog_description: f.prog_description.clone(),
            user_description: f.user_description.clone(),
            hist_undo_possible: f.hist_undo_possible,
            hist_redo_possible: f.hist_redo_possible,
            nav_backward_possible: f.nav_backward_possible,
            nav_forward_possible: f.nav_forward_possible,
        }
    }
}

/// Aggregate of every issue sharing one exception signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bug {
    pub id: ObjectId,
    pub signature: String,
    /// Issue identifiers in submission order.
    pub issues: Vec<ObjectId>,
}

/// A bug with its issue identifiers resolved to records of type `T`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BugView<T> {
    pub id: ObjectId,
    pub signature: String,
    pub issues: Vec<T>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BugProjection {
    Full(BugView<Issue>),
    Summary(BugView<IssueSummary>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IssueProjection {
    Full(Issue),
    Summary(IssueSummary),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Bug,
    Issue,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Bug => f.write_str("bug"),
            RecordKind::Issue => f.write_str("issue"),
        }
    }
}
