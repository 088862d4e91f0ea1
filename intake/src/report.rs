//! Wire form of an issue submission.
//!
//! Desktop clients in the field serialize every value as a string, send
//! screenshots as a JSON array and use a local date-time format. Decoding
//! accepts those shapes and still rejects values that cannot be interpreted.

use crate::types::NewIssue;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Epoch values at or above this are taken to be milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct IssueReport {
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default, deserialize_with = "timestamp")]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub os_name: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default, alias = "runtimeVersion")]
    pub java_version: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub args: Option<String>,
    #[serde(default)]
    pub prog_description: Option<String>,
    #[serde(default)]
    pub user_description: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub hist_undo_possible: bool,
    #[serde(default, deserialize_with = "flag")]
    pub hist_redo_possible: bool,
    #[serde(default, deserialize_with = "flag")]
    pub nav_backward_possible: bool,
    #[serde(default, deserialize_with = "flag")]
    pub nav_forward_possible: bool,
    #[serde(default, deserialize_with = "screenshots")]
    pub screenshot: Vec<String>,
    #[serde(default, deserialize_with = "text_or_json")]
    pub misc: Option<String>,
}

impl IssueReport {
    /// Parses a JSON request body.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Converts the report into a storable issue. Reports without a
    /// timestamp are stamped with `received_at`.
    pub fn into_new_issue(self, received_at: DateTime<Utc>) -> NewIssue {
        NewIssue {
            exception: self.exception,
            date_time: self.date_time.unwrap_or(received_at),
            os_name: self.os_name,
            os_version: self.os_version,
            java_version: self.java_version,
            args: self.args,
            prog_description: self.prog_description.unwrap_or_default(),
            user_description: self.user_description.unwrap_or_default(),
            hist_undo_possible: self.hist_undo_possible,
            hist_redo_possible: self.hist_redo_possible,
            nav_backward_possible: self.nav_backward_possible,
            nav_forward_possible: self.nav_forward_possible,
            screenshot: self.screenshot,
            misc: self.misc,
        }
    }
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            other => Err(D::Error::custom(format!("invalid boolean: {other:?}"))),
        },
        other => Err(D::Error::custom(format!("invalid boolean: {other}"))),
    }
}

fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Array(items) => {
            let parts = items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(D::Error::custom(format!(
                        "expected a list of strings, found {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(parts.join(" ")))
        }
        other => Err(D::Error::custom(format!(
            "expected a string or a list of strings, found {other}"
        ))),
    }
}

fn text_or_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Ok(Some(other.to_string())),
    }
}

fn screenshots<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    fn collect<E: serde::de::Error>(items: Vec<Value>) -> Result<Vec<String>, E> {
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if s.is_empty() => None,
                Value::String(s) => Some(Ok(s)),
                other => Some(Err(E::custom(format!(
                    "screenshot entries must be strings, found {other}"
                )))),
            })
            .collect()
    }

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => collect(items),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::String(s) if s.trim_start().starts_with('[') => {
            let items: Vec<Value> = serde_json::from_str(&s).map_err(D::Error::custom)?;
            collect(items)
        }
        Value::String(s) => Ok(vec![s]),
        other => Err(D::Error::custom(format!(
            "expected a screenshot string or list, found {other}"
        ))),
    }
}

fn timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => {
            let epoch = n
                .as_i64()
                .or_else(|| n.as_f64().and_then(float_epoch))
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {n}")))?;
            from_epoch(epoch)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {n}")))
        }
        Value::String(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("unrecognized timestamp: {s:?}"))),
        other => Err(D::Error::custom(format!("invalid timestamp: {other}"))),
    }
}

// Fractional seconds are truncated; values outside the i64 range are refused
// rather than saturated.
fn float_epoch(f: f64) -> Option<i64> {
    (f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

fn from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch.unsigned_abs() >= EPOCH_MILLIS_THRESHOLD.unsigned_abs() {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

/// Accepts RFC 3339, naive date-times (read as UTC), bare dates and
/// numeric epoch strings.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    s.parse::<i64>().ok().and_then(from_epoch)
}
