use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LOG_FILE_EXTENSION: &str = "log";

/// Compact metadata for one debug log, as returned by the listing query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Application", default)]
    pub application: String,
    #[serde(rename = "Operation", default)]
    pub operation: String,
    #[serde(rename = "StartTime", default)]
    pub start_time: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "LogUser", default)]
    pub log_user: Option<LogUser>,
    #[serde(rename = "LogLength", default, deserialize_with = "deserialize_length")]
    pub length: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogUser {
    #[serde(rename = "Name", default)]
    pub name: String,
}

impl LogSummary {
    pub fn user_name(&self) -> Option<&str> {
        self.log_user.as_ref().map(|user| user.name.as_str())
    }
}

/// The listing tool reports `LogLength` as a number; older CLIs quote it.
fn deserialize_length<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(serde::de::Error::custom(
            "expected string or number for LogLength",
        )),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListingShapeError {
    #[error("no records found in the result")]
    MissingRecords,
    #[error("record {index} is not a log summary: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

/// Pull `result.records` out of a listing document, preserving order.
pub fn extract_records(document: &Value) -> Result<Vec<LogSummary>, ListingShapeError> {
    let records = document
        .get("result")
        .and_then(|result| result.get("records"))
        .and_then(Value::as_array)
        .ok_or(ListingShapeError::MissingRecords)?;

    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            LogSummary::deserialize(record).map_err(|err| ListingShapeError::InvalidRecord {
                index,
                reason: err.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid log id {value:?}: only ASCII letters, digits, '_' and '-' are allowed")]
pub struct InvalidLogId {
    pub value: String,
}

/// A log identifier that is safe to put on a command line and in a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogId(String);

impl LogId {
    pub fn parse(raw: &str) -> Result<Self, InvalidLogId> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(InvalidLogId {
                value: raw.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of a detail-retrieval document: `result[0].log`.
pub fn extract_log_body(document: &Value) -> Option<&str> {
    document
        .get("result")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|first| first.get("log"))
        .and_then(Value::as_str)
}

/// Destination for a fetched log body. The same id always maps to the same file.
pub fn log_file_path(dir: &Path, id: &LogId) -> PathBuf {
    dir.join(format!("{}.{LOG_FILE_EXTENSION}", id.as_str()))
}
