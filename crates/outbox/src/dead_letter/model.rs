use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DeadLetterError;

/// Lifecycle of a dead-letter message.
///
/// `PENDING` may move to `REPROCESSED` or `IGNORED`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeadLetterStatus {
    Pending,
    Reprocessed,
    Ignored,
}

impl DeadLetterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterStatus::Pending => "PENDING",
            DeadLetterStatus::Reprocessed => "REPROCESSED",
            DeadLetterStatus::Ignored => "IGNORED",
        }
    }
}

impl fmt::Display for DeadLetterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeadLetterStatus {
    type Err = DeadLetterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(DeadLetterStatus::Pending),
            "REPROCESSED" => Ok(DeadLetterStatus::Reprocessed),
            "IGNORED" => Ok(DeadLetterStatus::Ignored),
            _ => Err(DeadLetterError::UnknownStatus(s.to_string())),
        }
    }
}

/// A message whose automated delivery gave up.
///
/// Rows are never deleted; operator actions only move the status forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub id: i64,
    pub topic: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
    pub key: Option<String>,
    pub payload: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub failed_at: DateTime<Utc>,
    pub retry_count: i32,
    pub status: DeadLetterStatus,
    pub reprocessed_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

/// Fields captured when a delivery is given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeadLetter {
    pub topic: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
    pub key: Option<String>,
    pub payload: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub retry_count: i32,
}

/// Outcome of a manual reprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReprocessResult {
    pub id: i64,
    pub success: bool,
    pub message: String,
}

impl ReprocessResult {
    pub(crate) fn succeeded(id: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            success: true,
            message: message.into(),
        }
    }

    pub(crate) fn failed(id: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            DeadLetterStatus::Pending,
            DeadLetterStatus::Reprocessed,
            DeadLetterStatus::Ignored,
        ] {
            assert_eq!(status.as_str().parse::<DeadLetterStatus>().unwrap(), status);
        }
        assert_eq!(
            "pending".parse::<DeadLetterStatus>().unwrap(),
            DeadLetterStatus::Pending
        );
        assert!("DELETED".parse::<DeadLetterStatus>().is_err());
    }
}
