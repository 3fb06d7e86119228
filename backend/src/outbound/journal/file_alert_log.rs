//! Alert log stored as JSON lines.

use std::path::Path;

use tracing::warn;

use crate::domain::monitor::Alert;
use crate::domain::ports::{AlertSink, JournalError};

use super::jsonl_log::JsonLinesLog;

/// [`AlertSink`] that records alerts to a bounded file and mirrors each one
/// to the log at warn level.
pub struct FileAlertLog {
    log: JsonLinesLog<Alert>,
}

impl FileAlertLog {
    /// Open (or create) `file_name` in `dir`, retaining at most
    /// `max_entries` alerts.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] when the directory cannot be created or
    /// opened.
    pub fn open(dir: &Path, file_name: &str, max_entries: usize) -> Result<Self, JournalError> {
        Ok(Self {
            log: JsonLinesLog::open(dir, file_name, max_entries)?,
        })
    }
}

impl AlertSink for FileAlertLog {
    fn deliver(&self, alert: &Alert) -> Result<(), JournalError> {
        warn!(
            conditions = ?alert.conditions,
            consecutive_failures = alert.consecutive_failures,
            response_time_ms = alert.response_time_ms,
            "database health alert"
        );
        self.log.append(alert)
    }

    fn recent(&self, limit: usize) -> Result<Vec<Alert>, JournalError> {
        self.log.recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::health::HealthStatus;

    #[rstest]
    fn delivered_alerts_can_be_read_back() {
        let dir = TempDir::new().expect("tempdir");
        let sink = FileAlertLog::open(dir.path(), "alerts.jsonl", 100).expect("open");
        let alert = Alert {
            timestamp: Utc
                .with_ymd_and_hms(2026, 4, 2, 12, 0, 0)
                .single()
                .expect("valid timestamp"),
            conditions: vec!["3 consecutive failed checks".to_owned()],
            status: HealthStatus::Unhealthy,
            response_time_ms: 12,
            consecutive_failures: 3,
            error: Some("connection refused".to_owned()),
        };
        sink.deliver(&alert).expect("deliver");
        assert_eq!(sink.recent(10).expect("recent"), vec![alert]);
    }
}
