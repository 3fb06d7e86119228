//! Port abstraction for delivering health alerts.

use crate::domain::monitor::Alert;

use super::JournalError;

/// Destination for alerts raised by the health monitor.
#[cfg_attr(test, mockall::automock)]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert.
    fn deliver(&self, alert: &Alert) -> Result<(), JournalError>;

    /// Up to `limit` of the newest delivered alerts, oldest first.
    fn recent(&self, limit: usize) -> Result<Vec<Alert>, JournalError>;
}

/// Fixture implementation that drops alerts.
#[derive(Debug, Clone, Default)]
pub struct FixtureAlertSink;

impl AlertSink for FixtureAlertSink {
    fn deliver(&self, _alert: &Alert) -> Result<(), JournalError> {
        Ok(())
    }

    fn recent(&self, _limit: usize) -> Result<Vec<Alert>, JournalError> {
        Ok(Vec::new())
    }
}
