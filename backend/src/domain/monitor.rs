//! Periodic database health monitoring with alerting.
//!
//! [`HealthMonitor`] owns its background task: [`HealthMonitor::start`]
//! spawns a loop that probes the store on a fixed interval and
//! [`HealthMonitor::stop`] signals it and waits for it to finish. Probes can
//! also be driven by hand through [`HealthMonitor::check_once`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::domain::health::{DatabaseHealth, HealthReport, HealthStatus};
use crate::domain::ports::AlertSink;
use crate::domain::request::serde_compat;

/// Samples kept in the monitor's history.
pub const HISTORY_LIMIT: usize = 1000;

/// Checks included in [`HealthMonitor::summary`].
pub const SUMMARY_WINDOW: usize = 10;

/// Thresholds and timing for the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Time between probes.
    pub interval: Duration,
    /// Responses slower than this raise an alert.
    pub max_response_ms: u64,
    /// Consecutive failures that raise an alert.
    pub max_failed_checks: u32,
    /// Minimum gap between two alerts.
    pub alert_cooldown: TimeDelta,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_response_ms: 5000,
            max_failed_checks: 3,
            alert_cooldown: TimeDelta::minutes(15),
        }
    }
}

/// A raised alert and the probe that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// When the alert was raised.
    #[serde(with = "serde_compat::timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Human-readable alert reasons.
    pub conditions: Vec<String>,
    /// Status of the triggering probe.
    pub status: HealthStatus,
    /// Response time of the triggering probe.
    pub response_time_ms: u64,
    /// Failures in a row at the time of the alert.
    pub consecutive_failures: u32,
    /// Probe error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lifecycle errors for [`HealthMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    /// `start` was called on a running monitor.
    #[error("health monitor is already running")]
    AlreadyRunning,
    /// `stop` was called on an idle monitor.
    #[error("health monitor is not running")]
    NotRunning,
}

/// Recent monitor behaviour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSummary {
    /// `None` until the first check has run.
    pub status: Option<HealthStatus>,
    /// When the latest check ran.
    #[serde(with = "serde_compat::optional_timestamp")]
    pub last_check: Option<DateTime<Utc>>,
    /// Response time of the latest check.
    pub response_time_ms: Option<u64>,
    /// Healthy share of the recent window.
    pub success_rate_percent: f64,
    /// Mean response time over the recent window.
    pub avg_response_time_ms: f64,
    /// Failures in a row up to now.
    pub consecutive_failures: u32,
    /// Checks held in the history.
    pub total_checks: usize,
    /// Whether the background task is running.
    pub monitoring_active: bool,
}

/// Conditions in `report` that warrant an alert, ignoring cooldown.
#[must_use]
pub fn alert_conditions(
    report: &HealthReport,
    consecutive_failures: u32,
    settings: &MonitorSettings,
) -> Vec<String> {
    let mut conditions = Vec::new();
    if report.response_time_ms > settings.max_response_ms {
        conditions.push(format!(
            "high response time: {}ms > {}ms",
            report.response_time_ms, settings.max_response_ms
        ));
    }
    if consecutive_failures >= settings.max_failed_checks {
        conditions.push(format!(
            "consecutive failures: {consecutive_failures} >= {}",
            settings.max_failed_checks
        ));
    }
    if !report.is_healthy() {
        conditions.push(format!(
            "database connectivity failed: {}",
            report.error.as_deref().unwrap_or("unknown failure")
        ));
    }
    conditions
}

#[derive(Debug, Default)]
struct MonitorState {
    history: VecDeque<HealthReport>,
    consecutive_failures: u32,
    last_alert: Option<DateTime<Utc>>,
}

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    health: DatabaseHealth,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    state: Mutex<MonitorState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn check_once(&self) -> HealthReport {
        let report = self.health.check().await;
        let alert = {
            let mut state = self.state();
            if report.is_healthy() {
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            }
            state.history.push_back(report.clone());
            while state.history.len() > HISTORY_LIMIT {
                state.history.pop_front();
            }
            self.evaluate(&mut state, &report)
        };

        if let Some(alert) = alert {
            error!(conditions = ?alert.conditions, "database alert triggered");
            if let Err(err) = self.alerts.deliver(&alert) {
                warn!(error = %err, "alert delivery failed");
            }
        }
        info!(
            status = ?report.status,
            response_time_ms = report.response_time_ms,
            "database check"
        );
        report
    }

    fn evaluate(&self, state: &mut MonitorState, report: &HealthReport) -> Option<Alert> {
        let conditions = alert_conditions(report, state.consecutive_failures, &self.settings);
        if conditions.is_empty() {
            return None;
        }
        let now = self.clock.utc();
        if let Some(last) = state.last_alert {
            let cooldown_end = last + self.settings.alert_cooldown;
            if now < cooldown_end {
                debug!(%cooldown_end, "alert suppressed during cooldown");
                return None;
            }
        }
        state.last_alert = Some(now);
        Some(Alert {
            timestamp: now,
            conditions,
            status: report.status,
            response_time_ms: report.response_time_ms,
            consecutive_failures: state.consecutive_failures,
            error: report.error.clone(),
        })
    }
}

/// Lifecycle-owned periodic health monitor.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<Inner>,
    running: Arc<Mutex<Option<Running>>>,
}

impl HealthMonitor {
    /// Create a stopped monitor.
    #[must_use]
    pub fn new(
        health: DatabaseHealth,
        alerts: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                health,
                alerts,
                clock,
                settings,
                state: Mutex::default(),
            }),
            running: Arc::new(Mutex::new(None)),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one probe, record it and raise an alert if warranted.
    pub async fn check_once(&self) -> HealthReport {
        self.inner.check_once().await
    }

    /// Spawn the monitoring loop on the current runtime.
    ///
    /// # Errors
    ///
    /// [`MonitorError::AlreadyRunning`] if the loop is active.
    pub fn start(&self) -> Result<(), MonitorError> {
        let mut running = self.running();
        if running.is_some() {
            warn!("health monitor already running");
            return Err(MonitorError::AlreadyRunning);
        }
        let (stop, mut stopped) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(inner.settings.interval);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        inner.check_once().await;
                    }
                }
            }
            info!("health monitor loop stopped");
        });
        *running = Some(Running { stop, task });
        info!(interval = ?self.inner.settings.interval, "health monitor started");
        Ok(())
    }

    /// Signal the loop to stop and wait for it.
    ///
    /// # Errors
    ///
    /// [`MonitorError::NotRunning`] if the loop is not active.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let Some(Running { stop, task }) = self.running().take() else {
            warn!("health monitor not running");
            return Err(MonitorError::NotRunning);
        };
        if stop.send(()).is_err() {
            debug!("health monitor loop already finished");
        }
        if let Err(err) = task.await {
            error!(error = %err, "health monitor task ended abnormally");
        }
        info!("health monitor stopped");
        Ok(())
    }

    /// Whether the loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Latest status with success rate and latency over the last
    /// [`SUMMARY_WINDOW`] checks.
    #[expect(
        clippy::float_arithmetic,
        clippy::cast_precision_loss,
        reason = "rates are reported as rounded percentages"
    )]
    #[must_use]
    pub fn summary(&self) -> MonitorSummary {
        let state = self.inner.state();
        let recent: Vec<&HealthReport> = state.history.iter().rev().take(SUMMARY_WINDOW).collect();
        let latest = state.history.back();
        let successes: Vec<u64> = recent
            .iter()
            .filter(|report| report.is_healthy())
            .map(|report| report.response_time_ms)
            .collect();

        let success_rate_percent = if recent.is_empty() {
            0.0
        } else {
            round_to(successes.len() as f64 / recent.len() as f64 * 100.0, 1)
        };
        let avg_response_time_ms = if successes.is_empty() {
            0.0
        } else {
            round_to(
                successes.iter().sum::<u64>() as f64 / successes.len() as f64,
                2,
            )
        };

        MonitorSummary {
            status: latest.map(|report| report.status),
            last_check: latest.map(|report| report.checked_at),
            response_time_ms: latest.map(|report| report.response_time_ms),
            success_rate_percent,
            avg_response_time_ms,
            consecutive_failures: state.consecutive_failures,
            total_checks: state.history.len(),
            monitoring_active: self.is_running(),
        }
    }
}

#[expect(clippy::float_arithmetic, reason = "decimal rounding")]
fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10_f64.powi(places);
    (value * scale).round() / scale
}
