//! Retention settings loaded via OrthoConfig.
//!
//! Every field is optional; the accessors supply the defaults. Values come
//! from `RETENTION_*` environment variables or a configuration file.

use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::RetentionOptions;
use crate::domain::business_validation::BusinessRules;
use crate::domain::monitor::MonitorSettings;
use crate::domain::snapshot::MIN_RETAINED_SNAPSHOTS;

const DEFAULT_AUDIT_LOG_FILE: &str = "data_audit_log.jsonl";
const DEFAULT_AUDIT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_OPERATIONS_LOG_FILE: &str = "backup_operations_log.jsonl";
const DEFAULT_OPERATIONS_MAX_ENTRIES: usize = 1_000;
const DEFAULT_SNAPSHOT_DIR: &str = "backups";
const DEFAULT_SNAPSHOT_RETENTION: usize = 50;
const DEFAULT_MONTHS_BEFORE_ARCHIVE: u32 = 4;
const DEFAULT_ALERT_LOG_FILE: &str = "database_alerts.jsonl";
const DEFAULT_ALERT_MAX_ENTRIES: usize = 100;

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Configuration for the retention services and the admin binary.
#[derive(Debug, Clone, Default, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "RETENTION")]
pub struct RetentionSettings {
    /// PostgreSQL connection string. Falls back to `DATABASE_URL`.
    pub database_url: Option<String>,
    /// Directory holding the journals.
    pub data_dir: Option<PathBuf>,
    /// Audit log file name inside the data directory.
    pub audit_log_file: Option<String>,
    /// Audit entries retained.
    pub audit_max_entries: Option<usize>,
    /// Operations journal file name inside the data directory.
    pub operations_log_file: Option<String>,
    /// Operations journal records retained.
    pub operations_max_entries: Option<usize>,
    /// Snapshot directory, relative to the data directory unless absolute.
    pub snapshot_dir: Option<PathBuf>,
    /// Snapshots kept by `snapshots --prune`.
    pub snapshot_retention: Option<usize>,
    /// Age in months after which dispatched requests are archived.
    pub months_before_archive: Option<u32>,
    /// Seconds between health probes.
    pub monitor_interval_seconds: Option<u64>,
    /// Probe latency above which an alert is raised.
    pub monitor_max_response_ms: Option<u64>,
    /// Consecutive failed probes that raise an alert.
    pub monitor_max_failed_checks: Option<u32>,
    /// Minimum minutes between alerts.
    pub monitor_alert_cooldown_minutes: Option<i64>,
    /// Alert log file name inside the data directory.
    pub alert_log_file: Option<String>,
    /// Alerts retained.
    pub alert_max_entries: Option<usize>,
    /// Comma-separated company names that mark test data.
    pub known_test_companies: Option<String>,
    /// Comma-separated company names expected in production data.
    pub reference_companies: Option<String>,
}

impl RetentionSettings {
    /// Configured database URL, or `DATABASE_URL` from the environment.
    #[must_use]
    pub fn database_url(&self) -> Option<String> {
        self.database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .filter(|url| !url.trim().is_empty())
    }

    /// Journal directory, defaulting to the working directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Audit log file name.
    #[must_use]
    pub fn audit_log_file(&self) -> &str {
        self.audit_log_file
            .as_deref()
            .unwrap_or(DEFAULT_AUDIT_LOG_FILE)
    }

    /// Audit entries retained.
    #[must_use]
    pub fn audit_max_entries(&self) -> usize {
        self.audit_max_entries.unwrap_or(DEFAULT_AUDIT_MAX_ENTRIES)
    }

    /// Operations journal file name.
    #[must_use]
    pub fn operations_log_file(&self) -> &str {
        self.operations_log_file
            .as_deref()
            .unwrap_or(DEFAULT_OPERATIONS_LOG_FILE)
    }

    /// Operations journal records retained.
    #[must_use]
    pub fn operations_max_entries(&self) -> usize {
        self.operations_max_entries
            .unwrap_or(DEFAULT_OPERATIONS_MAX_ENTRIES)
    }

    /// Snapshot directory resolved against the data directory.
    #[must_use]
    pub fn snapshot_dir(&self) -> PathBuf {
        let dir = self
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR));
        if dir.is_absolute() {
            dir
        } else {
            self.data_dir().join(dir)
        }
    }

    /// Snapshots to keep when pruning; never fewer than
    /// [`MIN_RETAINED_SNAPSHOTS`].
    #[must_use]
    pub fn snapshot_retention(&self) -> usize {
        self.snapshot_retention
            .unwrap_or(DEFAULT_SNAPSHOT_RETENTION)
            .max(MIN_RETAINED_SNAPSHOTS)
    }

    /// Archive age threshold in months.
    #[must_use]
    pub fn months_before_archive(&self) -> u32 {
        self.months_before_archive
            .unwrap_or(DEFAULT_MONTHS_BEFORE_ARCHIVE)
    }

    /// Alert log file name.
    #[must_use]
    pub fn alert_log_file(&self) -> &str {
        self.alert_log_file
            .as_deref()
            .unwrap_or(DEFAULT_ALERT_LOG_FILE)
    }

    /// Alerts retained.
    #[must_use]
    pub fn alert_max_entries(&self) -> usize {
        self.alert_max_entries.unwrap_or(DEFAULT_ALERT_MAX_ENTRIES)
    }

    /// Monitor thresholds with defaults filled in.
    #[must_use]
    pub fn monitor(&self) -> MonitorSettings {
        let defaults = MonitorSettings::default();
        MonitorSettings {
            interval: self
                .monitor_interval_seconds
                .map_or(defaults.interval, Duration::from_secs),
            max_response_ms: self
                .monitor_max_response_ms
                .unwrap_or(defaults.max_response_ms),
            max_failed_checks: self
                .monitor_max_failed_checks
                .unwrap_or(defaults.max_failed_checks),
            alert_cooldown: self
                .monitor_alert_cooldown_minutes
                .map_or(defaults.alert_cooldown, TimeDelta::minutes),
        }
    }

    /// Company lists for business validation. An unset test-company list
    /// keeps the built-in placeholders.
    #[must_use]
    pub fn business_rules(&self) -> BusinessRules {
        let defaults = BusinessRules::default();
        BusinessRules {
            known_test_companies: self
                .known_test_companies
                .as_deref()
                .map_or(defaults.known_test_companies, split_list),
            reference_companies: self
                .reference_companies
                .as_deref()
                .map_or(defaults.reference_companies, split_list),
        }
    }

    /// Service options derived from these settings.
    #[must_use]
    pub fn retention_options(&self) -> RetentionOptions {
        RetentionOptions {
            business_rules: self.business_rules(),
            monitor: self.monitor(),
            ..RetentionOptions::default()
        }
    }
}
