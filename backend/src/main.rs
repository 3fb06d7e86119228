//! `retention-admin`: operator commands for the sample request retention
//! services.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use serde::Serialize;
use serde_json::json;
use tokio::runtime::Builder;
use tracing::info;

use sample_retention::config::RetentionSettings;
use sample_retention::domain::request::RequestId;
use sample_retention::domain::{RetentionPorts, RetentionServices};
use sample_retention::outbound::journal::{FileAlertLog, FileAuditLog, FileOperationsJournal};
use sample_retention::outbound::persistence::{
    DbPool, DieselRequestStore, PoolConfig, run_pending_migrations,
};
use sample_retention::outbound::snapshots::FileSnapshotRepository;
use sample_retention::telemetry::init_tracing;

/// `retention-admin` command arguments.
#[derive(Debug, Parser)]
#[command(
    name = "retention-admin",
    about = "Archive, verify, back up and recover fabric sample requests",
    version
)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending database migrations.
    Migrate,
    /// Probe database connectivity and report record counts.
    Health,
    /// Run the integrity check and business data validation.
    Check,
    /// Archive old dispatched requests behind a backup and verification.
    Archive {
        /// Minimum age in months; defaults to the configured value.
        #[arg(long)]
        months: Option<u32>,
    },
    /// Rebuild lost requests from the audit trail.
    Recover {
        /// Recover only this request id instead of scanning everything.
        #[arg(long)]
        id: Option<i64>,
    },
    /// Write a manual backup snapshot.
    Snapshot,
    /// Replay a snapshot from the snapshot directory additively.
    Restore {
        /// Snapshot file name; a path is reduced to its file name.
        snapshot: PathBuf,
    },
    /// List stored snapshots.
    Snapshots {
        /// Delete all but the configured number of newest snapshots.
        #[arg(long)]
        prune: bool,
    },
    /// Run the health monitor.
    Monitor {
        /// Stop after this many probes instead of running until Ctrl-C.
        #[arg(long)]
        checks: Option<u32>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("create Tokio runtime")?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = CliArgs::parse();
    let settings = RetentionSettings::load_from_iter([OsString::from("retention-admin")])
        .map_err(|err| eyre!("load retention settings: {err}"))?;
    let database_url = settings
        .database_url()
        .ok_or_else(|| eyre!("no database URL: set RETENTION_DATABASE_URL or DATABASE_URL"))?;

    let services = build_services(&settings, &database_url).await?;
    run(&args.command, &settings, &database_url, &services).await
}

async fn build_services(
    settings: &RetentionSettings,
    database_url: &str,
) -> Result<RetentionServices> {
    let pool = DbPool::new(PoolConfig::new(database_url))
        .await
        .wrap_err("create database pool")?;
    let data_dir = settings.data_dir();
    let ports = RetentionPorts {
        store: Arc::new(DieselRequestStore::new(pool)),
        audit_log: Arc::new(FileAuditLog::open(
            &data_dir,
            settings.audit_log_file(),
            settings.audit_max_entries(),
        )?),
        operations: Arc::new(FileOperationsJournal::open(
            &data_dir,
            settings.operations_log_file(),
            settings.operations_max_entries(),
        )?),
        snapshots: Arc::new(FileSnapshotRepository::open(&settings.snapshot_dir())?),
        alerts: Arc::new(FileAlertLog::open(
            &data_dir,
            settings.alert_log_file(),
            settings.alert_max_entries(),
        )?),
    };
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    Ok(RetentionServices::new(
        ports,
        clock,
        settings.retention_options(),
    ))
}

async fn run(
    command: &Command,
    settings: &RetentionSettings,
    database_url: &str,
    services: &RetentionServices,
) -> Result<()> {
    match command {
        Command::Migrate => {
            let applied = run_pending_migrations(database_url).await?;
            print_json(&json!({ "applied": applied }))
        }
        Command::Health => print_json(&services.health.check().await),
        Command::Check => {
            let integrity = services.integrity.perform_integrity_check().await;
            let business = services.business.validate().await?;
            print_json(&json!({
                "integrity": integrity,
                "business_validation": business,
            }))
        }
        Command::Archive { months } => {
            let threshold = months.unwrap_or_else(|| settings.months_before_archive());
            let outcome = services.archive_with_safeguards(threshold).await?;
            print_json(&outcome)
        }
        Command::Recover { id: Some(id) } => {
            let request = services.recovery.recover_from_audit(RequestId::new(*id)).await?;
            print_json(&request)
        }
        Command::Recover { id: None } => {
            print_json(&services.recovery.perform_full_recovery_scan().await)
        }
        Command::Snapshot => {
            let receipt = services
                .snapshots
                .create_backup_snapshot("manual", json!({ "source": "retention-admin" }))
                .await?;
            print_json(&receipt)
        }
        Command::Restore { snapshot } => {
            let name = snapshot
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| eyre!("snapshot must name a file: {}", snapshot.display()))?;
            print_json(&services.recovery.restore_from_backup(name).await?)
        }
        Command::Snapshots { prune } => {
            let pruned = if *prune {
                services.snapshots.prune(settings.snapshot_retention())?
            } else {
                Vec::new()
            };
            let snapshots = services.snapshots.list()?;
            print_json(&json!({ "snapshots": snapshots, "pruned": pruned }))
        }
        Command::Monitor { checks } => run_monitor(*checks, settings, services).await,
    }
}

async fn run_monitor(
    checks: Option<u32>,
    settings: &RetentionSettings,
    services: &RetentionServices,
) -> Result<()> {
    let monitor = &services.monitor;
    match checks {
        Some(count) => {
            for remaining in (0..count).rev() {
                monitor.check_once().await;
                if remaining > 0 {
                    tokio::time::sleep(settings.monitor().interval).await;
                }
            }
        }
        None => {
            monitor.start()?;
            tokio::signal::ctrl_c()
                .await
                .wrap_err("wait for interrupt")?;
            info!("interrupt received; stopping health monitor");
            monitor.stop().await?;
        }
    }
    print_json(&monitor.summary())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}
