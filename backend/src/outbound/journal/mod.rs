//! File-backed journals: the audit log, the operations journal and the
//! alert log.
//!
//! All three share one engine that stores records as JSON lines and
//! compacts the file to a bounded number of newest entries.

mod file_alert_log;
mod file_audit_log;
mod file_operations_journal;
mod jsonl_log;

pub use file_alert_log::FileAlertLog;
pub use file_audit_log::FileAuditLog;
pub use file_operations_journal::FileOperationsJournal;
