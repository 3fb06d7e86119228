//! Snapshot storage on the local filesystem.

mod file_snapshot_repository;

pub use file_snapshot_repository::FileSnapshotRepository;
