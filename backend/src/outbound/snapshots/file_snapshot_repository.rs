//! Snapshot files in a single capability-scoped directory.
//!
//! Each snapshot is one pretty-printed JSON document named
//! `backup_snapshot_<backup_id>.json`. Backup ids start with a UTC
//! timestamp, so lexical order is chronological order.

use std::io;
use std::path::Path;

use cap_std::{ambient_authority, fs::Dir};
use tracing::debug;
use uuid::Uuid;

use crate::domain::ports::{SnapshotRepository, SnapshotRepositoryError};
use crate::domain::snapshot::BackupSnapshot;

const PREFIX: &str = "backup_snapshot_";
const SUFFIX: &str = ".json";

fn io_error(name: &str, err: &io::Error) -> SnapshotRepositoryError {
    SnapshotRepositoryError::io(format!("{name}: {err}"))
}

fn is_snapshot_name(name: &str) -> bool {
    name.starts_with(PREFIX) && name.ends_with(SUFFIX) && !name.contains(['/', '\\'])
}

/// [`SnapshotRepository`] writing one JSON file per snapshot.
pub struct FileSnapshotRepository {
    dir: Dir,
}

impl FileSnapshotRepository {
    /// Open the snapshot directory at `path`, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotRepositoryError::Io`] when the directory cannot be
    /// created or opened.
    pub fn open(path: &Path) -> Result<Self, SnapshotRepositoryError> {
        let label = path.display().to_string();
        Dir::create_ambient_dir_all(path, ambient_authority())
            .map_err(|err| io_error(&label, &err))?;
        let dir =
            Dir::open_ambient_dir(path, ambient_authority()).map_err(|err| io_error(&label, &err))?;
        Ok(Self { dir })
    }

    fn write_atomically(&self, name: &str, contents: &[u8]) -> Result<(), SnapshotRepositoryError> {
        let staging = format!(".{name}.{}.tmp", Uuid::new_v4().simple());
        self.dir
            .write(&staging, contents)
            .map_err(|err| io_error(&staging, &err))?;
        if let Err(err) = self.dir.rename(&staging, &self.dir, name) {
            let _cleanup = self.dir.remove_file(&staging);
            return Err(io_error(name, &err));
        }
        Ok(())
    }
}

impl SnapshotRepository for FileSnapshotRepository {
    fn save(&self, snapshot: &BackupSnapshot) -> Result<String, SnapshotRepositoryError> {
        let name = format!("{PREFIX}{}{SUFFIX}", snapshot.backup_id);
        let body = serde_json::to_vec_pretty(snapshot)
            .map_err(|err| SnapshotRepositoryError::format(err.to_string()))?;
        self.write_atomically(&name, &body)?;
        debug!(snapshot = %name, bytes = body.len(), "snapshot file written");
        Ok(name)
    }

    fn load(&self, name: &str) -> Result<BackupSnapshot, SnapshotRepositoryError> {
        if name.contains(['/', '\\']) {
            return Err(SnapshotRepositoryError::not_found(name));
        }
        let raw = self.dir.read_to_string(name).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                SnapshotRepositoryError::not_found(name)
            } else {
                io_error(name, &err)
            }
        })?;
        serde_json::from_str(&raw)
            .map_err(|err| SnapshotRepositoryError::format(format!("{name}: {err}")))
    }

    fn list(&self) -> Result<Vec<String>, SnapshotRepositoryError> {
        let entries = self.dir.entries().map_err(|err| io_error(".", &err))?;
        let mut names = Vec::new();
        for listed in entries {
            let entry = listed.map_err(|err| io_error(".", &err))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if is_snapshot_name(&file_name) {
                names.push(file_name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn prune(&self, keep: usize) -> Result<Vec<String>, SnapshotRepositoryError> {
        let names = self.list()?;
        let surplus = names.len().saturating_sub(keep);
        let mut removed = Vec::with_capacity(surplus);
        for name in names.into_iter().take(surplus) {
            self.dir
                .remove_file(&name)
                .map_err(|err| io_error(&name, &err))?;
            removed.push(name);
        }
        Ok(removed)
    }
}
