//! Bounded append-only JSON-lines file.
//!
//! Each record is one line of JSON. Once the file holds more than its limit
//! plus a compaction margin it is rewritten, via a staging file and rename,
//! to the newest `max_entries` lines.

use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cap_std::ambient_authority;
use cap_std::fs::{Dir, OpenOptions};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::ports::JournalError;

fn io_error(file_name: &str, err: &io::Error) -> JournalError {
    JournalError::io(format!("{file_name}: {err}"))
}

/// Slack before compaction kicks in, so appends do not rewrite the file
/// every time once it is full.
fn compaction_margin(max_entries: usize) -> usize {
    max_entries.div_ceil(10)
}

/// Typed handle to one JSON-lines file inside a directory.
pub(crate) struct JsonLinesLog<T> {
    dir: Dir,
    file_name: String,
    max_entries: usize,
    // Cached line count, loaded lazily on first append.
    lines: Mutex<Option<usize>>,
    entry: PhantomData<fn() -> T>,
}

impl<T> JsonLinesLog<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open `file_name` inside `dir_path`, creating the directory if needed.
    pub(crate) fn open(
        dir_path: &Path,
        file_name: &str,
        max_entries: usize,
    ) -> Result<Self, JournalError> {
        Dir::create_ambient_dir_all(dir_path, ambient_authority())
            .map_err(|err| io_error(file_name, &err))?;
        let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
            .map_err(|err| io_error(file_name, &err))?;
        Ok(Self {
            dir,
            file_name: file_name.to_owned(),
            max_entries: max_entries.max(1),
            lines: Mutex::new(None),
            entry: PhantomData,
        })
    }

    fn lock_lines(&self) -> MutexGuard<'_, Option<usize>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_raw(&self) -> Result<String, JournalError> {
        match self.dir.read_to_string(&self.file_name) {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(io_error(&self.file_name, &err)),
        }
    }

    /// Append one record, compacting when the file has outgrown its limit.
    pub(crate) fn append(&self, record: &T) -> Result<(), JournalError> {
        let line = serde_json::to_string(record)
            .map_err(|err| JournalError::serialization(err.to_string()))?;

        let mut lines = self.lock_lines();
        let current = match *lines {
            Some(count) => count,
            None => self.normalise()?,
        };

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        let mut file = self
            .dir
            .open_with(&self.file_name, &options)
            .map_err(|err| io_error(&self.file_name, &err))?;
        file.write_all(format!("{line}\n").as_bytes())
            .map_err(|err| io_error(&self.file_name, &err))?;
        drop(file);

        let written = current.saturating_add(1);
        *lines = Some(written);
        if written > self.max_entries.saturating_add(compaction_margin(self.max_entries)) {
            *lines = Some(self.compact()?);
        }
        Ok(())
    }

    /// Count the lines already on disk. Legacy array files and files missing
    /// a final newline are rewritten as clean JSON lines first.
    fn normalise(&self) -> Result<usize, JournalError> {
        let contents = self.read_raw()?;
        let all = normalised_lines(&contents);
        if legacy_array(&contents).is_some() || !(contents.is_empty() || contents.ends_with('\n'))
        {
            self.replace_with(&all)?;
        }
        Ok(all.len())
    }

    fn replace_with(&self, lines: &[String]) -> Result<(), JournalError> {
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        let staging = format!(".{}.{}.tmp", self.file_name, Uuid::new_v4().simple());
        self.dir
            .write(&staging, body.as_bytes())
            .map_err(|err| io_error(&self.file_name, &err))?;
        if let Err(err) = self.dir.rename(&staging, &self.dir, &self.file_name) {
            let _cleanup = self.dir.remove_file(&staging);
            return Err(io_error(&self.file_name, &err));
        }
        Ok(())
    }

    /// Rewrite the file to its newest `max_entries` lines. Returns the line
    /// count afterwards.
    fn compact(&self) -> Result<usize, JournalError> {
        let contents = self.read_raw()?;
        let all = normalised_lines(&contents);
        let kept = all
            .get(all.len().saturating_sub(self.max_entries)..)
            .unwrap_or_default();
        self.replace_with(kept)?;
        debug!(
            file = %self.file_name,
            dropped = all.len().saturating_sub(kept.len()),
            "journal compacted"
        );
        Ok(kept.len())
    }

    /// Every decodable record, oldest first.
    pub(crate) fn read_all(&self) -> Result<Vec<T>, JournalError> {
        let contents = {
            let _guard = self.lock_lines();
            self.read_raw()?
        };
        Ok(decode_records(&self.file_name, &contents))
    }

    /// Up to `limit` of the newest records, oldest first.
    pub(crate) fn recent(&self, limit: usize) -> Result<Vec<T>, JournalError> {
        let mut records = self.read_all()?;
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
        Ok(records)
    }
}

/// Lines of the file with a legacy JSON array expanded into one line per
/// element. Blank lines are dropped.
fn normalised_lines(contents: &str) -> Vec<String> {
    if let Some(items) = legacy_array(contents) {
        return items.iter().map(Value::to_string).collect();
    }
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

fn legacy_array(contents: &str) -> Option<Vec<Value>> {
    let trimmed = contents.trim_start();
    if !trimmed.starts_with('[') {
        return None;
    }
    serde_json::from_str::<Vec<Value>>(trimmed).ok()
}

fn decode_records<T: DeserializeOwned>(file_name: &str, contents: &str) -> Vec<T> {
    let mut skipped = 0_usize;
    let decoded: Vec<T> = if let Some(items) = legacy_array(contents) {
        items
            .into_iter()
            .filter_map(|item| {
                serde_json::from_value(item)
                    .inspect_err(|_| skipped = skipped.saturating_add(1))
                    .ok()
            })
            .collect()
    } else {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                serde_json::from_str(line)
                    .inspect_err(|_| skipped = skipped.saturating_add(1))
                    .ok()
            })
            .collect()
    };
    if skipped > 0 {
        warn!(file = %file_name, skipped, "skipped unreadable journal records");
    }
    decoded
}

#[cfg(test)]
mod tests {
    //! Engine behaviour on real files.
    use rstest::rstest;
    use serde::Deserialize;
    use tempfile::TempDir;

    use super::*;
    use crate::test_support::cap_fs::{read_file_to_string, write_file};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        seq: u32,
    }

    fn open(dir: &TempDir, max: usize) -> JsonLinesLog<Entry> {
        JsonLinesLog::open(dir.path(), "log.jsonl", max).expect("open log")
    }

    #[rstest]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().expect("tempdir");
        assert!(open(&dir, 5).read_all().expect("read").is_empty());
    }

    #[rstest]
    fn appends_one_line_per_record() {
        let dir = TempDir::new().expect("tempdir");
        let log = open(&dir, 5);
        log.append(&Entry { seq: 1 }).expect("append");
        log.append(&Entry { seq: 2 }).expect("append");

        let raw = read_file_to_string(&dir.path().join("log.jsonl")).expect("raw");
        assert_eq!(raw.lines().count(), 2);
        assert_eq!(
            log.read_all().expect("read"),
            vec![Entry { seq: 1 }, Entry { seq: 2 }]
        );
    }

    #[rstest]
    fn compaction_keeps_the_newest_entries() {
        let dir = TempDir::new().expect("tempdir");
        let log = open(&dir, 10);
        for seq in 0..25 {
            log.append(&Entry { seq }).expect("append");
        }
        let entries = log.read_all().expect("read");
        assert!(entries.len() <= 11);
        assert_eq!(entries.last(), Some(&Entry { seq: 24 }));
        assert_eq!(log.recent(3).expect("recent").first(), Some(&Entry { seq: 22 }));
    }

    #[rstest]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().expect("tempdir");
        write_file(
            &dir.path().join("log.jsonl"),
            b"{\"seq\":1}\nnot json\n{\"seq\":\"two\"}\n\n{\"seq\":3}\n",
        )
        .expect("seed file");
        let entries = open(&dir, 10).read_all().expect("read");
        assert_eq!(entries, vec![Entry { seq: 1 }, Entry { seq: 3 }]);
    }

    #[rstest]
    fn legacy_array_files_are_read_and_converted_on_compaction() {
        let dir = TempDir::new().expect("tempdir");
        write_file(
            &dir.path().join("log.jsonl"),
            b"[{\"seq\":1},{\"seq\":2},{\"bogus\":true}]",
        )
        .expect("seed file");
        let log = open(&dir, 1);
        assert_eq!(
            log.read_all().expect("read"),
            vec![Entry { seq: 1 }, Entry { seq: 2 }]
        );

        log.append(&Entry { seq: 9 }).expect("append");
        log.append(&Entry { seq: 10 }).expect("append");
        let raw = read_file_to_string(&dir.path().join("log.jsonl")).expect("raw");
        assert!(!raw.starts_with('['));
        assert_eq!(
            log.read_all().expect("read"),
            vec![Entry { seq: 9 }, Entry { seq: 10 }]
        );
    }
}
