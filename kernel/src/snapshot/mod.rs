// Snapshot Chain
//
// Each drain cycle produces one immutable, full-history snapshot file
// that names its predecessor. Recency is decided by file name alone:
//
//   emails_<YYYY>-<MM>-<DD>_<HH>-<mm>-<ss>[_NN].json
//
// Timestamps are UTC. The optional `_NN` counter separates snapshots
// created within the same second; `_` sorts after `.`, so lexical
// order of names is creation order. If the clock reads earlier than
// the latest snapshot's name, the new name is taken from one second
// past the latest instead.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::log::{StorageFailure, Submission};

pub const SNAPSHOT_PREFIX: &str = "emails_";
pub const SNAPSHOT_EXTENSION: &str = ".json";

const MAX_NAME_ATTEMPTS: u32 = 100;

/// Contents of one snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub total_count: usize,
    pub submissions: Vec<Submission>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    /// File name of the snapshot whose history was carried forward.
    pub previous_snapshot_name: Option<String>,
    pub newly_added_count: usize,
    pub total_count: usize,
}

/// Summary of a freshly written snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotRef {
    pub name: String,
    pub path: PathBuf,
    pub previous_snapshot_name: Option<String>,
    pub newly_added_count: usize,
    pub total_count: usize,
}

/// Writes and reads snapshot files in one backup directory.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot file names, oldest first. A missing directory has none.
    pub fn list(&self) -> Result<Vec<String>, StorageFailure> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageFailure::Read {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_snapshot_name(name))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn latest_name(&self) -> Result<Option<String>, StorageFailure> {
        Ok(self.list()?.pop())
    }

    pub fn load(&self, name: &str) -> Result<Snapshot, StorageFailure> {
        let path = self.dir.join(name);
        let data = std::fs::read(&path).map_err(|source| StorageFailure::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| StorageFailure::Corrupt { path, source })
    }

    /// Most recent snapshot, if any exists.
    pub fn latest(&self) -> Result<Option<(String, Snapshot)>, StorageFailure> {
        match self.latest_name()? {
            Some(name) => {
                let snapshot = self.load(&name)?;
                Ok(Some((name, snapshot)))
            }
            None => Ok(None),
        }
    }

    /// Merge `new_batch` onto the latest snapshot's history and write a
    /// new snapshot. Existing files are never modified.
    pub fn write(&self, new_batch: Vec<Submission>) -> Result<SnapshotRef, StorageFailure> {
        self.write_at(Utc::now(), new_batch)
    }

    fn write_at(
        &self,
        now: DateTime<Utc>,
        new_batch: Vec<Submission>,
    ) -> Result<SnapshotRef, StorageFailure> {
        std::fs::create_dir_all(&self.dir).map_err(|source| StorageFailure::Write {
            path: self.dir.clone(),
            source,
        })?;

        let latest = self.latest_name()?;
        let (previous_snapshot_name, mut submissions) = match &latest {
            Some(name) => match self.load(name) {
                Ok(snapshot) => (Some(name.clone()), snapshot.submissions),
                Err(err) => {
                    tracing::warn!(
                        snapshot = %name,
                        error = %err,
                        "previous snapshot unreadable, starting without history"
                    );
                    (None, Vec::new())
                }
            },
            None => (None, Vec::new()),
        };

        let newly_added_count = new_batch.len();
        submissions.extend(new_batch);
        let total_count = submissions.len();

        let snapshot = Snapshot {
            total_count,
            submissions,
            metadata: SnapshotMetadata {
                created_at: now,
                previous_snapshot_name: previous_snapshot_name.clone(),
                newly_added_count,
                total_count,
            },
        };

        let name = self.persist(&snapshot, now, latest.as_deref())?;
        let path = self.dir.join(&name);

        tracing::info!(
            snapshot = %name,
            previous = previous_snapshot_name.as_deref().unwrap_or("-"),
            added = newly_added_count,
            total = total_count,
            "snapshot written"
        );

        Ok(SnapshotRef {
            name,
            path,
            previous_snapshot_name,
            newly_added_count,
            total_count,
        })
    }

    // Temp file + fsync + no-clobber rename. Returns the published name.
    fn persist(
        &self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
        latest: Option<&str>,
    ) -> Result<String, StorageFailure> {
        let data = serde_json::to_vec_pretty(snapshot).map_err(StorageFailure::Encode)?;
        let write_err = |source| StorageFailure::Write {
            path: self.dir.clone(),
            source,
        };

        let mut temp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        temp.write_all(&data).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;

        let name_at = match latest.and_then(name_timestamp) {
            Some(latest_at) if latest_at > now => {
                tracing::warn!(
                    latest = latest.unwrap_or_default(),
                    now = %now,
                    "clock is behind the latest snapshot, naming after it"
                );
                latest_at + chrono::Duration::seconds(1)
            }
            _ => now,
        };

        let stem = snapshot_stem(name_at);
        for counter in 0..MAX_NAME_ATTEMPTS {
            let name = snapshot_name(name_at, counter);

            // Same second as the latest snapshot: the new name must
            // still sort after it.
            if latest.is_some_and(|l| l.starts_with(&stem) && name.as_str() <= l) {
                continue;
            }

            match temp.persist_noclobber(self.dir.join(&name)) {
                Ok(_) => return Ok(name),
                Err(err) if err.error.kind() == ErrorKind::AlreadyExists => temp = err.file,
                Err(err) => {
                    return Err(StorageFailure::Write {
                        path: self.dir.join(&name),
                        source: err.error,
                    })
                }
            }
        }

        Err(StorageFailure::NameExhausted {
            stem,
            attempts: MAX_NAME_ATTEMPTS,
        })
    }
}

fn snapshot_stem(at: DateTime<Utc>) -> String {
    format!("{SNAPSHOT_PREFIX}{}", at.format("%Y-%m-%d_%H-%M-%S"))
}

/// File name for a snapshot created at `at`. `counter` 0 has no suffix.
pub fn snapshot_name(at: DateTime<Utc>, counter: u32) -> String {
    let stem = snapshot_stem(at);
    if counter == 0 {
        format!("{stem}{SNAPSHOT_EXTENSION}")
    } else {
        format!("{stem}_{counter:02}{SNAPSHOT_EXTENSION}")
    }
}

// Second-resolution timestamp embedded in a snapshot name.
fn name_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(SNAPSHOT_PREFIX)?.get(..19)?;
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d_%H-%M-%S")
        .ok()
        .map(|t| t.and_utc())
}

fn is_snapshot_name(name: &str) -> bool {
    name.strip_prefix(SNAPSHOT_PREFIX)
        .and_then(|rest| rest.strip_suffix(SNAPSHOT_EXTENSION))
        .is_some_and(|body| {
            body.len() >= 19
                && body
                    .chars()
                    .all(|c| c.is_ascii_digit() || c == '-' || c == '_')
        })
}
