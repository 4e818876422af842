// Direct-Append Submission Log
//
// A single JSON file holding every accepted submission in arrival
// order. Each append rewrites the whole file (read, push, write), so
// appends must never overlap.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::validate::ValidAddress;

pub mod store;

pub use store::{Ack, StorageBackend, StorageFailure};

/// Server-assigned identifier of a submission.
///
/// UUIDv7: millisecond creation time followed by random bits. Unique
/// in practice, but nothing looks submissions up by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub Uuid);

impl SubmissionId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

/// One accepted address capture.
///
/// `received_at` and `id` are assigned at ingress, never taken from
/// the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "email")]
    pub address: String,

    #[serde(rename = "timestamp")]
    pub received_at: DateTime<Utc>,

    pub id: SubmissionId,
}

impl Submission {
    /// Stamp a validated address with the current time and a fresh id.
    pub fn new(address: ValidAddress) -> Self {
        Self {
            address: address.into_inner(),
            received_at: Utc::now(),
            id: SubmissionId::generate(),
        }
    }
}

/// Serialized writer for the direct-append log file.
///
/// Every append holds the queue for its full read-modify-write cycle.
/// The queue is a fair mutex, so appends complete in the order they
/// started waiting, and a failed append releases its turn like any
/// other.
#[derive(Debug)]
pub struct SerialWriter {
    path: PathBuf,
    queue: Mutex<()>,
}

impl SerialWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            queue: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one submission to the end of the log.
    ///
    /// A missing log file is an empty log. An unreadable or
    /// unparseable one fails this append and leaves the file as is.
    pub async fn append(&self, submission: Submission) -> Result<Ack, StorageFailure> {
        let _turn = self.queue.lock().await;

        let mut entries = read_log(&self.path).await?;
        entries.push(submission);
        write_log(&self.path, &entries).await?;

        tracing::debug!(path = %self.path.display(), total = entries.len(), "log appended");

        Ok(Ack {
            position: entries.len(),
        })
    }

    /// Load the full log in order.
    pub async fn read_all(&self) -> Result<Vec<Submission>, StorageFailure> {
        let _turn = self.queue.lock().await;
        read_log(&self.path).await
    }
}

async fn read_log(path: &Path) -> Result<Vec<Submission>, StorageFailure> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StorageFailure::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&data).map_err(|source| StorageFailure::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

// Full rewrite through `<log>.tmp` + rename, so a crash mid-write
// leaves the previous log intact.
async fn write_log(path: &Path, entries: &[Submission]) -> Result<(), StorageFailure> {
    let data = serde_json::to_vec_pretty(entries).map_err(StorageFailure::Encode)?;
    let temp_path = temp_path_for(path);
    let write_err = |source| StorageFailure::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .map_err(write_err)?;
    file.write_all(&data).await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(write_err)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
