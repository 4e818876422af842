// Submission Storage Backends
//
// The collector hands every accepted submission to exactly one
// backend: the direct-append log, or the volatile buffer that a
// scheduled drain empties later.

use std::path::PathBuf;
use std::sync::Arc;

use super::{SerialWriter, Submission};
use crate::buffer::VolatileBuffer;
use crate::config::StorageMode;

/// Acknowledgement of a stored submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// 1-based position of the submission in the log or buffer.
    pub position: usize,
}

/// Local I/O failure. Retryable by the caller; never retried here.
#[derive(Debug, thiserror::Error)]
pub enum StorageFailure {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} does not hold valid submissions: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode submissions: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("no free snapshot name for {stem} after {attempts} attempts")]
    NameExhausted { stem: String, attempts: u32 },

    #[error("storage task aborted: {0}")]
    Aborted(String),
}

/// The active storage backend.
///
/// Volatile buffering loses anything not yet drained when the process
/// exits. That is an accepted property of [`StorageMode::Buffered`].
#[derive(Debug, Clone)]
pub enum StorageBackend {
    Direct(Arc<SerialWriter>),
    Buffered(Arc<VolatileBuffer>),
}

impl StorageBackend {
    pub fn mode(&self) -> StorageMode {
        match self {
            StorageBackend::Direct(_) => StorageMode::Direct,
            StorageBackend::Buffered(_) => StorageMode::Buffered,
        }
    }

    /// Buffer handle when running in buffered mode.
    pub fn buffer(&self) -> Option<&Arc<VolatileBuffer>> {
        match self {
            StorageBackend::Buffered(buffer) => Some(buffer),
            StorageBackend::Direct(_) => None,
        }
    }

    pub async fn append(&self, submission: Submission) -> Result<Ack, StorageFailure> {
        match self {
            StorageBackend::Direct(writer) => writer.append(submission).await,
            StorageBackend::Buffered(buffer) => Ok(buffer.append(submission)),
        }
    }
}
