// Submission Collector
//
// Ingress: validate, stamp, store. One successful call records exactly
// one submission; a failed call records nothing.

use crate::config::StorageMode;
use crate::log::{StorageBackend, StorageFailure, Submission};
use crate::validate::{validate, InvalidFormat};

/// Errors returned by [`Collector::submit`].
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    InvalidFormat(#[from] InvalidFormat),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageFailure),
}

/// A stored submission and its position in the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionAccepted {
    pub submission: Submission,
    pub position: usize,
}

#[derive(Debug, Clone)]
pub struct Collector {
    backend: StorageBackend,
}

impl Collector {
    pub fn new(backend: StorageBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    pub fn mode(&self) -> StorageMode {
        self.backend.mode()
    }

    /// Validate and store one address.
    ///
    /// Storage failures are returned for the caller to retry.
    pub async fn submit(&self, raw_address: &str) -> Result<SubmissionAccepted, SubmitError> {
        let address = validate(raw_address)?;
        let submission = Submission::new(address);

        let ack = match self.backend.append(submission.clone()).await {
            Ok(ack) => ack,
            Err(err) => {
                tracing::error!(
                    mode = %self.mode(),
                    id = %submission.id.0,
                    error = %err,
                    "failed to store submission"
                );
                return Err(err.into());
            }
        };

        tracing::info!(
            mode = %self.mode(),
            email = %submission.address,
            total = ack.position,
            "submission stored"
        );

        Ok(SubmissionAccepted {
            submission,
            position: ack.position,
        })
    }
}
