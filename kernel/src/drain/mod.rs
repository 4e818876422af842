// Scheduled Drain Job
//
// Pulls the collector's volatile buffer over HTTP (the authenticated
// read-and-clear path of `GET /api/emails`) and folds the batch into
// a new snapshot.
//
// The server clears its buffer only when it answers the authenticated
// request, so a failed fetch consumes nothing and is safe to retry on
// the next tick.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use reqwest::Client as HttpClient;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::config::DrainConfig;
use crate::http::EmailsResponse;
use crate::log::{StorageFailure, Submission};
use crate::snapshot::{SnapshotRef, SnapshotWriter};

/// Fetch-side failure. Nothing was consumed on the server.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("drain request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("drain endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unparseable drain response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("server returned the buffer without clearing it; secret not accepted")]
    NotCleared,
}

#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    #[error("snapshot write failed: {0}")]
    Storage(#[from] StorageFailure),

    #[error("a drain is already running")]
    Busy,

    #[error("invalid drain client setup: {0}")]
    Setup(String),
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainSummary {
    /// Submissions returned by the server on this run.
    pub fetched: usize,

    /// Submissions retried from an earlier run whose snapshot write failed.
    pub carried_over: usize,

    /// Snapshot written, if there was anything to write.
    pub snapshot: Option<SnapshotRef>,
}

impl DrainSummary {
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none()
    }
}

/// Drain client bound to one collector endpoint and one backup directory.
pub struct DrainClient {
    http: HttpClient,
    url: String,
    secret: String,
    writer: SnapshotWriter,
    /// Held for the whole of `run_once`. Holds submissions that were
    /// drained from the server but not yet written to a snapshot.
    in_flight: Mutex<Vec<Submission>>,
}

impl fmt::Debug for DrainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainClient")
            .field("url", &self.url)
            .field("backup_dir", &self.writer.dir())
            .finish_non_exhaustive()
    }
}

impl DrainClient {
    pub fn new(
        endpoint: &str,
        secret: impl Into<String>,
        writer: SnapshotWriter,
        timeout: Duration,
    ) -> Result<Self, DrainError> {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(DrainError::Setup(format!(
                "endpoint must start with http:// or https://, got: {endpoint}"
            )));
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DrainError::Setup(e.to_string()))?;

        Ok(Self {
            http,
            url: format!("{}/api/emails", endpoint.trim_end_matches('/')),
            secret: secret.into(),
            writer,
            in_flight: Mutex::new(Vec::new()),
        })
    }

    pub fn from_config(config: &DrainConfig) -> Result<Self, DrainError> {
        config
            .validate()
            .map_err(|e| DrainError::Setup(e.to_string()))?;

        Self::new(
            config.endpoint.as_deref().unwrap_or_default(),
            config.secret.clone().unwrap_or_default(),
            SnapshotWriter::new(&config.backup_dir),
            config.request_timeout(),
        )
    }

    pub fn writer(&self) -> &SnapshotWriter {
        &self.writer
    }

    /// Submissions waiting for a snapshot after a failed write.
    pub async fn pending(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Run one drain cycle.
    ///
    /// Overlapping calls are refused with [`DrainError::Busy`] instead
    /// of racing a second request against the server.
    pub async fn run_once(&self) -> Result<DrainSummary, DrainError> {
        let mut in_flight = self.in_flight.try_lock().map_err(|_| DrainError::Busy)?;

        let response = match self.fetch().await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(url = %self.url, error = %err, "drain fetch failed");
                return Err(err.into());
            }
        };

        let fetched = response.emails.len();
        let carried_over = in_flight.len();
        tracing::info!(fetched, carried_over, "drain fetched");

        if fetched == 0 && carried_over == 0 {
            return Ok(DrainSummary {
                fetched,
                carried_over,
                snapshot: None,
            });
        }

        in_flight.extend(response.emails);

        let writer = self.writer.clone();
        let batch = in_flight.clone();
        let written = tokio::task::spawn_blocking(move || writer.write(batch))
            .await
            .map_err(|e| StorageFailure::Aborted(e.to_string()))
            .and_then(|result| result);

        match written {
            Ok(snapshot) => {
                in_flight.clear();
                Ok(DrainSummary {
                    fetched,
                    carried_over,
                    snapshot: Some(snapshot),
                })
            }
            Err(err) => {
                tracing::error!(
                    pending = in_flight.len(),
                    error = %err,
                    "snapshot write failed, keeping drained submissions for the next run"
                );
                Err(err.into())
            }
        }
    }

    /// Drain every `period` until `shutdown` resolves.
    ///
    /// Failures are logged and retried on the next tick. A drain in
    /// progress is finished before shutdown is observed.
    pub async fn run_every<F>(&self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(summary) => match &summary.snapshot {
                            Some(snapshot) => tracing::info!(
                                snapshot = %snapshot.name,
                                added = snapshot.newly_added_count,
                                total = snapshot.total_count,
                                "drain cycle complete"
                            ),
                            None => tracing::debug!("drain cycle found nothing new"),
                        },
                        Err(err) => tracing::warn!(error = %err, "drain cycle failed, will retry"),
                    }
                }
            }
        }

        let pending = self.pending().await;
        if pending > 0 {
            tracing::warn!(pending, "drain loop stopped with unsnapshotted submissions");
        }
        tracing::info!("drain loop stopped");
    }

    async fn fetch(&self) -> Result<EmailsResponse, FetchFailure> {
        let response = self
            .http
            .get(&self.url)
            .query(&[("secret", self.secret.as_str())])
            .send()
            .await
            .map_err(|e| FetchFailure::Transport(e.without_url()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::Transport(e.without_url()))?;

        if !status.is_success() {
            return Err(FetchFailure::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: EmailsResponse = serde_json::from_slice(&body).map_err(FetchFailure::Decode)?;
        if !parsed.cleared {
            return Err(FetchFailure::NotCleared);
        }

        Ok(parsed)
    }
}
