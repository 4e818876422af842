// HTTP Surface
//
// POST /api/submit-email   accept one address
// GET  /api/emails         drain (matching secret) or peek the buffer
// GET  /health             liveness + buffered count

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::collector::{Collector, SubmitError};
use crate::log::Submission;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    collector: Collector,
    secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(collector: Collector, secret: Option<String>) -> Self {
        Self {
            collector,
            secret: secret.map(Arc::from),
        }
    }

    fn secret_matches(&self, given: Option<&str>) -> bool {
        match (self.secret.as_deref(), given) {
            (Some(expected), Some(given)) => constant_time_eq(expected.as_bytes(), given.as_bytes()),
            _ => false,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/submit-email", post(submit_email))
        .route("/api/emails", get(list_emails))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

// ── Request / Response types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub message: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailsQuery {
    pub secret: Option<String>,
}

/// Buffer contents as returned by `GET /api/emails`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailsResponse {
    pub count: usize,
    pub emails: Vec<Submission>,
    pub cleared: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(
        rename = "emailsInMemory",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub emails_in_memory: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Handler error, rendered as `{ "error": ... }`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

// ── Handlers ────────────────────────────────────────────────────────

async fn submit_email(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let raw = request.email.unwrap_or_default();

    match state.collector.submit(&raw).await {
        Ok(accepted) => Ok((
            StatusCode::CREATED,
            Json(SubmitResponse {
                message: "Email submitted successfully".into(),
                email: accepted.submission.address,
            }),
        )),
        Err(SubmitError::InvalidFormat(err)) => Err(ApiError::BadRequest(err.to_string())),
        Err(SubmitError::Storage(_)) => Err(ApiError::Internal(
            "Failed to save email. Please try again.".into(),
        )),
    }
}

async fn list_emails(
    State(state): State<AppState>,
    query: Result<Query<EmailsQuery>, QueryRejection>,
) -> Result<Json<EmailsResponse>, ApiError> {
    let buffer = state.collector.backend().buffer().ok_or_else(|| {
        ApiError::NotFound("no volatile buffer in direct-append mode".into())
    })?;

    // An unparseable query (e.g. a repeated `secret`) never authenticates.
    let (secret, garbled) = match query {
        Ok(Query(query)) => (query.secret, false),
        Err(_) => (None, true),
    };

    if state.secret_matches(secret.as_deref()) {
        let emails = buffer.drain_and_clear();
        tracing::info!(count = emails.len(), "buffer drained by scheduler");
        return Ok(Json(EmailsResponse {
            count: emails.len(),
            emails,
            cleared: true,
        }));
    }

    if secret.is_some() || garbled {
        tracing::warn!("secret mismatch on /api/emails, buffer left intact");
    }

    let emails = buffer.peek();
    Ok(Json(EmailsResponse {
        count: emails.len(),
        emails,
        cleared: false,
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".into(),
        emails_in_memory: state.collector.backend().buffer().map(|b| b.len()),
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VolatileBuffer;
    use crate::log::{SerialWriter, StorageBackend};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const SECRET: &str = "RIGHT";

    fn buffered_state() -> (Arc<VolatileBuffer>, AppState) {
        let buffer = Arc::new(VolatileBuffer::new());
        let collector = Collector::new(StorageBackend::Buffered(buffer.clone()));
        (buffer, AppState::new(collector, Some(SECRET.into())))
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = router(state.clone()).oneshot(request).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn submit(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/submit-email")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn submit_drain_scenario() {
        let (buffer, state) = buffered_state();

        let (status, body) = send(&state, submit(r#"{"email":"a@b.com"}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["email"], "a@b.com");
        assert_eq!(body["message"], "Email submitted successfully");

        let (status, body) = send(&state, submit(r#"{"email":"not-an-email"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid email format");

        let (status, body) = send(&state, get("/api/emails?secret=WRONG")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleared"], false);
        assert_eq!(body["count"], 1);
        assert_eq!(buffer.len(), 1);

        let (_, body) = send(&state, get("/api/emails?secret=RIGHT")).await;
        let drained: EmailsResponse = serde_json::from_value(body).unwrap();
        assert!(drained.cleared);
        assert_eq!(drained.count, 1);
        assert_eq!(drained.emails[0].address, "a@b.com");
        assert!(buffer.is_empty());

        let (_, body) = send(&state, get("/api/emails?secret=RIGHT")).await;
        assert_eq!(body, serde_json::json!({ "count": 0, "emails": [], "cleared": true }));
    }

    #[tokio::test]
    async fn missing_secret_only_peeks() {
        let (buffer, state) = buffered_state();
        send(&state, submit(r#"{"email":"a@b.com"}"#)).await;

        let (_, body) = send(&state, get("/api/emails")).await;
        assert_eq!(body["cleared"], false);
        assert_eq!(body["emails"][0]["email"], "a@b.com");
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn repeated_or_garbled_secret_only_peeks() {
        let (buffer, state) = buffered_state();
        send(&state, submit(r#"{"email":"a@b.com"}"#)).await;

        for uri in [
            "/api/emails?secret=a&secret=b",
            "/api/emails?secret=RIGHT&secret=RIGHT",
            "/api/emails?secret=%FF",
        ] {
            let (status, body) = send(&state, get(uri)).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body["cleared"], false, "{uri}");
            assert_eq!(body["count"], 1, "{uri}");
        }
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn server_without_secret_never_clears() {
        let buffer = Arc::new(VolatileBuffer::new());
        let state = AppState::new(
            Collector::new(StorageBackend::Buffered(buffer.clone())),
            None,
        );
        send(&state, submit(r#"{"email":"a@b.com"}"#)).await;

        let (_, body) = send(&state, get("/api/emails?secret=")).await;
        assert_eq!(body["cleared"], false);
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn missing_email_and_bad_json_are_400() {
        let (buffer, state) = buffered_state();

        let (status, body) = send(&state, submit("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Email is required");

        let (status, body) = send(&state, submit("{ nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn health_reports_buffered_count() {
        let (_buffer, state) = buffered_state();
        send(&state, submit(r#"{"email":"a@b.com"}"#)).await;

        let (status, body) = send(&state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "status": "OK", "emailsInMemory": 1 }));
    }

    #[tokio::test]
    async fn direct_mode_has_no_drain_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(SerialWriter::new(dir.path().join("emails.json")));
        let state = AppState::new(Collector::new(StorageBackend::Direct(writer.clone())), None);

        let (status, _) = send(&state, submit(r#"{"email":"a@b.com"}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(writer.read_all().await.unwrap().len(), 1);

        let (status, body) = send(&state, get("/api/emails?secret=x")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let (_, body) = send(&state, get("/health")).await;
        assert_eq!(body, serde_json::json!({ "status": "OK" }));
    }

    #[tokio::test]
    async fn storage_failure_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(SerialWriter::new(dir.path()));
        let state = AppState::new(Collector::new(StorageBackend::Direct(writer)), None);

        let (status, body) = send(&state, submit(r#"{"email":"a@b.com"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to save email. Please try again.");
    }

    #[test]
    fn constant_time_eq_compares_exactly() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
