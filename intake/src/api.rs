use crate::config::Listener;
use crate::engine::{Deduplicator, Submission};
use crate::errors::IntakeError;
use crate::query::{QueryService, View};
use crate::report::IssueReport;
use crate::types::{BugProjection, IssueProjection};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State, rejection::BytesRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;
use tokio::net::TcpListener;

const ENDPOINTS: &[&str] = &[
    "POST /api/submitbug",
    "GET /api/bug",
    "GET /api/bug/summary",
    "GET /api/bug/{id}",
    "GET /api/bug/{id}/summary",
    "GET /api/issue",
    "GET /api/issue/summary",
    "GET /api/issue/{id}",
    "GET /api/issue/{id}/summary",
];

#[derive(Clone)]
pub struct AppState {
    pub dedup: Deduplicator,
    pub query: QueryService,
    /// Copy raw store errors into the `dbError` field of failure responses.
    pub expose_store_errors: bool,
}

impl AppState {
    fn fail(&self, error: IntakeError, failure: &'static str) -> ApiError {
        ApiError {
            error,
            failure,
            expose_store_errors: self.expose_store_errors,
        }
    }
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api", get(describe))
        .route("/api/", get(describe))
        .route("/api/submitbug", post(submit_bug))
        .route(
            "/api/bug",
            get(|s: State<AppState>| list_bugs(s, View::Full)),
        )
        .route(
            "/api/bug/summary",
            get(|s: State<AppState>| list_bugs(s, View::Summary)),
        )
        .route(
            "/api/bug/{id}",
            get(|s: State<AppState>, id: Path<String>| get_bug(s, id, View::Full)),
        )
        .route(
            "/api/bug/{id}/summary",
            get(|s: State<AppState>, id: Path<String>| get_bug(s, id, View::Summary)),
        )
        .route(
            "/api/issue",
            get(|s: State<AppState>| list_issues(s, View::Full)),
        )
        .route(
            "/api/issue/summary",
            get(|s: State<AppState>| list_issues(s, View::Summary)),
        )
        .route(
            "/api/issue/{id}",
            get(|s: State<AppState>, id: Path<String>| get_issue(s, id, View::Full)),
        )
        .route(
            "/api/issue/{id}/summary",
            get(|s: State<AppState>, id: Path<String>| get_issue(s, id, View::Summary)),
        )
        .fallback(unknown_endpoint)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Serves `app` until ctrl-c is received.
pub async fn serve(listener: &Listener, app: Router) -> Result<(), IntakeError> {
    let listener = TcpListener::bind(listener.addr()).await?;
    tracing::info!(addr = %listener.local_addr()?, "api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("api shutting down");
        })
        .await?;
    Ok(())
}

/// Response body shared by every endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    error: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    db_error: Option<String>,
}

impl<T> Envelope<T> {
    fn ok(message: &str, data: T) -> Self {
        Envelope {
            error: false,
            message: message.to_owned(),
            data: Some(data),
            db_error: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

struct ApiError {
    error: IntakeError,
    /// Message sent instead of the error text for server-side failures.
    failure: &'static str,
    expose_store_errors: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();

        let message = if status.is_server_error() {
            tracing::error!(error = %self.error, status = status.as_u16(), "request failed");
            self.failure.to_owned()
        } else {
            tracing::debug!(error = %self.error, status = status.as_u16(), "request rejected");
            self.error.to_string()
        };

        let db_error = self
            .error
            .store_error()
            .filter(|_| self.expose_store_errors)
            .map(ToString::to_string);

        let body = Envelope::<()> {
            error: true,
            message,
            data: None,
            db_error,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Envelope<T>, ApiError>;

#[derive(Serialize)]
struct ServiceDescription {
    service: &'static str,
    version: &'static str,
    endpoints: &'static [&'static str],
}

async fn describe() -> Envelope<ServiceDescription> {
    Envelope::ok(
        "bug report intake",
        ServiceDescription {
            service: "bugdesk",
            version: env!("CARGO_PKG_VERSION"),
            endpoints: ENDPOINTS,
        },
    )
}

async fn unknown_endpoint() -> (StatusCode, Json<Envelope<()>>) {
    let body = Envelope {
        error: true,
        message: "no such endpoint".to_owned(),
        data: None,
        db_error: None,
    };
    (StatusCode::NOT_FOUND, Json(body))
}

async fn submit_bug(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Submission> {
    const FAILURE: &str = "Error submitting bug";

    let body = body.map_err(|rejection| {
        let error = IntakeError::RequestBody {
            status: rejection.status(),
            message: rejection.body_text(),
        };
        state.fail(error, FAILURE)
    })?;
    let report = IssueReport::from_json(&body)
        .map_err(|e| state.fail(IntakeError::InvalidReport(e.to_string()), FAILURE))?;
    let submission = state
        .dedup
        .submit(report.into_new_issue(Utc::now()))
        .await
        .map_err(|e| state.fail(e, FAILURE))?;

    Ok(Envelope::ok("Bug submitted!", submission))
}

async fn list_bugs(State(state): State<AppState>, view: View) -> ApiResult<Vec<BugProjection>> {
    let bugs = state
        .query
        .list_bugs(view)
        .await
        .map_err(|e| state.fail(e, "Error getting bugs"))?;
    Ok(Envelope::ok("All the bugs", bugs))
}

async fn get_bug(
    State(state): State<AppState>,
    Path(id): Path<String>,
    view: View,
) -> ApiResult<BugProjection> {
    let bug = state
        .query
        .get_bug(&id, view)
        .await
        .map_err(|e| state.fail(e, "Error getting bug"))?;
    Ok(Envelope::ok("Bug found", bug))
}

async fn list_issues(
    State(state): State<AppState>,
    view: View,
) -> ApiResult<Vec<IssueProjection>> {
    let issues = state
        .query
        .list_issues(view)
        .await
        .map_err(|e| state.fail(e, "Error getting issues"))?;
    Ok(Envelope::ok("All the issues", issues))
}

async fn get_issue(
    State(state): State<AppState>,
    Path(id): Path<String>,
    view: View,
) -> ApiResult<IssueProjection> {
    let issue = state
        .query
        .get_issue(&id, view)
        .await
        .map_err(|e| state.fail(e, "Error getting issue"))?;
    Ok(Envelope::ok("Issue found", issue))
}
