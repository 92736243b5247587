//! # Tutorials API
//!
//! Run the pipeline, list stored runs, and ask follow-up questions.
//! Finished runs stay in a bounded session table so their retrieval index
//! can answer questions; evicted sessions release their index.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use utoipa::ToSchema;

use primer_core::skills::QaError;
use primer_core::state::{RunStore, Severity};
use primer_core::workflow::{Coordinator, PipelineEvent};
use primer_core::TutorialResult;

/// Finished runs kept in memory for follow-up questions
pub const MAX_SESSIONS: usize = 32;

/// Application state
pub struct AppState {
    pub coordinator: Coordinator,
    pub store: RunStore,
    pub event_tx: broadcast::Sender<PipelineEvent>,
    pub sessions: RwLock<Sessions>,
}

pub type SharedState = Arc<AppState>;

/// Insertion-ordered, capped map of finished runs
#[derive(Default)]
pub struct Sessions {
    order: VecDeque<String>,
    results: HashMap<String, TutorialResult>,
}

impl Sessions {
    /// Store a result; returns the evicted oldest result when over capacity
    pub fn insert(&mut self, result: TutorialResult, capacity: usize) -> Vec<TutorialResult> {
        let id = result.run_id.clone();
        if self.results.insert(id.clone(), result).is_none() {
            self.order.push_back(id);
        }

        let mut evicted = Vec::new();
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                evicted.extend(self.results.remove(&oldest));
            }
        }
        evicted
    }

    pub fn get(&self, id: &str) -> Option<&TutorialResult> {
        self.results.get(id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}

// === API Types ===

#[derive(Serialize, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateTutorialRequest {
    /// Free-text request, e.g. "getting started with requests"
    pub request: String,
    /// Revision budget; the configured default when omitted
    pub max_revisions: Option<u32>,
}

#[derive(Serialize, ToSchema)]
pub struct NoteResponse {
    pub severity: String,
    pub location: String,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct TutorialResponse {
    pub run_id: String,
    pub status: String,
    pub library: String,
    pub language: String,
    pub version: Option<String>,
    pub draft: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_message: Option<String>,
    pub revision_count: u32,
    pub max_revisions: u32,
    /// Notes from the last critique pass
    pub notes: Vec<NoteResponse>,
    pub sources: Vec<String>,
    pub warnings: Vec<String>,
    /// Whether follow-up questions can be answered for this run
    pub can_ask: bool,
}

impl TutorialResponse {
    fn from_result(result: &TutorialResult, can_ask: bool) -> Self {
        Self {
            run_id: result.run_id.clone(),
            status: result.status.as_str().to_string(),
            library: result.library_name.clone(),
            language: result.language.as_str().to_string(),
            version: result.resolved_version.clone(),
            draft: result.draft.clone(),
            failure_reason: result.failure.as_ref().map(|f| f.reason.as_str().to_string()),
            failure_message: result.failure.as_ref().map(|f| f.message.clone()),
            revision_count: result.revision_count,
            max_revisions: result.max_revisions,
            notes: result
                .latest_feedback()
                .iter()
                .map(|n| NoteResponse {
                    severity: match n.severity {
                        Severity::Blocking => "blocking".to_string(),
                        Severity::Advisory => "advisory".to_string(),
                    },
                    location: n.location_hint.clone(),
                    message: n.message.clone(),
                })
                .collect(),
            sources: result.source_urls.clone(),
            warnings: result
                .warnings
                .iter()
                .map(|w| format!("{}: {}", w.stage, w.message))
                .collect(),
            can_ask: can_ask && result.index_handle.is_some(),
        }
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize, ToSchema)]
pub struct RunSummaryResponse {
    pub id: String,
    pub library: String,
    pub status: String,
    pub revision_count: u32,
    pub created_at: String,
}

#[derive(Deserialize, ToSchema)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Serialize, ToSchema)]
pub struct AskResponse {
    pub run_id: String,
    pub answer: String,
}

/// Handler error rendered as `ApiResponse`
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        tracing::error!("Request failed: {:#}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<QaError> for ApiError {
    fn from(err: QaError) -> Self {
        let status = match err {
            QaError::EmptyQuestion => StatusCode::BAD_REQUEST,
            QaError::NoIndex => StatusCode::CONFLICT,
            QaError::Retrieval(_) | QaError::Generation(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse {
                success: false,
                message: self.message,
            }),
        )
            .into_response()
    }
}

pub fn tutorial_routes() -> Router<SharedState> {
    Router::new()
        .route("/", post(create_tutorial).get(list_tutorials))
        .route("/:id", get(get_tutorial))
        .route("/:id/ask", post(ask_question))
}

// === Handlers ===

/// Run the pipeline for a request
#[utoipa::path(
    post,
    path = "/api/v1/tutorials",
    tag = "tutorials",
    request_body = CreateTutorialRequest,
    responses(
        (status = 200, description = "Finished run (approved, revision_limit_exceeded, or failed)", body = TutorialResponse)
    )
)]
pub async fn create_tutorial(
    State(state): State<SharedState>,
    Json(req): Json<CreateTutorialRequest>,
) -> Result<Json<TutorialResponse>, ApiError> {
    let max_revisions = req
        .max_revisions
        .unwrap_or(state.coordinator.config().max_revisions);
    let result = state.coordinator.run(&req.request, max_revisions).await;

    if let Err(e) = state.store.save(&result) {
        tracing::warn!(run_id = %result.run_id, "Failed to store run: {}", e);
    }

    let response = TutorialResponse::from_result(&result, true);
    let evicted = state.sessions.write().await.insert(result, MAX_SESSIONS);
    for old in &evicted {
        tracing::debug!(run_id = %old.run_id, "Session evicted");
        state.coordinator.release(old).await;
    }

    Ok(Json(response))
}

/// List stored runs, newest first
#[utoipa::path(
    get,
    path = "/api/v1/tutorials",
    tag = "tutorials",
    params(("limit" = Option<usize>, Query, description = "Maximum rows (default 20)")),
    responses(
        (status = 200, description = "Stored runs", body = Vec<RunSummaryResponse>)
    )
)]
pub async fn list_tutorials(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RunSummaryResponse>>, ApiError> {
    let rows = state
        .store
        .list(query.limit.unwrap_or(20))
        .map_err(ApiError::internal)?;
    Ok(Json(
        rows.into_iter()
            .map(|r| RunSummaryResponse {
                id: r.id,
                library: r.library,
                status: r.status,
                revision_count: r.revision_count,
                created_at: r.created_at,
            })
            .collect(),
    ))
}

/// Get one run, from the session table or the store
#[utoipa::path(
    get,
    path = "/api/v1/tutorials/{id}",
    tag = "tutorials",
    params(("id" = String, Path, description = "Run ID")),
    responses(
        (status = 200, description = "Run", body = TutorialResponse),
        (status = 404, description = "Unknown run", body = ApiResponse)
    )
)]
pub async fn get_tutorial(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<TutorialResponse>, ApiError> {
    if let Some(result) = state.sessions.read().await.get(&id) {
        return Ok(Json(TutorialResponse::from_result(result, true)));
    }
    match state.store.load(&id).map_err(ApiError::internal)? {
        Some(result) => Ok(Json(TutorialResponse::from_result(&result, false))),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, format!("no run with id '{}'", id))),
    }
}

/// Ask a follow-up question about a finished run
#[utoipa::path(
    post,
    path = "/api/v1/tutorials/{id}/ask",
    tag = "tutorials",
    params(("id" = String, Path, description = "Run ID")),
    request_body = AskRequest,
    responses(
        (status = 200, description = "Answer", body = AskResponse),
        (status = 400, description = "Empty question", body = ApiResponse),
        (status = 404, description = "Run is not in the session table", body = ApiResponse),
        (status = 409, description = "Run has no retrieval index", body = ApiResponse)
    )
)]
pub async fn ask_question(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let result = state.sessions.read().await.get(&id).cloned().ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            format!("run '{}' is not active; follow-up questions need a live session", id),
        )
    })?;

    let answer = state.coordinator.ask(&result, &req.question).await?;
    Ok(Json(AskResponse { run_id: id, answer }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use primer_core::state::{CritiqueNote, PipelineState, RunStatus};

    fn result(request: &str) -> TutorialResult {
        let mut state = PipelineState::new(request, 1);
        state.library_name = request.to_string();
        state.draft = Some("# Installation".to_string());
        state.apply_critique(vec![
            CritiqueNote::blocking("structure", "missing required section '## Basic Usage'"),
            CritiqueNote::advisory("version", "registry marks this release as deprecated"),
        ]);
        state.transition(RunStatus::RevisionLimitExceeded).unwrap();
        TutorialResult::from_state(state, Vec::new())
    }

    #[test]
    fn test_sessions_evict_oldest() {
        let mut sessions = Sessions::default();
        let first = result("requests");
        let first_id = first.run_id.clone();

        assert!(sessions.insert(first, 2).is_empty());
        assert!(sessions.insert(result("chalk"), 2).is_empty());
        let evicted = sessions.insert(result("flask"), 2);

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].run_id, first_id);
        assert_eq!(sessions.len(), 2);
        assert!(sessions.get(&first_id).is_none());
    }

    #[test]
    fn test_response_flattens_latest_feedback() {
        let response = TutorialResponse::from_result(&result("requests"), true);
        assert_eq!(response.status, "revision_limit_exceeded");
        assert_eq!(response.notes.len(), 2);
        assert_eq!(response.notes[0].severity, "blocking");
        assert!(response.failure_reason.is_none());
        // no index was built
        assert!(!response.can_ask);
    }

    #[test]
    fn test_qa_errors_map_to_status_codes() {
        assert_eq!(ApiError::from(QaError::EmptyQuestion).status, StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(QaError::NoIndex).status, StatusCode::CONFLICT);
    }
}
