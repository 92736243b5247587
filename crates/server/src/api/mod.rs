//! # HTTP API
//!
//! Axum routes under `/api/v1`, the OpenAPI document, and the audit event stream.

pub mod tutorials;

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{header, Response, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Router,
};
use futures::stream::{self, Stream};
use tokio::{
    net::TcpListener,
    sync::{broadcast, RwLock},
};
use utoipa::OpenApi;

use primer_core::state::{PrimerDb, RunStore};
use primer_core::workflow::{ChannelAuditSink, Coordinator, SqliteAuditSink};
use primer_core::PipelineConfig;

use tutorials::{
    ApiResponse, AppState, AskRequest, AskResponse, CreateTutorialRequest, NoteResponse,
    RunSummaryResponse, SharedState, Sessions, TutorialResponse,
};

/// Events buffered per SSE subscriber before lagging ones skip ahead
const EVENT_BUFFER: usize = 256;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Primer API",
        version = "1.0.0",
        description = "Getting-started tutorial generation for PyPI and npm libraries"
    ),
    paths(
        tutorials::create_tutorial,
        tutorials::list_tutorials,
        tutorials::get_tutorial,
        tutorials::ask_question
    ),
    components(
        schemas(
            ApiResponse,
            CreateTutorialRequest,
            TutorialResponse,
            NoteResponse,
            RunSummaryResponse,
            AskRequest,
            AskResponse
        )
    ),
    tags(
        (name = "tutorials", description = "Tutorial runs and follow-up questions")
    )
)]
pub struct ApiDoc;

async fn serve_openapi() -> impl IntoResponse {
    match ApiDoc::openapi().to_json() {
        Ok(json) => Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json))
            .map(IntoResponse::into_response)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            tracing::error!("Failed to render OpenAPI document: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// SSE stream of pipeline events with a heartbeat every 15 seconds
async fn events(State(state): State<SharedState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match tokio::time::timeout(std::time::Duration::from_secs(15), rx.recv()).await {
                Ok(Ok(event)) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    let sse = Event::default().event(event.kind.as_str()).data(json);
                    return Some((Ok(sse), rx));
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::debug!(skipped, "SSE subscriber lagged");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => return Some((Ok(Event::default().comment("heartbeat")), rx)),
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Full router over a prepared state
pub fn router(state: SharedState) -> Router {
    Router::new()
        .nest("/api/v1/tutorials", tutorials::tutorial_routes())
        .route("/api/v1/events", get(events))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state)
}

/// Wire the coordinator to the event channel and database, then serve
pub async fn serve(config: PipelineConfig, db: PrimerDb, port: u16) -> anyhow::Result<()> {
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let coordinator = Coordinator::from_config(config)?
        .with_sink(Arc::new(ChannelAuditSink::new(event_tx.clone())))
        .with_sink(Arc::new(SqliteAuditSink::new(&db)));

    let state = Arc::new(AppState {
        coordinator,
        store: RunStore::new(&db),
        event_tx,
        sessions: RwLock::new(Sessions::default()),
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, "Primer server listening");
    println!("Primer server running at http://{}", addr);
    println!("   POST /api/v1/tutorials            run a tutorial");
    println!("   GET  /api/v1/tutorials            stored runs");
    println!("   POST /api/v1/tutorials/:id/ask    follow-up question");
    println!("   GET  /api/v1/events               audit events (SSE)");
    println!("   GET  /api/v1/openapi.json         OpenAPI document");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}
