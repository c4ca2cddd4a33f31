//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        CreateSessionPayload, CursorView, EngineReply, ErrorResponse, EventPayload, EventSource,
        PersonaPayload, SessionDetail, SessionKind, SessionStatus, SessionSummary, SummaryView,
        TranscriptResponse, TurnView,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::post_event,
        handlers::list_sessions,
        handlers::get_session,
        handlers::get_transcript,
        handlers::health,
    ),
    components(
        schemas(
            CreateSessionPayload,
            PersonaPayload,
            EventPayload,
            EventSource,
            EngineReply,
            SessionSummary,
            SessionDetail,
            SessionKind,
            SessionStatus,
            CursorView,
            SummaryView,
            TranscriptResponse,
            TurnView,
            ErrorResponse
        )
    ),
    tags(
        (name = "Parlando API", description = "Session orchestration for turn-based language practice")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route(
            "/api/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route("/api/sessions/{session_id}", get(handlers::get_session))
        .route(
            "/api/sessions/{session_id}/events",
            post(handlers::post_event),
        )
        .route(
            "/api/sessions/{session_id}/transcript",
            get(handlers::get_transcript),
        )
        .route("/health", get(handlers::health))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
