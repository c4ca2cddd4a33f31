//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for session
//! management and event dispatch. It uses `utoipa` doc comments to generate
//! OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use parlando_core::session::SessionKey;
use parlando_core::{EngineError, Event, EventContext, Source};

use crate::{
    models::{
        CreateSessionPayload, EngineReply, ErrorResponse, EventPayload, SessionDetail,
        SessionSummary, TranscriptResponse,
    },
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    UpstreamFailed(String),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    /// Maps an engine failure onto the HTTP surface. Retryable conditions
    /// come back as 409 or 503 so clients know a later attempt can work;
    /// unusable model output is a 502 rather than a generic 500.
    fn from_engine(err: EngineError) -> Self {
        match err {
            EngineError::SessionBusy => ApiError::Conflict(err.to_string()),
            EngineError::SessionNotFound(_) => ApiError::NotFound(err.to_string()),
            EngineError::StoreUnavailable(_) | EngineError::ModelUnavailable(_) => {
                ApiError::Unavailable(err.to_string())
            }
            EngineError::GenerationFailed(_) => ApiError::UpstreamFailed(err.to_string()),
            other => ApiError::InternalServerError(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Unavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse { message })).into_response()
            }
            ApiError::UpstreamFailed(message) => {
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn user_id_from(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))
}

/// Create a new practice session and open its exercise.
#[utoipa::path(
    post,
    path = "/api/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 201, description = "Session created and opened", body = EngineReply),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 502, description = "The model produced unusable output", body = ErrorResponse),
        (status = 503, description = "A dependency is unavailable", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user creating the session")
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id_from(&headers)?;
    if payload.topic.trim().is_empty() {
        return Err(ApiError::BadRequest("topic must not be empty".to_string()));
    }

    let session_id = Uuid::new_v4().to_string();
    let event = Event {
        app_name: state.config.app_name.clone(),
        user_id: user_id.to_string(),
        session_id,
        source: Source::StartRequest,
        payload: String::new(),
    };
    let ctx = EventContext {
        exercise: Some(payload.into_exercise()),
    };

    let response = state
        .engine
        .dispatch(event, ctx)
        .await
        .map_err(ApiError::from_engine)?;

    Ok((StatusCode::CREATED, Json(EngineReply::from(response))))
}

/// Submit one event to an existing session.
#[utoipa::path(
    post,
    path = "/api/sessions/{session_id}/events",
    request_body = EventPayload,
    responses(
        (status = 200, description = "Event processed", body = EngineReply),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Another event for this session is in flight", body = ErrorResponse),
        (status = 502, description = "The model produced unusable output", body = ErrorResponse),
        (status = 503, description = "A dependency is unavailable", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("session_id" = String, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn post_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<EventPayload>,
) -> Result<Json<EngineReply>, ApiError> {
    let user_id = user_id_from(&headers)?;
    let event = Event {
        app_name: state.config.app_name.clone(),
        user_id: user_id.to_string(),
        session_id,
        source: payload.source.into(),
        payload: payload.payload,
    };

    // A busy session answers 409 immediately instead of queueing: the
    // client still owes a response for the event it already has in flight.
    let response = state
        .engine
        .try_dispatch(event, EventContext::default())
        .await
        .map_err(ApiError::from_engine)?;

    Ok(Json(EngineReply::from(response)))
}

/// List all practice sessions for a user.
#[utoipa::path(
    get,
    path = "/api/sessions",
    responses(
        (status = 200, description = "List of sessions", body = [SessionSummary]),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let user_id = user_id_from(&headers)?;
    let rows = state
        .db
        .list_sessions(&state.config.app_name, user_id)
        .await?;
    let sessions = rows
        .iter()
        .filter_map(|row| SessionSummary::from_row(&state.config.app_name, user_id, row))
        .collect();
    Ok(Json(sessions))
}

/// Get a point-in-time view of one session.
#[utoipa::path(
    get,
    path = "/api/sessions/{session_id}",
    responses(
        (status = 200, description = "Session details", body = SessionDetail),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("session_id" = String, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let user_id = user_id_from(&headers)?;
    let key = SessionKey::new(state.config.app_name.clone(), user_id, session_id);
    let session = state
        .engine
        .snapshot(&key)
        .await
        .map_err(ApiError::from_engine)?;
    let detail = SessionDetail::from_session(&session).map_err(ApiError::from_engine)?;
    Ok(Json(detail))
}

/// Get the full turn history of one session.
#[utoipa::path(
    get,
    path = "/api/sessions/{session_id}/transcript",
    responses(
        (status = 200, description = "Full transcript in turn order", body = TranscriptResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("session_id" = String, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_transcript(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    let user_id = user_id_from(&headers)?;
    let key = SessionKey::new(state.config.app_name.clone(), user_id, session_id);
    let session = state
        .engine
        .snapshot(&key)
        .await
        .map_err(ApiError::from_engine)?;
    let transcript = TranscriptResponse::from_session(&session).map_err(ApiError::from_engine)?;
    Ok(Json(transcript))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = String)
    )
)]
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_map_to_status_codes() {
        let cases = [
            (EngineError::SessionBusy, StatusCode::CONFLICT),
            (
                EngineError::SessionNotFound("parlando/u1/s1".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::ModelUnavailable("timed out".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                EngineError::StoreUnavailable(anyhow::anyhow!("db gone")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                EngineError::GenerationFailed("empty reply".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                EngineError::ClassificationAmbiguous,
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from_engine(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_missing_user_header_is_bad_request() {
        let headers = HeaderMap::new();
        assert!(matches!(
            user_id_from(&headers),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_user_header_is_read() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "learner-7".parse().unwrap());
        assert_eq!(user_id_from(&headers).unwrap(), "learner-7");
    }
}
