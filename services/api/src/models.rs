//! API and Database Models
//!
//! This module defines the request/response shapes of the HTTP surface and
//! the row type backing the session index, wired for both `sqlx` mapping
//! and OpenAPI documentation with `utoipa`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use parlando_core::session::{
    ExerciseConfig, ExerciseKind, FinalSummary, Persona, Session, SessionKey, WorkflowStatus,
};
use parlando_core::{EngineError, EngineResponse, Source};

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Drill,
    Roleplay,
}

impl From<SessionKind> for ExerciseKind {
    fn from(kind: SessionKind) -> Self {
        match kind {
            SessionKind::Drill => ExerciseKind::Drill,
            SessionKind::Roleplay => ExerciseKind::Roleplay,
        }
    }
}

impl From<ExerciseKind> for SessionKind {
    fn from(kind: ExerciseKind) -> Self {
        match kind {
            ExerciseKind::Drill => SessionKind::Drill,
            ExerciseKind::Roleplay => SessionKind::Roleplay,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Finished,
}

impl From<WorkflowStatus> for SessionStatus {
    fn from(status: WorkflowStatus) -> Self {
        match status {
            WorkflowStatus::Active => SessionStatus::Active,
            WorkflowStatus::Finished => SessionStatus::Finished,
        }
    }
}

/// Engine entry points a client may hit through the events endpoint.
/// Posting `start_request` to an existing session replays its opening.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    StartRequest,
    UserMessage,
    HintRequest,
    SkipRequest,
    FinalSummaryRequest,
}

impl From<EventSource> for Source {
    fn from(source: EventSource) -> Self {
        match source {
            EventSource::StartRequest => Source::StartRequest,
            EventSource::UserMessage => Source::UserMessage,
            EventSource::HintRequest => Source::HintRequest,
            EventSource::SkipRequest => Source::SkipRequest,
            EventSource::FinalSummaryRequest => Source::FinalSummaryRequest,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PersonaPayload {
    #[schema(example = "customer")]
    pub learner_role: String,
    #[schema(example = "fruit seller")]
    pub assistant_role: String,
    #[schema(example = "female")]
    pub assistant_gender: String,
    #[schema(example = "haggling over mangoes at a market stall")]
    pub scenario: String,
}

impl From<PersonaPayload> for Persona {
    fn from(payload: PersonaPayload) -> Self {
        Persona {
            learner_role: payload.learner_role,
            assistant_role: payload.assistant_role,
            assistant_gender: payload.assistant_gender,
            scenario: payload.scenario,
        }
    }
}

fn default_level() -> String {
    "beginner".to_string()
}

fn default_source_language() -> String {
    "Vietnamese".to_string()
}

fn default_practice_language() -> String {
    "English".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionPayload {
    #[schema(example = "drill")]
    pub kind: SessionKind,
    #[schema(example = "ordering coffee")]
    pub topic: String,
    #[serde(default = "default_level")]
    #[schema(example = "beginner")]
    pub level: String,
    #[serde(default = "default_source_language")]
    #[schema(example = "Vietnamese")]
    pub source_language: String,
    #[serde(default = "default_practice_language")]
    #[schema(example = "English")]
    pub practice_language: String,
    #[serde(default)]
    #[schema(example = 60)]
    pub target_word_count: Option<usize>,
    #[serde(default)]
    pub persona: Option<PersonaPayload>,
}

impl CreateSessionPayload {
    pub fn into_exercise(self) -> ExerciseConfig {
        ExerciseConfig {
            kind: self.kind.into(),
            topic: self.topic,
            level: self.level,
            source_language: self.source_language,
            practice_language: self.practice_language,
            target_word_count: self.target_word_count,
            persona: self.persona.map(Into::into),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EventPayload {
    #[schema(example = "user_message")]
    pub source: EventSource,
    /// Body of the event; may be empty for hint, skip and summary requests.
    #[serde(default)]
    #[schema(example = "I go to the market.")]
    pub payload: String,
}

/// What the engine answered for one processed event.
#[derive(Debug, Serialize, ToSchema)]
pub struct EngineReply {
    #[schema(example = "Sentence 1 of 3: \"Tôi đi chợ.\"")]
    pub text: String,
    pub session_id: String,
    /// Whether the session has reached its terminal state.
    pub done: bool,
    /// True when a generation loop capped out and the text may not fully
    /// meet its structural constraint.
    pub degraded: bool,
}

impl From<EngineResponse> for EngineReply {
    fn from(response: EngineResponse) -> Self {
        EngineReply {
            text: response.text,
            session_id: response.session_id,
            done: response.done,
            degraded: response.degraded,
        }
    }
}

/// One stored session row, state blob included.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: String,
    pub state_blob: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of the session index, shaped for clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSummary {
    pub session_id: String,
    #[schema(example = "drill")]
    pub kind: SessionKind,
    pub topic: String,
    pub level: String,
    pub done: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSummary {
    /// Shapes one stored row for the index. Returns `None` when the blob
    /// does not decode; the caller drops such rows instead of failing the
    /// whole listing.
    pub fn from_row(app_name: &str, user_id: &str, row: &SessionRow) -> Option<Self> {
        let state = row.state_blob.as_object()?.clone();
        let session = Session {
            key: SessionKey::new(app_name, user_id, row.session_id.clone()),
            state,
        };
        let exercise = session.exercise().ok()?;
        let done = session.is_done().ok()?;
        Some(SessionSummary {
            session_id: row.session_id.clone(),
            kind: exercise.kind.into(),
            topic: exercise.topic,
            level: exercise.level,
            done,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CursorView {
    pub current_index: usize,
    pub total: usize,
    pub complete: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SummaryView {
    pub overall_score: u8,
    pub accuracy_score: u8,
    pub fluency_score: u8,
    pub vocabulary_score: u8,
    pub grammar_score: u8,
    pub feedback: String,
    pub suggestions: Vec<String>,
}

impl From<FinalSummary> for SummaryView {
    fn from(summary: FinalSummary) -> Self {
        SummaryView {
            overall_score: summary.overall_score,
            accuracy_score: summary.accuracy_score,
            fluency_score: summary.fluency_score,
            vocabulary_score: summary.vocabulary_score,
            grammar_score: summary.grammar_score,
            feedback: summary.feedback,
            suggestions: summary.suggestions,
        }
    }
}

/// Point-in-time view of one session's progress.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionDetail {
    pub session_id: String,
    #[schema(example = "drill")]
    pub kind: SessionKind,
    pub topic: String,
    pub level: String,
    pub source_language: String,
    pub practice_language: String,
    #[schema(example = "active")]
    pub status: SessionStatus,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorView>,
    pub evaluation_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_summary: Option<SummaryView>,
}

impl SessionDetail {
    pub fn from_session(session: &Session) -> Result<Self, EngineError> {
        let exercise = session.exercise()?;
        let cursor = session.cursor()?.map(|c| CursorView {
            current_index: c.current_index,
            total: c.total,
            complete: c.is_complete(),
        });
        Ok(SessionDetail {
            session_id: session.key.session_id.clone(),
            kind: exercise.kind.into(),
            topic: exercise.topic,
            level: exercise.level,
            source_language: exercise.source_language,
            practice_language: exercise.practice_language,
            status: session.workflow_status()?.into(),
            done: session.is_done()?,
            cursor,
            evaluation_count: session.evaluation_history()?.len(),
            final_summary: session.final_summary()?.map(SummaryView::from),
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TurnView {
    #[schema(example = "assistant")]
    pub role: String,
    pub content: String,
    pub order: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TranscriptResponse {
    pub session_id: String,
    pub turns: Vec<TurnView>,
}

impl TranscriptResponse {
    pub fn from_session(session: &Session) -> Result<Self, EngineError> {
        let history = session.history()?;
        let turns = history
            .full()
            .iter()
            .map(|turn| TurnView {
                role: turn.role.to_string(),
                content: turn.content.clone(),
                order: turn.order,
                translation: turn.translation.clone(),
            })
            .collect();
        Ok(TranscriptResponse {
            session_id: session.key.session_id.clone(),
            turns,
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
