//! Turn handlers. The router picks one of these per event; each handler
//! reads an immutable session snapshot and returns a reply plus the state
//! delta to commit. Handlers never write to the store themselves.

pub mod conversation;
pub mod evaluation;
pub mod guidance;
pub mod hint;
pub mod opening;
pub mod skip;
pub mod summary;

use async_trait::async_trait;

use crate::engine::EngineConfig;
use crate::error::EngineError;
use crate::event::Event;
use crate::model::ModelInvoker;
use crate::schema::{FieldKind, FieldSpec, SchemaDescriptor};
use crate::session::Session;
use crate::state::StateDelta;

/// Conversational reply shape shared by the opening turn, roleplay
/// conversation and roleplay skip: the line itself, an optional gloss in
/// the learner's language, and whether the model chose to end the scene.
pub(crate) const REPLY_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    name: "reply",
    fields: &[
        FieldSpec::required("response_text", FieldKind::String),
        FieldSpec::optional("translation", FieldKind::String),
        FieldSpec::optional("is_done", FieldKind::Bool),
    ],
};

/// What a handler produced for one event.
#[derive(Debug)]
pub struct HandlerOutcome {
    pub reply: Reply,
    pub delta: StateDelta,
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub done: bool,
    pub degraded: bool,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
            degraded: false,
        }
    }

    pub fn done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }
}

impl HandlerOutcome {
    /// A reply that changes nothing, for idempotent re-sends.
    pub fn unchanged(reply: Reply) -> Self {
        Self {
            reply,
            delta: StateDelta::new(),
        }
    }
}

/// Shared dependencies passed to every handler invocation.
pub struct HandlerContext<'a> {
    pub invoker: &'a ModelInvoker,
    pub config: &'a EngineConfig,
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        event: &Event,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, EngineError>;
}
