//! Hint requests. Hints are keyed by the order of the last assistant turn:
//! as long as the conversation has not moved, repeated requests replay the
//! stored hint byte for byte instead of paying for another generation.
//! Hints live in their own cache and never enter the history.

use async_trait::async_trait;

use super::{Handler, HandlerContext, HandlerOutcome, Reply};
use crate::error::EngineError;
use crate::event::Event;
use crate::model::ModelRequest;
use crate::prompts;
use crate::schema::{FieldKind, FieldSpec, SchemaDescriptor};
use crate::session::{ExerciseKind, Session};
use crate::state::{StateDelta, keys};

pub(crate) const HINT_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    name: "hint",
    fields: &[FieldSpec::required("hint_text", FieldKind::String)],
};

pub struct HintHandler;

#[async_trait]
impl Handler for HintHandler {
    async fn handle(
        &self,
        _event: &Event,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, EngineError> {
        let exercise = session.exercise()?;
        if session.is_done()? {
            let text = match exercise.kind {
                ExerciseKind::Drill => prompts::drill_complete_message(),
                ExerciseKind::Roleplay => prompts::scene_closed_message(),
            };
            return Ok(HandlerOutcome::unchanged(Reply::text(text).done(true)));
        }

        let history = session.history()?;
        let cache_key = history.last_assistant_order().to_string();
        let mut cache = session.hint_cache()?;
        if let Some(hit) = cache.get(&cache_key) {
            return Ok(HandlerOutcome::unchanged(Reply::text(hit.clone())));
        }

        let focus = match exercise.kind {
            ExerciseKind::Drill => current_target(session)?,
            ExerciseKind::Roleplay => None,
        }
        .or_else(|| history.last_assistant().map(|t| t.content.clone()))
        .unwrap_or_else(|| exercise.topic.clone());

        let system = prompts::hint_system(&exercise, &focus, &HINT_SCHEMA);
        let request = ModelRequest::new(system, prompts::hint_payload());
        let output = ctx.invoker.invoke(request, &HINT_SCHEMA).await?;
        let hint = output.str("hint_text")?.to_string();
        if hint.trim().is_empty() {
            return Err(EngineError::GenerationFailed(
                "model returned an empty hint".into(),
            ));
        }

        cache.insert(cache_key, hint.clone());
        let mut delta = StateDelta::new();
        delta.set_typed(keys::HINT_CACHE, &cache)?;
        Ok(HandlerOutcome {
            reply: Reply::text(hint),
            delta,
        })
    }
}

fn current_target(session: &Session) -> Result<Option<String>, EngineError> {
    let Some(cursor) = session.cursor()? else {
        return Ok(None);
    };
    let Some(script) = session.script()? else {
        return Ok(None);
    };
    Ok(script.targets.get(cursor.current_index).cloned())
}
