//! Off-task turn: questions, confusion and side chatter get a tutor-style
//! answer anchored to the most recent assistant message. Guidance never
//! moves the cursor and never writes an evaluation.

use async_trait::async_trait;

use super::{Handler, HandlerContext, HandlerOutcome, Reply};
use crate::error::EngineError;
use crate::event::Event;
use crate::model::ModelRequest;
use crate::prompts;
use crate::schema::{FieldKind, FieldSpec, SchemaDescriptor};
use crate::session::Session;
use crate::state::StateDelta;

pub(crate) const GUIDANCE_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    name: "guidance",
    fields: &[FieldSpec::required("response_text", FieldKind::String)],
};

pub struct GuidanceHandler;

#[async_trait]
impl Handler for GuidanceHandler {
    async fn handle(
        &self,
        event: &Event,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, EngineError> {
        let exercise = session.exercise()?;
        let mut history = session.history()?;
        let last = history.last_assistant().map(|t| t.content.clone());
        let system = prompts::guidance_system(&exercise, last.as_deref(), &GUIDANCE_SCHEMA);
        let request = ModelRequest::new(system, event.payload.clone())
            .with_history(history.recent(ctx.config.history_window));
        let output = ctx.invoker.invoke(request, &GUIDANCE_SCHEMA).await?;
        let text = output.str("response_text")?.to_string();
        if text.trim().is_empty() {
            return Err(EngineError::GenerationFailed(
                "model returned an empty answer".into(),
            ));
        }

        history.append_user(&event.payload);
        history.append_assistant(&text, None);
        let mut delta = StateDelta::new();
        history.write_into(&mut delta)?;
        Ok(HandlerOutcome {
            reply: Reply::text(text).done(session.is_done()?),
            delta,
        })
    }
}
