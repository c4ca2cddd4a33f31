//! On-task roleplay turn: the learner's line goes to the model in
//! character, both turns land in the history, and the model may close the
//! scene by setting `is_done`.

use async_trait::async_trait;

use super::{Handler, HandlerContext, HandlerOutcome, REPLY_SCHEMA, Reply};
use crate::error::EngineError;
use crate::event::Event;
use crate::model::ModelRequest;
use crate::prompts;
use crate::session::{Session, WorkflowStatus};
use crate::state::{StateDelta, keys};

pub struct ConversationHandler;

#[async_trait]
impl Handler for ConversationHandler {
    async fn handle(
        &self,
        event: &Event,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, EngineError> {
        let exercise = session.exercise()?;
        if session.workflow_status()? == WorkflowStatus::Finished {
            return Ok(HandlerOutcome::unchanged(
                Reply::text(prompts::scene_closed_message()).done(true),
            ));
        }

        let mut history = session.history()?;
        let system = prompts::roleplay_system(&exercise, &REPLY_SCHEMA);
        let request = ModelRequest::new(system, event.payload.clone())
            .with_history(history.recent(ctx.config.history_window));
        let output = ctx.invoker.invoke(request, &REPLY_SCHEMA).await?;
        let text = output.str("response_text")?.to_string();
        if text.trim().is_empty() {
            return Err(EngineError::GenerationFailed(
                "model returned an empty reply".into(),
            ));
        }
        let translation = output.opt_str("translation").map(str::to_string);
        let done = output.bool_or("is_done", false);

        history.append_user(&event.payload);
        history.append_assistant(&text, translation);
        let mut delta = StateDelta::new();
        history.write_into(&mut delta)?;
        if done {
            delta.set_typed(keys::WORKFLOW_STATUS, &WorkflowStatus::Finished)?;
        }
        Ok(HandlerOutcome {
            reply: Reply::text(text).done(done),
            delta,
        })
    }
}
