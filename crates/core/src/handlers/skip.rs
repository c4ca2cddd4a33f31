//! Skip requests. A drill skip is pure bookkeeping: advance the cursor and
//! present whatever comes next, no model involved. A roleplay skip hands
//! the turn back to the model so the scene moves without learner input.

use async_trait::async_trait;

use super::{Handler, HandlerContext, HandlerOutcome, REPLY_SCHEMA, Reply};
use crate::error::EngineError;
use crate::event::Event;
use crate::model::ModelRequest;
use crate::progress::Advance;
use crate::prompts;
use crate::session::{ExerciseConfig, ExerciseKind, Session, WorkflowStatus};
use crate::state::{StateDelta, keys};

pub struct SkipHandler;

#[async_trait]
impl Handler for SkipHandler {
    async fn handle(
        &self,
        _event: &Event,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, EngineError> {
        let exercise = session.exercise()?;
        match exercise.kind {
            ExerciseKind::Drill => skip_drill(&exercise, session),
            ExerciseKind::Roleplay => skip_roleplay(&exercise, session, ctx).await,
        }
    }
}

fn skip_drill(
    exercise: &ExerciseConfig,
    session: &Session,
) -> Result<HandlerOutcome, EngineError> {
    let Some(mut cursor) = session.cursor()? else {
        return Ok(HandlerOutcome::unchanged(Reply::text(
            "Nothing to skip yet. Start the exercise first.",
        )));
    };
    if cursor.is_complete() {
        return Ok(HandlerOutcome::unchanged(
            Reply::text(prompts::drill_complete_message()).done(true),
        ));
    }
    let script = session.script()?.ok_or_else(|| {
        EngineError::InvalidProgressTransition("cursor present but script missing".into())
    })?;
    let skipped_number = cursor.current_index + 1;

    let text = match cursor.advance()? {
        Advance::Moved => {
            let next = script.targets.get(cursor.current_index).ok_or_else(|| {
                EngineError::InvalidProgressTransition(format!(
                    "cursor index {} outside script of {} targets",
                    cursor.current_index,
                    script.targets.len()
                ))
            })?;
            let prompt =
                prompts::target_prompt(exercise, cursor.current_index, cursor.total, next);
            format!("Sentence {skipped_number} skipped.\n\n{prompt}")
        }
        Advance::Completed | Advance::AlreadyComplete => {
            format!(
                "Sentence {skipped_number} skipped.\n\n{}",
                prompts::drill_complete_message()
            )
        }
    };

    let mut history = session.history()?;
    history.append_assistant(&text, None);
    let mut delta = StateDelta::new();
    delta.set_typed(keys::CURSOR, &cursor)?;
    history.write_into(&mut delta)?;
    Ok(HandlerOutcome {
        reply: Reply::text(text).done(cursor.is_complete()),
        delta,
    })
}

async fn skip_roleplay(
    exercise: &ExerciseConfig,
    session: &Session,
    ctx: &HandlerContext<'_>,
) -> Result<HandlerOutcome, EngineError> {
    if session.workflow_status()? == WorkflowStatus::Finished {
        return Ok(HandlerOutcome::unchanged(
            Reply::text(prompts::scene_closed_message()).done(true),
        ));
    }

    let mut history = session.history()?;
    let system = prompts::roleplay_system(exercise, &REPLY_SCHEMA);
    let request = ModelRequest::new(system, prompts::skip_payload())
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing;
    use super::*;
    use crate::event::Source;
    use crate::history::{Role, Turn};
    use crate::model::MockModelClient;
    use crate::progress::ProgressCursor;

    #[tokio::test]
    async fn drill_skip_advances_without_model() {
        let mock = MockModelClient::new(); // any call would panic
        let invoker = testing::invoker(mock);
        let config = testing::config();
        let ctx = HandlerContext {
            invoker: &invoker,
            config: &config,
        };
        let session = testing::opened_drill(0);

        let outcome = SkipHandler
            .handle(&testing::event(Source::SkipRequest, ""), &session, &ctx)
            .await
            .unwrap();

        let cursor: ProgressCursor =
            serde_json::from_value(testing::delta_value(&outcome.delta, keys::CURSOR).unwrap())
                .unwrap();
        assert_eq!(cursor.current_index, 1);
        assert!(outcome.reply.text.contains("Sentence 1 skipped."));
        assert!(outcome.reply.text.contains("Tôi mua rau."));
        assert!(!outcome.reply.done);

        let turns: Vec<Turn> =
            serde_json::from_value(testing::delta_value(&outcome.delta, keys::HISTORY).unwrap())
                .unwrap();
        assert_eq!(turns.len(), 2);
        assert!(turns.iter().all(|t| t.role == Role::Assistant));
    }

    #[tokio::test]
    async fn skipping_last_target_completes() {
        let mock = MockModelClient::new();
        let invoker = testing::invoker(mock);
        let config = testing::config();
        let ctx = HandlerContext {
            invoker: &invoker,
            config: &config,
        };
        let session = testing::opened_drill(2);

        let outcome = SkipHandler
            .handle(&testing::event(Source::SkipRequest, ""), &session, &ctx)
            .await
            .unwrap();

        assert!(outcome.reply.done);
        assert!(outcome.reply.text.contains("exercise is complete"));
        let cursor: ProgressCursor =
            serde_json::from_value(testing::delta_value(&outcome.delta, keys::CURSOR).unwrap())
                .unwrap();
        assert!(cursor.is_complete());
    }

    #[tokio::test]
    async fn skip_before_opening_is_a_noop() {
        let mock = MockModelClient::new();
        let invoker = testing::invoker(mock);
        let config = testing::config();
        let ctx = HandlerContext {
            invoker: &invoker,
            config: &config,
        };
        let session = testing::session_with(&testing::drill_config(), &[]);

        let outcome = SkipHandler
            .handle(&testing::event(Source::SkipRequest, ""), &session, &ctx)
            .await
            .unwrap();

        assert!(outcome.reply.text.contains("Nothing to skip"));
        assert!(outcome.delta.is_empty());
    }

    #[tokio::test]
    async fn skip_after_completion_is_idempotent() {
        let mock = MockModelClient::new();
        let invoker = testing::invoker(mock);
        let config = testing::config();
        let ctx = HandlerContext {
            invoker: &invoker,
            config: &config,
        };
        let session = testing::opened_drill(3);

        let outcome = SkipHandler
            .handle(&testing::event(Source::SkipRequest, ""), &session, &ctx)
            .await
            .unwrap();

        assert!(outcome.reply.done);
        assert_eq!(outcome.reply.text, prompts::drill_complete_message());
        assert!(outcome.delta.is_empty());
    }

    #[tokio::test]
    async fn roleplay_skip_generates_fresh_line() {
        let response = json!({
            "response_text": "Không sao! Vậy cô giới thiệu nhé: xoài cát hôm nay rất tươi.",
        })
        .to_string();
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .withf(|req| req.user == prompts::skip_payload())
            .returning(move |_| Ok(response.clone()));
        let invoker = testing::invoker(mock);
        let config = testing::config();
        let ctx = HandlerContext {
            invoker: &invoker,
            config: &config,
        };
        let session = testing::opened_roleplay();

        let outcome = SkipHandler
            .handle(&testing::event(Source::SkipRequest, ""), &session, &ctx)
            .await
            .unwrap();

        assert!(outcome.reply.text.starts_with("Không sao!"));
        let turns: Vec<Turn> =
            serde_json::from_value(testing::delta_value(&outcome.delta, keys::HISTORY).unwrap())
                .unwrap();
        assert_eq!(turns.len(), 2);
        assert!(turns.iter().all(|t| t.role == Role::Assistant));
        assert_eq!(turns[1].order, 2);
    }
}
