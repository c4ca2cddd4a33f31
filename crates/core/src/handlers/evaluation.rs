//! On-task drill submission: grade it against the current target, record
//! the outcome, and advance the cursor when the score clears the
//! acceptance threshold. The cursor is the single source of progression
//! truth; a submission against a finished drill costs no model call.

use async_trait::async_trait;

use super::{Handler, HandlerContext, HandlerOutcome, Reply};
use crate::error::EngineError;
use crate::event::Event;
use crate::model::ModelRequest;
use crate::progress::Advance;
use crate::prompts;
use crate::schema::{FieldKind, FieldSpec, SchemaDescriptor};
use crate::session::{EvaluationRecord, Session, Verdict};
use crate::state::{StateDelta, keys};

pub(crate) const EVALUATION_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    name: "evaluation",
    fields: &[
        FieldSpec::required("score", FieldKind::Number),
        FieldSpec::required("feedback", FieldKind::String),
    ],
};

pub struct EvaluationHandler;

#[async_trait]
impl Handler for EvaluationHandler {
    async fn handle(
        &self,
        event: &Event,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, EngineError> {
        let exercise = session.exercise()?;
        let mut cursor = session.cursor()?.ok_or_else(|| {
            EngineError::InvalidProgressTransition(
                "submission received before the exercise was opened".into(),
            )
        })?;
        if cursor.is_complete() {
            return Ok(HandlerOutcome::unchanged(
                Reply::text(prompts::drill_complete_message()).done(true),
            ));
        }
        let script = session.script()?.ok_or_else(|| {
            EngineError::InvalidProgressTransition("cursor present but script missing".into())
        })?;
        let target = script.targets.get(cursor.current_index).ok_or_else(|| {
            EngineError::InvalidProgressTransition(format!(
                "cursor index {} outside script of {} targets",
                cursor.current_index,
                script.targets.len()
            ))
        })?;

        let mut history = session.history()?;
        let system = prompts::evaluation_system(&exercise, target, &EVALUATION_SCHEMA);
        let request = ModelRequest::new(system, event.payload.clone())
            .with_history(history.recent(ctx.config.history_window));
        let output = ctx.invoker.invoke(request, &EVALUATION_SCHEMA).await?;
        let raw_score = output.number("score")?;
        if !(0.0..=100.0).contains(&raw_score) {
            return Err(EngineError::GenerationFailed(format!(
                "score {raw_score} outside 0..=100"
            )));
        }
        let score = raw_score.round() as u8;
        let feedback = output.str("feedback")?.to_string();
        let passed = score >= ctx.config.acceptance_threshold;

        let mut records = session.evaluation_history()?;
        records.push(EvaluationRecord {
            target_index: cursor.current_index,
            input: event.payload.clone(),
            verdict: if passed { Verdict::Pass } else { Verdict::Fail },
            score,
            feedback: feedback.clone(),
        });

        let text = if passed {
            match cursor.advance()? {
                Advance::Moved => {
                    let next = script.targets.get(cursor.current_index).ok_or_else(|| {
                        EngineError::InvalidProgressTransition(format!(
                            "cursor index {} outside script of {} targets",
                            cursor.current_index,
                            script.targets.len()
                        ))
                    })?;
                    let prompt = prompts::target_prompt(
                        &exercise,
                        cursor.current_index,
                        cursor.total,
                        next,
                    );
                    format!("{feedback}\n\n{prompt}")
                }
                Advance::Completed | Advance::AlreadyComplete => {
                    format!("{feedback}\n\n{}", prompts::drill_complete_message())
                }
            }
        } else {
            format!("{feedback}\n\n{}", prompts::retry_message())
        };

        history.append_user(&event.payload);
        history.append_assistant(&text, None);

        let mut delta = StateDelta::new();
        delta.set_typed(keys::CURSOR, &cursor)?;
        delta.set_typed(keys::EVALUATION_HISTORY, &records)?;
        history.write_into(&mut delta)?;
        Ok(HandlerOutcome {
            reply: Reply::text(text).done(cursor.is_complete()),
            delta,
        })
    }
}
