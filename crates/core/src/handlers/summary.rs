//! Final summary: one model call over the evaluation history and the full
//! transcript produces per-dimension scores and a wrap-up paragraph. Each
//! request recomputes and overwrites the stored summary, so a learner who
//! keeps practicing gets a fresh review.

use async_trait::async_trait;

use super::{Handler, HandlerContext, HandlerOutcome, Reply};
use crate::error::EngineError;
use crate::event::Event;
use crate::model::ModelRequest;
use crate::prompts;
use crate::schema::{FieldKind, FieldSpec, SchemaDescriptor, StructuredOutput};
use crate::session::{FinalSummary, Session};
use crate::state::{StateDelta, keys};

pub(crate) const SUMMARY_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    name: "summary",
    fields: &[
        FieldSpec::required("overall_score", FieldKind::Number),
        FieldSpec::required("accuracy_score", FieldKind::Number),
        FieldSpec::required("fluency_score", FieldKind::Number),
        FieldSpec::required("vocabulary_score", FieldKind::Number),
        FieldSpec::required("grammar_score", FieldKind::Number),
        FieldSpec::required("feedback", FieldKind::String),
        FieldSpec::required("suggestions", FieldKind::StringArray),
    ],
};

pub struct SummaryHandler;

#[async_trait]
impl Handler for SummaryHandler {
    async fn handle(
        &self,
        _event: &Event,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, EngineError> {
        let exercise = session.exercise()?;
        let history = session.history()?;
        let records = session.evaluation_history()?;
        if history.is_empty() && records.is_empty() {
            return Ok(HandlerOutcome::unchanged(Reply::text(
                "Nothing to summarize yet.",
            )));
        }

        let system = prompts::summary_system(&exercise, &SUMMARY_SCHEMA);
        let payload = prompts::summary_payload(&records, history.full());
        let output = ctx
            .invoker
            .invoke(ModelRequest::new(system, payload), &SUMMARY_SCHEMA)
            .await?;

        let summary = FinalSummary {
            overall_score: score_field(&output, "overall_score")?,
            accuracy_score: score_field(&output, "accuracy_score")?,
            fluency_score: score_field(&output, "fluency_score")?,
            vocabulary_score: score_field(&output, "vocabulary_score")?,
            grammar_score: score_field(&output, "grammar_score")?,
            feedback: output.str("feedback")?.to_string(),
            suggestions: output.str_array("suggestions")?,
        };

        let mut delta = StateDelta::new();
        delta.set_typed(keys::FINAL_SUMMARY, &summary)?;
        Ok(HandlerOutcome {
            reply: Reply::text(summary.feedback).done(session.is_done()?),
            delta,
        })
    }
}

fn score_field(output: &StructuredOutput, name: &'static str) -> Result<u8, EngineError> {
    let raw = output.number(name)?;
    if !(0.0..=100.0).contains(&raw) {
        return Err(EngineError::GenerationFailed(format!(
            "{name} {raw} outside 0..=100"
        )));
    }
    Ok(raw.round() as u8)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing;
    use super::*;
    use crate::event::Source;
    use crate::model::MockModelClient;

    fn summary_json(overall: f64) -> String {
        json!({
            "overall_score": overall,
            "accuracy_score": 82,
            "fluency_score": 75,
            "vocabulary_score": 88,
            "grammar_score": 79,
            "feedback": "Solid session with steady accuracy.",
            "suggestions": ["Review past tense forms.", "Practice market vocabulary."],
        })
        .to_string()
    }

    #[tokio::test]
    async fn produces_scores_and_stores_summary() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(summary_json(81.0)));
        let invoker = testing::invoker(mock);
        let config = testing::config();
        let ctx = HandlerContext {
            invoker: &invoker,
            config: &config,
        };
        let mut session = testing::opened_drill(3);
        session.state.insert(
            keys::EVALUATION_HISTORY.into(),
            json!([{
                "target_index": 0,
                "input": "I go to the market.",
                "verdict": "pass",
                "score": 95,
                "feedback": "Good."
            }]),
        );

        let outcome = SummaryHandler
            .handle(
                &testing::event(Source::FinalSummaryRequest, ""),
                &session,
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(outcome.reply.text, "Solid session with steady accuracy.");
        assert!(outcome.reply.done);
        let summary: FinalSummary = serde_json::from_value(
            testing::delta_value(&outcome.delta, keys::FINAL_SUMMARY).unwrap(),
        )
        .unwrap();
        assert_eq!(summary.overall_score, 81);
        assert_eq!(summary.suggestions.len(), 2);
    }

    #[tokio::test]
    async fn empty_session_has_nothing_to_summarize() {
        let mock = MockModelClient::new(); // any call would panic
        let invoker = testing::invoker(mock);
        let config = testing::config();
        let ctx = HandlerContext {
            invoker: &invoker,
            config: &config,
        };
        let session = testing::session_with(&testing::drill_config(), &[]);

        let outcome = SummaryHandler
            .handle(
                &testing::event(Source::FinalSummaryRequest, ""),
                &session,
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(outcome.reply.text, "Nothing to summarize yet.");
        assert!(outcome.delta.is_empty());
    }

    #[tokio::test]
    async fn repeat_request_recomputes_and_overwrites() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(summary_json(90.0)));
        let invoker = testing::invoker(mock);
        let config = testing::config();
        let ctx = HandlerContext {
            invoker: &invoker,
            config: &config,
        };
        let mut session = testing::opened_drill(3);
        session.state.insert(
            keys::FINAL_SUMMARY.into(),
            json!({
                "overall_score": 50,
                "accuracy_score": 50,
                "fluency_score": 50,
                "vocabulary_score": 50,
                "grammar_score": 50,
                "feedback": "Stale.",
                "suggestions": [],
            }),
        );

        let outcome = SummaryHandler
            .handle(
                &testing::event(Source::FinalSummaryRequest, ""),
                &session,
                &ctx,
            )
            .await
            .unwrap();

        let summary: FinalSummary = serde_json::from_value(
            testing::delta_value(&outcome.delta, keys::FINAL_SUMMARY).unwrap(),
        )
        .unwrap();
        assert_eq!(summary.overall_score, 90);
    }

    #[tokio::test]
    async fn out_of_range_dimension_score_rejected() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(summary_json(120.0)));
        let invoker = testing::invoker(mock);
        let config = testing::config();
        let ctx = HandlerContext {
            invoker: &invoker,
            config: &config,
        };
        let session = testing::opened_drill(3);

        let err = SummaryHandler
            .handle(
                &testing::event(Source::FinalSummaryRequest, ""),
                &session,
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::GenerationFailed(_)));
    }
}
