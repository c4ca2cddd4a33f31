//! Event routing. Every tag except `user_message` maps to its handler by
//! table lookup. A `user_message` is classified by the model as on-task or
//! off-task against what the session currently expects; any wobble in that
//! call (transport failure, bad JSON, unknown category) is recovered
//! locally by routing to guidance. Routing never mutates the session.

use tracing::warn;

use crate::error::EngineError;
use crate::event::{Event, Source};
use crate::model::{ModelInvoker, ModelRequest};
use crate::prompts;
use crate::schema::{FieldKind, FieldSpec, SchemaDescriptor};
use crate::session::{ExerciseKind, Session, WorkflowStatus};

pub(crate) const CLASSIFY_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    name: "classification",
    fields: &[FieldSpec::required("category", FieldKind::String)],
};

/// Which handler an event resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    Opening,
    Conversation,
    Guidance,
    Evaluation,
    Hint,
    Skip,
    Summary,
}

pub struct Router;

impl Router {
    pub async fn route(
        &self,
        event: &Event,
        session: &Session,
        invoker: &ModelInvoker,
    ) -> Result<RouteTarget, EngineError> {
        Ok(match event.source {
            Source::StartRequest => RouteTarget::Opening,
            Source::HintRequest => RouteTarget::Hint,
            Source::SkipRequest => RouteTarget::Skip,
            Source::FinalSummaryRequest => RouteTarget::Summary,
            Source::UserMessage => self.route_user_message(event, session, invoker).await?,
        })
    }

    async fn route_user_message(
        &self,
        event: &Event,
        session: &Session,
        invoker: &ModelInvoker,
    ) -> Result<RouteTarget, EngineError> {
        if event.payload.trim().is_empty() {
            warn!("blank user message routed to guidance");
            return Ok(RouteTarget::Guidance);
        }

        let exercise = session.exercise()?;
        let (on_task, expected) = match exercise.kind {
            ExerciseKind::Drill => {
                let Some(cursor) = session.cursor()? else {
                    // Nothing to grade against before the opening turn.
                    return Ok(RouteTarget::Guidance);
                };
                if cursor.is_complete() {
                    // Evaluation answers a finished drill idempotently and
                    // without a model call, so classification is pointless.
                    return Ok(RouteTarget::Evaluation);
                }
                let target = session
                    .script()?
                    .and_then(|s| s.targets.get(cursor.current_index).cloned());
                let Some(target) = target else {
                    return Ok(RouteTarget::Guidance);
                };
                (
                    RouteTarget::Evaluation,
                    prompts::expected_task_description(&exercise, Some(&target)),
                )
            }
            ExerciseKind::Roleplay => {
                if session.workflow_status()? == WorkflowStatus::Finished {
                    return Ok(RouteTarget::Conversation);
                }
                (
                    RouteTarget::Conversation,
                    prompts::expected_task_description(&exercise, None),
                )
            }
        };

        match self.classify(event, &expected, invoker).await {
            Ok(true) => Ok(on_task),
            Ok(false) => Ok(RouteTarget::Guidance),
            Err(e) => {
                warn!(error = %e, "classification failed, routing to guidance");
                Ok(RouteTarget::Guidance)
            }
        }
    }

    async fn classify(
        &self,
        event: &Event,
        expected: &str,
        invoker: &ModelInvoker,
    ) -> Result<bool, EngineError> {
        let system = prompts::classification_system(expected, &CLASSIFY_SCHEMA);
        let request = ModelRequest::new(system, event.payload.clone());
        let output = invoker.invoke(request, &CLASSIFY_SCHEMA).await?;
        match output.str("category")? {
            "on_task" => Ok(true),
            "off_task" => Ok(false),
            _ => Err(EngineError::ClassificationAmbiguous),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::handlers::testing;
    use crate::model::{MockModelClient, ModelError};

    fn category(value: &str) -> String {
        json!({ "category": value }).to_string()
    }

    #[tokio::test]
    async fn dedicated_tags_need_no_model() {
        let invoker = testing::invoker(MockModelClient::new());
        let session = testing::session_with(&testing::drill_config(), &[]);
        let cases = [
            (Source::StartRequest, RouteTarget::Opening),
            (Source::HintRequest, RouteTarget::Hint),
            (Source::SkipRequest, RouteTarget::Skip),
            (Source::FinalSummaryRequest, RouteTarget::Summary),
        ];
        for (source, want) in cases {
            let got = Router
                .route(&testing::event(source, ""), &session, &invoker)
                .await
                .unwrap();
            assert_eq!(got, want);
        }
    }

    #[tokio::test]
    async fn blank_message_goes_to_guidance_without_model() {
        let invoker = testing::invoker(MockModelClient::new());
        let session = testing::opened_drill(0);
        let got = Router
            .route(
                &testing::event(Source::UserMessage, "   "),
                &session,
                &invoker,
            )
            .await
            .unwrap();
        assert_eq!(got, RouteTarget::Guidance);
    }

    #[tokio::test]
    async fn on_task_submission_goes_to_evaluation() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(category("on_task")));
        let invoker = testing::invoker(mock);
        let session = testing::opened_drill(0);
        let got = Router
            .route(
                &testing::event(Source::UserMessage, "I go to the market."),
                &session,
                &invoker,
            )
            .await
            .unwrap();
        assert_eq!(got, RouteTarget::Evaluation);
    }

    #[tokio::test]
    async fn off_task_message_goes_to_guidance() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(category("off_task")));
        let invoker = testing::invoker(mock);
        let session = testing::opened_drill(0);
        let got = Router
            .route(
                &testing::event(Source::UserMessage, "What does 'chợ' mean?"),
                &session,
                &invoker,
            )
            .await
            .unwrap();
        assert_eq!(got, RouteTarget::Guidance);
    }

    #[tokio::test]
    async fn unknown_category_recovers_to_guidance() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(category("maybe")));
        let invoker = testing::invoker(mock);
        let session = testing::opened_drill(0);
        let got = Router
            .route(
                &testing::event(Source::UserMessage, "I go to the market."),
                &session,
                &invoker,
            )
            .await
            .unwrap();
        assert_eq!(got, RouteTarget::Guidance);
    }

    #[tokio::test]
    async fn model_failure_recovers_to_guidance() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Err(ModelError::Provider("quota exhausted".into())));
        let invoker = testing::invoker(mock);
        let session = testing::opened_drill(0);
        let got = Router
            .route(
                &testing::event(Source::UserMessage, "I go to the market."),
                &session,
                &invoker,
            )
            .await
            .unwrap();
        assert_eq!(got, RouteTarget::Guidance);
    }

    #[tokio::test]
    async fn message_before_opening_goes_to_guidance() {
        let invoker = testing::invoker(MockModelClient::new());
        let session = testing::session_with(&testing::drill_config(), &[]);
        let got = Router
            .route(
                &testing::event(Source::UserMessage, "Hello?"),
                &session,
                &invoker,
            )
            .await
            .unwrap();
        assert_eq!(got, RouteTarget::Guidance);
    }

    #[tokio::test]
    async fn finished_drill_submission_skips_classification() {
        let invoker = testing::invoker(MockModelClient::new());
        let session = testing::opened_drill(3);
        let got = Router
            .route(
                &testing::event(Source::UserMessage, "One more try?"),
                &session,
                &invoker,
            )
            .await
            .unwrap();
        assert_eq!(got, RouteTarget::Evaluation);
    }

    #[tokio::test]
    async fn on_task_roleplay_goes_to_conversation() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(category("on_task")));
        let invoker = testing::invoker(mock);
        let session = testing::opened_roleplay();
        let got = Router
            .route(
                &testing::event(Source::UserMessage, "Tôi muốn mua xoài."),
                &session,
                &invoker,
            )
            .await
            .unwrap();
        assert_eq!(got, RouteTarget::Conversation);
    }

    #[tokio::test]
    async fn finished_roleplay_skips_classification() {
        let invoker = testing::invoker(MockModelClient::new());
        let session = testing::session_with(
            &testing::roleplay_config(),
            &[(crate::state::keys::WORKFLOW_STATUS, json!("finished"))],
        );
        let got = Router
            .route(
                &testing::event(Source::UserMessage, "Còn đó không?"),
                &session,
                &invoker,
            )
            .await
            .unwrap();
        assert_eq!(got, RouteTarget::Conversation);
    }
}
