//! Opening turn. For a drill this is the expensive path: generate the
//! passage through the refinement loop, segment it, seed the cursor and
//! present the first target. For a roleplay it is one model call for the
//! opening line. Repeated start requests replay the existing opening
//! instead of regenerating anything.

use async_trait::async_trait;
use tracing::warn;

use super::{Handler, HandlerContext, HandlerOutcome, REPLY_SCHEMA, Reply};
use crate::error::EngineError;
use crate::event::Event;
use crate::history::{HistoryWindow, Role, Turn};
use crate::model::{ModelInvoker, ModelRequest};
use crate::progress::ProgressCursor;
use crate::prompts;
use crate::refine::{Drafter, RefinementLoop, WordCountReviewer};
use crate::schema::{FieldKind, FieldSpec, SchemaDescriptor};
use crate::session::{ExerciseConfig, ExerciseKind, ExerciseScript, Session};
use crate::state::{StateDelta, keys};

pub(crate) const PASSAGE_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    name: "passage",
    fields: &[
        FieldSpec::required("full_text", FieldKind::String),
        FieldSpec::required("sentences", FieldKind::StringArray),
    ],
};

pub struct OpeningHandler;

#[async_trait]
impl Handler for OpeningHandler {
    async fn handle(
        &self,
        _event: &Event,
        session: &Session,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, EngineError> {
        let exercise = session.exercise()?;
        let history = session.history()?;
        if !history.is_empty() {
            // Already opened: replay the last assistant turn as-is.
            let text = history
                .last_assistant()
                .map(|t| t.content.clone())
                .unwrap_or_default();
            return Ok(HandlerOutcome::unchanged(
                Reply::text(text).done(session.is_done()?),
            ));
        }
        match exercise.kind {
            ExerciseKind::Drill => open_drill(&exercise, history, ctx).await,
            ExerciseKind::Roleplay => open_roleplay(&exercise, history, ctx).await,
        }
    }
}

async fn open_drill(
    exercise: &ExerciseConfig,
    mut history: HistoryWindow,
    ctx: &HandlerContext<'_>,
) -> Result<HandlerOutcome, EngineError> {
    let words = exercise
        .target_word_count
        .unwrap_or(ctx.config.default_target_words);
    let mut drafter = PassageDrafter {
        invoker: ctx.invoker,
        system: prompts::passage_system(exercise, &PASSAGE_SCHEMA),
        topic: exercise.topic.clone(),
        words,
        script: None,
    };
    let reviewer = WordCountReviewer::new(words);
    let refine = RefinementLoop::new(ctx.config.max_refine_iterations);
    let report = refine.run(&mut drafter, &reviewer).await?;
    let script = drafter
        .script
        .ok_or_else(|| EngineError::GenerationFailed("no passage drafted".into()))?;
    if script.targets.is_empty() {
        return Err(EngineError::GenerationFailed(
            "generated passage has no sentences".into(),
        ));
    }
    if !report.accepted {
        warn!(
            iterations = report.iterations,
            target_words = words,
            "passage kept after refinement cap"
        );
    }

    let cursor = ProgressCursor::new(script.targets.len());
    let first = prompts::target_prompt(exercise, 0, script.targets.len(), &script.targets[0]);
    history.append_assistant(&first, None);

    let mut delta = StateDelta::new();
    delta.set_typed(keys::SCRIPT, &script)?;
    delta.set_typed(keys::CURSOR, &cursor)?;
    history.write_into(&mut delta)?;
    Ok(HandlerOutcome {
        reply: Reply::text(first).degraded(!report.accepted),
        delta,
    })
}

async fn open_roleplay(
    exercise: &ExerciseConfig,
    mut history: HistoryWindow,
    ctx: &HandlerContext<'_>,
) -> Result<HandlerOutcome, EngineError> {
    let system = prompts::roleplay_system(exercise, &REPLY_SCHEMA);
    let request = ModelRequest::new(system, prompts::roleplay_opening_payload());
    let output = ctx.invoker.invoke(request, &REPLY_SCHEMA).await?;
    let text = output.str("response_text")?.to_string();
    if text.trim().is_empty() {
        return Err(EngineError::GenerationFailed(
            "model returned an empty opening line".into(),
        ));
    }
    let translation = output.opt_str("translation").map(str::to_string);
    history.append_assistant(&text, translation);

    let mut delta = StateDelta::new();
    history.write_into(&mut delta)?;
    Ok(HandlerOutcome {
        reply: Reply::text(text),
        delta,
    })
}

/// Drives passage generation for the refinement loop. Each call replaces
/// the held script, so after the loop finishes the script always matches
/// the report's final candidate.
struct PassageDrafter<'a> {
    invoker: &'a ModelInvoker,
    system: String,
    topic: String,
    words: usize,
    script: Option<ExerciseScript>,
}

impl PassageDrafter<'_> {
    async fn send(&mut self, request: ModelRequest) -> Result<String, EngineError> {
        let output = self.invoker.invoke(request, &PASSAGE_SCHEMA).await?;
        let full_text = output.str("full_text")?.to_string();
        let targets = output.str_array("sentences")?;
        self.script = Some(ExerciseScript {
            full_text: full_text.clone(),
            targets,
        });
        Ok(full_text)
    }
}

#[async_trait]
impl Drafter for PassageDrafter<'_> {
    async fn draft(&mut self) -> Result<String, EngineError> {
        let payload = prompts::passage_payload(&self.topic, self.words);
        self.send(ModelRequest::new(self.system.clone(), payload)).await
    }

    async fn revise(&mut self, prior: &str, feedback: &str) -> Result<String, EngineError> {
        // The model is stateless between calls, so the prior candidate
        // rides along as an assistant turn.
        let prior_turn = Turn {
            role: Role::Assistant,
            content: prior.to_string(),
            order: 1,
            translation: None,
        };
        let request = ModelRequest::new(
            self.system.clone(),
            prompts::passage_revision_payload(feedback),
        )
        .with_history(&[prior_turn]);
        self.send(request).await
    }
}
