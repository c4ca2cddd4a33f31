//! The engine front door. One event comes in, the session's exclusive
//! lease is taken, the router picks a handler, the handler's state delta
//! is committed, and a reply goes out. Everything a caller needs lives
//! behind [`PracticeEngine::dispatch`] and [`PracticeEngine::try_dispatch`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::error::EngineError;
use crate::event::{EngineResponse, Event, Source};
use crate::handlers::{
    Handler, HandlerContext, conversation::ConversationHandler, evaluation::EvaluationHandler,
    guidance::GuidanceHandler, hint::HintHandler, opening::OpeningHandler, skip::SkipHandler,
    summary::SummaryHandler,
};
use crate::model::{ModelClient, ModelInvoker};
use crate::router::{RouteTarget, Router};
use crate::session::{ExerciseConfig, Session, SessionKey};
use crate::store::{SessionBackend, SessionStore};

/// Engine-wide knobs. Defaults match how the hosted service runs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum score for a drill submission to advance the cursor.
    pub acceptance_threshold: u8,
    /// How many recent turns ride along on conversational model calls.
    pub history_window: usize,
    /// Hard cap on passage generate/review/revise rounds.
    pub max_refine_iterations: u32,
    pub model_timeout: Duration,
    /// Extra attempts after a transport failure or timeout.
    pub model_retries: u32,
    /// Passage length when the exercise does not pin one.
    pub default_target_words: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 90,
            history_window: 10,
            max_refine_iterations: 5,
            model_timeout: Duration::from_secs(30),
            model_retries: 1,
            default_target_words: 300,
        }
    }
}

/// Out-of-band context accompanying one event. Carries the exercise
/// configuration for a `start_request` that creates its session; ignored
/// once the session exists.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub exercise: Option<ExerciseConfig>,
}

enum Admission {
    Wait,
    Reject,
}

pub struct PracticeEngine {
    store: SessionStore,
    invoker: ModelInvoker,
    router: Router,
    config: EngineConfig,
}

impl PracticeEngine {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        model: Arc<dyn ModelClient>,
        config: EngineConfig,
    ) -> Self {
        let invoker = ModelInvoker::new(model, config.model_timeout, config.model_retries);
        Self {
            store: SessionStore::new(backend),
            invoker,
            router: Router,
            config,
        }
    }

    /// Handles one event, waiting in line while the session is busy.
    /// Queued events run strictly in arrival order.
    pub async fn dispatch(
        &self,
        event: Event,
        ctx: EventContext,
    ) -> Result<EngineResponse, EngineError> {
        self.process(event, ctx, Admission::Wait).await
    }

    /// Handles one event, failing fast with [`EngineError::SessionBusy`]
    /// when another event currently holds the session.
    pub async fn try_dispatch(
        &self,
        event: Event,
        ctx: EventContext,
    ) -> Result<EngineResponse, EngineError> {
        self.process(event, ctx, Admission::Reject).await
    }

    /// Read-only view of a session's current state.
    pub async fn snapshot(&self, key: &SessionKey) -> Result<Session, EngineError> {
        self.store.snapshot(key).await
    }

    #[instrument(
        skip_all,
        fields(session = %event.session_id, source = %event.source)
    )]
    async fn process(
        &self,
        event: Event,
        ctx: EventContext,
        admission: Admission,
    ) -> Result<EngineResponse, EngineError> {
        let key = event.key();
        // Creation runs before the lease so the slot (and its lease) exist.
        // An existing session is returned untouched.
        if event.source == Source::StartRequest {
            if let Some(exercise) = &ctx.exercise {
                let initial = Session::initial_state(exercise)?;
                self.store.get_or_create(&key, initial).await?;
            }
        }

        let _lease = match admission {
            Admission::Wait => self.store.lease(&key).await?,
            Admission::Reject => self.store.try_lease(&key).await?,
        };

        // Snapshot under the lease, so a queued event sees every write its
        // predecessors committed.
        let session = self.store.snapshot(&key).await?;
        let target = self.router.route(&event, &session, &self.invoker).await?;
        debug!(?target, "event routed");

        let hctx = HandlerContext {
            invoker: &self.invoker,
            config: &self.config,
        };
        let outcome = handler_for(target).handle(&event, &session, &hctx).await?;

        if !outcome.delta.is_empty() {
            self.store.apply(&key, &outcome.delta).await?;
        }
        info!(
            done = outcome.reply.done,
            degraded = outcome.reply.degraded,
            "event handled"
        );
        Ok(EngineResponse {
            text: outcome.reply.text,
            session_id: event.session_id,
            done: outcome.reply.done,
            degraded: outcome.reply.degraded,
        })
    }
}

fn handler_for(target: RouteTarget) -> &'static dyn Handler {
    match target {
        RouteTarget::Opening => &OpeningHandler,
        RouteTarget::Conversation => &ConversationHandler,
        RouteTarget::Guidance => &GuidanceHandler,
        RouteTarget::Evaluation => &EvaluationHandler,
        RouteTarget::Hint => &HintHandler,
        RouteTarget::Skip => &SkipHandler,
        RouteTarget::Summary => &SummaryHandler,
    }
}
