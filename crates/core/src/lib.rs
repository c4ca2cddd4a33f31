//! Session-orchestration engine for turn-based language practice.
//!
//! Events tagged with an intent flow through [`engine::PracticeEngine`]:
//! a router resolves each event to a handler, the handler reads an
//! immutable session snapshot and produces a reply plus a state delta,
//! and the store commits that delta atomically under the session's
//! exclusive lease. Model access, persistence and HTTP transport all sit
//! behind traits, so the engine itself stays runnable against in-memory
//! fakes.

pub mod engine;
pub mod error;
pub mod event;
pub mod handlers;
pub mod history;
pub mod model;
pub mod progress;
pub mod prompts;
pub mod refine;
pub mod router;
pub mod schema;
pub mod session;
pub mod state;
pub mod store;

pub use engine::{EngineConfig, EventContext, PracticeEngine};
pub use error::EngineError;
pub use event::{EngineResponse, Event, Source};
