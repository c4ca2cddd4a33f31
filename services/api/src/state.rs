//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the engine, database pool and configuration.

use crate::config::Config;
use parlando_core::PracticeEngine;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PracticeEngine>,
    pub db: Arc<crate::db::Db>,
    pub config: Arc<Config>,
}
