use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::history::HistoryWindow;
use crate::progress::ProgressCursor;
use crate::state::{self, StateMap, keys};

/// Identity of one session: one user practicing one exercise instance
/// inside one application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// Which practice shape a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseKind {
    /// Scripted translation drill: a generated passage is worked through
    /// target by target, each submission evaluated for progression.
    Drill,
    /// Free roleplay under a persona and scenario; the assistant decides
    /// when the scene has run its course.
    Roleplay,
}

/// Scenario constraints for roleplay sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub learner_role: String,
    pub assistant_role: String,
    pub assistant_gender: String,
    pub scenario: String,
}

/// Immutable per-session configuration, written once at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseConfig {
    pub kind: ExerciseKind,
    pub topic: String,
    /// Difficulty level, e.g. "A2" or "B1".
    pub level: String,
    /// Language drill passages are written in; what the learner reads.
    pub source_language: String,
    /// Language the learner produces.
    pub practice_language: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_word_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub persona: Option<Persona>,
}

/// A generated drill passage and its per-target segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseScript {
    pub full_text: String,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Outcome of evaluating one submission against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub target_index: usize,
    pub input: String,
    pub verdict: Verdict,
    pub score: u8,
    pub feedback: String,
}

/// Lifecycle of the owning workflow, distinct from the progress cursor:
/// a roleplay finishes when the assistant closes the scene, a drill is
/// finished by its cursor reaching `complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Active,
    Finished,
}

/// Cross-dimension wrap-up computed from the evaluation history and the
/// full transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSummary {
    pub overall_score: u8,
    pub accuracy_score: u8,
    pub fluency_score: u8,
    pub vocabulary_score: u8,
    pub grammar_score: u8,
    pub feedback: String,
    pub suggestions: Vec<String>,
}

/// A point-in-time copy of one session. Handlers only ever see snapshots;
/// all mutation flows back through a [`crate::state::StateDelta`].
#[derive(Debug, Clone)]
pub struct Session {
    pub key: SessionKey,
    pub state: StateMap,
}

impl Session {
    /// Seed state for a brand-new session.
    pub fn initial_state(config: &ExerciseConfig) -> Result<StateMap, EngineError> {
        let mut state = StateMap::new();
        state.insert(keys::EXERCISE.into(), serde_json::to_value(config)?);
        state.insert(
            keys::WORKFLOW_STATUS.into(),
            serde_json::to_value(WorkflowStatus::Active)?,
        );
        Ok(state)
    }

    /// Raw read of one state key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn exercise(&self) -> Result<ExerciseConfig, EngineError> {
        state::read_typed(&self.state, keys::EXERCISE)?.ok_or_else(|| {
            EngineError::SessionNotFound(format!("{} has no exercise config", self.key))
        })
    }

    pub fn cursor(&self) -> Result<Option<ProgressCursor>, EngineError> {
        state::read_typed(&self.state, keys::CURSOR)
    }

    pub fn script(&self) -> Result<Option<ExerciseScript>, EngineError> {
        state::read_typed(&self.state, keys::SCRIPT)
    }

    pub fn workflow_status(&self) -> Result<WorkflowStatus, EngineError> {
        Ok(state::read_typed(&self.state, keys::WORKFLOW_STATUS)?
            .unwrap_or(WorkflowStatus::Active))
    }

    pub fn history(&self) -> Result<HistoryWindow, EngineError> {
        HistoryWindow::from_state(&self.state)
    }

    pub fn hint_cache(&self) -> Result<std::collections::BTreeMap<String, String>, EngineError> {
        Ok(state::read_typed(&self.state, keys::HINT_CACHE)?.unwrap_or_default())
    }

    pub fn evaluation_history(&self) -> Result<Vec<EvaluationRecord>, EngineError> {
        Ok(state::read_typed(&self.state, keys::EVALUATION_HISTORY)?.unwrap_or_default())
    }

    pub fn final_summary(&self) -> Result<Option<FinalSummary>, EngineError> {
        state::read_typed(&self.state, keys::FINAL_SUMMARY)
    }

    /// Whether the session as a whole is over, from either the workflow
    /// side or the cursor side.
    pub fn is_done(&self) -> Result<bool, EngineError> {
        if self.workflow_status()? == WorkflowStatus::Finished {
            return Ok(true);
        }
        Ok(self.cursor()?.map(|c| c.is_complete()).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drill_config() -> ExerciseConfig {
        ExerciseConfig {
            kind: ExerciseKind::Drill,
            topic: "ordering food".into(),
            level: "A2".into(),
            source_language: "Vietnamese".into(),
            practice_language: "English".into(),
            target_word_count: Some(120),
            persona: None,
        }
    }

    #[test]
    fn initial_state_holds_config_and_active_status() {
        let state = Session::initial_state(&drill_config()).unwrap();
        let session = Session {
            key: SessionKey::new("parlando", "u1", "s1"),
            state,
        };

        let exercise = session.exercise().unwrap();
        assert_eq!(exercise.kind, ExerciseKind::Drill);
        assert_eq!(exercise.topic, "ordering food");
        assert_eq!(session.workflow_status().unwrap(), WorkflowStatus::Active);
        assert!(session.cursor().unwrap().is_none());
        assert!(session.script().unwrap().is_none());
        assert!(!session.is_done().unwrap());
        assert!(session.history().unwrap().is_empty());
        assert!(session.evaluation_history().unwrap().is_empty());
    }

    #[test]
    fn missing_exercise_config_is_an_error() {
        let session = Session {
            key: SessionKey::new("parlando", "u1", "s1"),
            state: StateMap::new(),
        };
        assert!(session.exercise().is_err());
    }

    #[test]
    fn done_tracks_both_workflow_and_cursor() {
        let mut state = Session::initial_state(&drill_config()).unwrap();
        state.insert(
            keys::CURSOR.into(),
            serde_json::to_value(ProgressCursor {
                current_index: 2,
                total: 2,
                status: crate::progress::CursorStatus::Complete,
            })
            .unwrap(),
        );
        let session = Session {
            key: SessionKey::new("parlando", "u1", "s1"),
            state,
        };
        assert!(session.is_done().unwrap());

        let mut state = Session::initial_state(&drill_config()).unwrap();
        state.insert(
            keys::WORKFLOW_STATUS.into(),
            serde_json::to_value(WorkflowStatus::Finished).unwrap(),
        );
        let session = Session {
            key: SessionKey::new("parlando", "u1", "s2"),
            state,
        };
        assert!(session.is_done().unwrap());
    }

    #[test]
    fn config_serde_round_trip() {
        let config = ExerciseConfig {
            kind: ExerciseKind::Roleplay,
            topic: "at the pharmacy".into(),
            level: "B1".into(),
            source_language: "Vietnamese".into(),
            practice_language: "English".into(),
            target_word_count: None,
            persona: Some(Persona {
                learner_role: "customer".into(),
                assistant_role: "pharmacist".into(),
                assistant_gender: "female".into(),
                scenario: "picking up a prescription".into(),
            }),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"kind\":\"roleplay\""));
        assert!(!json.contains("target_word_count"));
        let back: ExerciseConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
