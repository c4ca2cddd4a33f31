use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;

/// Session state: string keys to arbitrary structured values, persisted as
/// one JSON blob per session.
pub type StateMap = serde_json::Map<String, Value>;

/// Well-known state keys. Handlers read and write session state only
/// through these.
pub mod keys {
    /// Immutable exercise configuration, written once at creation.
    pub const EXERCISE: &str = "exercise";
    /// Generated passage and its target segmentation (drill only).
    pub const SCRIPT: &str = "script";
    /// Progress cursor over the script targets (drill only).
    pub const CURSOR: &str = "cursor";
    /// Workflow lifecycle, independent of the cursor.
    pub const WORKFLOW_STATUS: &str = "workflow_status";
    /// Append-only turn history.
    pub const HISTORY: &str = "history";
    /// Last order handed to a user turn.
    pub const USER_MESSAGE_ORDER: &str = "user_message_order";
    /// Last order handed to an assistant turn.
    pub const ASSISTANT_MESSAGE_ORDER: &str = "assistant_message_order";
    /// Order of the most recent assistant turn, the hint cache key.
    pub const LAST_ASSISTANT_ORDER: &str = "last_assistant_order";
    /// Generated hints keyed by assistant turn order.
    pub const HINT_CACHE: &str = "hint_cache";
    /// Evaluation records in submission order.
    pub const EVALUATION_HISTORY: &str = "evaluation_history";
    /// Most recently computed final summary.
    pub const FINAL_SUMMARY: &str = "final_summary";
}

/// A batch of state replacements produced by one handler invocation.
///
/// Handlers never mutate session state directly; they return a delta and
/// the store applies it atomically after persisting, so a failed event
/// leaves no partial writes behind.
#[derive(Debug, Clone, Default)]
pub struct StateDelta {
    changes: StateMap,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the value under `key` when the delta is applied.
    pub fn set(&mut self, key: &str, value: Value) -> &mut Self {
        self.changes.insert(key.to_string(), value);
        self
    }

    /// Serializes `value` and records it under `key`.
    pub fn set_typed<T: Serialize>(&mut self, key: &str, value: &T) -> Result<&mut Self, EngineError> {
        let encoded = serde_json::to_value(value)?;
        self.changes.insert(key.to_string(), encoded);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.changes.get(key)
    }

    /// Applies every recorded change to `state`, replacing whole values.
    pub fn apply_to(&self, state: &mut StateMap) {
        for (key, value) in &self.changes {
            state.insert(key.clone(), value.clone());
        }
    }
}

/// Decodes a typed value out of a state map, distinguishing "absent" from
/// "present but malformed".
pub fn read_typed<T: serde::de::DeserializeOwned>(
    state: &StateMap,
    key: &str,
) -> Result<Option<T>, EngineError> {
    match state.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delta_replaces_whole_values() {
        let mut state = StateMap::new();
        state.insert("a".into(), json!({"x": 1}));
        state.insert("b".into(), json!(2));

        let mut delta = StateDelta::new();
        delta.set("a", json!({"y": 3}));
        delta.set("c", json!("new"));
        delta.apply_to(&mut state);

        assert_eq!(state.get("a"), Some(&json!({"y": 3})));
        assert_eq!(state.get("b"), Some(&json!(2)));
        assert_eq!(state.get("c"), Some(&json!("new")));
    }

    #[test]
    fn set_typed_encodes() {
        #[derive(Serialize)]
        struct Point {
            x: u32,
        }

        let mut delta = StateDelta::new();
        delta.set_typed("p", &Point { x: 7 }).unwrap();
        assert_eq!(delta.get("p"), Some(&json!({"x": 7})));
        assert_eq!(delta.len(), 1);
        assert!(!delta.is_empty());
    }

    #[test]
    fn read_typed_distinguishes_absent_from_malformed() {
        let mut state = StateMap::new();
        state.insert("n".into(), json!(5));
        state.insert("null".into(), Value::Null);

        let present: Option<u32> = read_typed(&state, "n").unwrap();
        assert_eq!(present, Some(5));

        let absent: Option<u32> = read_typed(&state, "missing").unwrap();
        assert_eq!(absent, None);

        let null: Option<u32> = read_typed(&state, "null").unwrap();
        assert_eq!(null, None);

        let malformed: Result<Option<String>, _> = read_typed(&state, "n");
        assert!(malformed.is_err());
    }
}
