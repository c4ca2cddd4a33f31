use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::state::{self, StateDelta, StateMap, keys};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One exchange unit in a session's history.
///
/// `order` comes from a strictly increasing per-role counter, so it is
/// stable under retries: a re-handled event re-reads the counter from the
/// last committed state rather than continuing from a half-applied one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub order: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub translation: Option<String>,
}

/// Working copy of a session's transcript plus its per-role order counters.
///
/// Handlers load one from the session snapshot, append turns to it, and
/// write the result back into their state delta. Appends only ever touch
/// the copy; nothing is committed until the store applies the delta.
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    turns: Vec<Turn>,
    user_order: u64,
    assistant_order: u64,
}

impl HistoryWindow {
    /// Loads the transcript and counters from a session state snapshot.
    pub fn from_state(state: &StateMap) -> Result<Self, EngineError> {
        let turns: Vec<Turn> = state::read_typed(state, keys::HISTORY)?.unwrap_or_default();
        let user_order = state::read_typed(state, keys::USER_MESSAGE_ORDER)?.unwrap_or(0);
        let assistant_order =
            state::read_typed(state, keys::ASSISTANT_MESSAGE_ORDER)?.unwrap_or(0);
        Ok(Self {
            turns,
            user_order,
            assistant_order,
        })
    }

    /// Appends a user turn and returns the order it was assigned.
    pub fn append_user(&mut self, content: impl Into<String>) -> u64 {
        self.user_order += 1;
        self.turns.push(Turn {
            role: Role::User,
            content: content.into(),
            order: self.user_order,
            translation: None,
        });
        self.user_order
    }

    /// Appends an assistant turn and returns the order it was assigned.
    pub fn append_assistant(
        &mut self,
        content: impl Into<String>,
        translation: Option<String>,
    ) -> u64 {
        self.assistant_order += 1;
        self.turns.push(Turn {
            role: Role::Assistant,
            content: content.into(),
            order: self.assistant_order,
            translation,
        });
        self.assistant_order
    }

    /// The last `n` turns, most recent last. This is what model prompts
    /// see; truncation never affects what is recorded.
    pub fn recent(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// The whole transcript, retained for final-summary computation.
    pub fn full(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_assistant(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == Role::Assistant)
    }

    /// Order of the most recent assistant turn, `0` before any exists.
    pub fn last_assistant_order(&self) -> u64 {
        self.last_assistant().map(|t| t.order).unwrap_or(0)
    }

    /// Records the transcript and both counters into `delta`.
    pub fn write_into(&self, delta: &mut StateDelta) -> Result<(), EngineError> {
        delta.set_typed(keys::HISTORY, &self.turns)?;
        delta.set_typed(keys::USER_MESSAGE_ORDER, &self.user_order)?;
        delta.set_typed(keys::ASSISTANT_MESSAGE_ORDER, &self.assistant_order)?;
        delta.set_typed(keys::LAST_ASSISTANT_ORDER, &self.last_assistant_order())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn orders_are_per_role_and_strictly_increasing() {
        let mut window = HistoryWindow::default();
        assert_eq!(window.append_user("hello"), 1);
        assert_eq!(window.append_assistant("hi there", None), 1);
        assert_eq!(window.append_user("how are you"), 2);
        assert_eq!(window.append_user("still here"), 3);
        assert_eq!(window.append_assistant("doing well", None), 2);

        let user_orders: Vec<u64> = window
            .full()
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| t.order)
            .collect();
        assert_eq!(user_orders, vec![1, 2, 3]);

        let assistant_orders: Vec<u64> = window
            .full()
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .map(|t| t.order)
            .collect();
        assert_eq!(assistant_orders, vec![1, 2]);
    }

    #[test]
    fn recent_is_a_suffix_of_full() {
        let mut window = HistoryWindow::default();
        for i in 0..15 {
            window.append_user(format!("message {i}"));
        }

        let recent = window.recent(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent, &window.full()[5..]);
        assert_eq!(recent.last().map(|t| t.order), Some(15));

        // Fewer turns than the window: everything comes back.
        let mut short = HistoryWindow::default();
        short.append_user("only one");
        assert_eq!(short.recent(10).len(), 1);
        assert_eq!(short.recent(0).len(), 0);
    }

    #[test]
    fn append_then_full_reads_it_last() {
        let mut window = HistoryWindow::default();
        window.append_user("first");
        window.append_assistant("second", Some("thứ hai".into()));

        let last = window.full().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "second");
        assert_eq!(last.translation.as_deref(), Some("thứ hai"));
    }

    #[test]
    fn counters_resume_from_state() {
        let mut state = StateMap::new();
        state.insert(
            keys::HISTORY.into(),
            json!([{"role": "user", "content": "hi", "order": 4}]),
        );
        state.insert(keys::USER_MESSAGE_ORDER.into(), json!(4));
        state.insert(keys::ASSISTANT_MESSAGE_ORDER.into(), json!(7));

        let mut window = HistoryWindow::from_state(&state).unwrap();
        assert_eq!(window.append_user("next"), 5);
        assert_eq!(window.append_assistant("reply", None), 8);
    }

    #[test]
    fn last_assistant_order_tracks_latest() {
        let mut window = HistoryWindow::default();
        assert_eq!(window.last_assistant_order(), 0);
        window.append_user("q");
        assert_eq!(window.last_assistant_order(), 0);
        window.append_assistant("a", None);
        window.append_assistant("b", None);
        assert_eq!(window.last_assistant_order(), 2);
    }

    #[test]
    fn write_into_round_trips_through_state() {
        let mut window = HistoryWindow::default();
        window.append_user("hello");
        window.append_assistant("hi", None);

        let mut delta = StateDelta::new();
        window.write_into(&mut delta).unwrap();

        let mut state = StateMap::new();
        delta.apply_to(&mut state);

        let reloaded = HistoryWindow::from_state(&state).unwrap();
        assert_eq!(reloaded.full(), window.full());
        assert_eq!(reloaded.last_assistant_order(), 1);
    }
}
