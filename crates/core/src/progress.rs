use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorStatus {
    Active,
    Complete,
}

/// What a call to [`ProgressCursor::advance`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Moved to the next target; more remain.
    Moved,
    /// Consumed the last target; the cursor is now terminal.
    Completed,
    /// The cursor was already terminal; nothing changed.
    AlreadyComplete,
}

/// Ordinal pointer over an exercise's targets.
///
/// Invariants: `current_index <= total` always, and `complete` implies
/// `current_index == total`. The terminal state is idempotent: advancing a
/// complete cursor changes nothing and is not an error. A state that breaks
/// the invariants is refused with `InvalidProgressTransition`, never
/// clamped back into range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCursor {
    pub current_index: usize,
    pub total: usize,
    pub status: CursorStatus,
}

impl ProgressCursor {
    pub fn new(total: usize) -> Self {
        Self {
            current_index: 0,
            total,
            status: if total == 0 {
                CursorStatus::Complete
            } else {
                CursorStatus::Active
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == CursorStatus::Complete
    }

    pub fn advance(&mut self) -> Result<Advance, EngineError> {
        if self.is_complete() {
            return Ok(Advance::AlreadyComplete);
        }
        if self.current_index >= self.total {
            return Err(EngineError::InvalidProgressTransition(format!(
                "active cursor at index {} with total {}",
                self.current_index, self.total
            )));
        }
        if self.current_index == self.total - 1 {
            self.current_index = self.total;
            self.status = CursorStatus::Complete;
            Ok(Advance::Completed)
        } else {
            self.current_index += 1;
            Ok(Advance::Moved)
        }
    }
}
