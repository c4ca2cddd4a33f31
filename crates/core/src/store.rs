use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::error::EngineError;
use crate::session::{Session, SessionKey};
use crate::state::{StateDelta, StateMap};

/// Durable load/save for whole session states. The engine depends only on
/// this contract; the relational schema behind it lives with the caller.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn load(&self, key: &SessionKey) -> anyhow::Result<Option<StateMap>>;
    async fn save(&self, key: &SessionKey, state: &StateMap) -> anyhow::Result<()>;
}

/// Backend that keeps everything in process memory. Used by tests and as
/// a stand-in where durability is not needed.
#[derive(Default)]
pub struct InMemoryBackend {
    rows: RwLock<HashMap<SessionKey, StateMap>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &SessionKey) -> Option<StateMap> {
        self.rows.read().await.get(key).cloned()
    }
}

#[async_trait]
impl SessionBackend for InMemoryBackend {
    async fn load(&self, key: &SessionKey) -> anyhow::Result<Option<StateMap>> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn save(&self, key: &SessionKey, state: &StateMap) -> anyhow::Result<()> {
        self.rows.write().await.insert(key.clone(), state.clone());
        Ok(())
    }
}

struct SessionSlot {
    state: RwLock<StateMap>,
    lease: Arc<Mutex<()>>,
}

/// Exclusive per-session lease. At most one event per session holds one;
/// dropping it on any exit path releases the session.
#[derive(Debug)]
pub struct SessionLease {
    _guard: OwnedMutexGuard<()>,
}

/// In-memory view of all live sessions over a durable backend.
///
/// Per-session writes are atomic: `apply` builds the next state from a
/// copy, persists it, and only then commits it to memory, so a backend
/// failure leaves both memory and storage on the previous state. Slots
/// for different sessions share nothing but the (briefly locked) slot
/// map, so sessions never block each other.
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    slots: RwLock<HashMap<SessionKey, Arc<SessionSlot>>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the session for `key`, creating and persisting it with
    /// `initial` state if it does not exist yet. Never resets an existing
    /// session: a second creation attempt returns what is already there.
    pub async fn get_or_create(
        &self,
        key: &SessionKey,
        initial: StateMap,
    ) -> Result<Session, EngineError> {
        if let Some(slot) = self.slots.read().await.get(key).cloned() {
            let state = slot.state.read().await.clone();
            return Ok(Session {
                key: key.clone(),
                state,
            });
        }

        let mut slots = self.slots.write().await;
        // Re-check: another task may have created the slot while we were
        // waiting for the write lock.
        if let Some(slot) = slots.get(key).cloned() {
            let state = slot.state.read().await.clone();
            return Ok(Session {
                key: key.clone(),
                state,
            });
        }

        let state = match self
            .backend
            .load(key)
            .await
            .map_err(EngineError::StoreUnavailable)?
        {
            Some(existing) => existing,
            None => {
                self.backend
                    .save(key, &initial)
                    .await
                    .map_err(EngineError::StoreUnavailable)?;
                debug!(session = %key, "created session");
                initial
            }
        };

        slots.insert(
            key.clone(),
            Arc::new(SessionSlot {
                state: RwLock::new(state.clone()),
                lease: Arc::new(Mutex::new(())),
            }),
        );
        Ok(Session {
            key: key.clone(),
            state,
        })
    }

    async fn slot(&self, key: &SessionKey) -> Result<Arc<SessionSlot>, EngineError> {
        if let Some(slot) = self.slots.read().await.get(key).cloned() {
            return Ok(slot);
        }

        // Not live in this process: hydrate from the backend, which is how
        // sessions survive a restart.
        let loaded = self
            .backend
            .load(key)
            .await
            .map_err(EngineError::StoreUnavailable)?
            .ok_or_else(|| EngineError::SessionNotFound(key.to_string()))?;

        let mut slots = self.slots.write().await;
        let slot = slots.entry(key.clone()).or_insert_with(|| {
            Arc::new(SessionSlot {
                state: RwLock::new(loaded),
                lease: Arc::new(Mutex::new(())),
            })
        });
        Ok(slot.clone())
    }

    /// Point-in-time copy of a session's state.
    pub async fn snapshot(&self, key: &SessionKey) -> Result<Session, EngineError> {
        let slot = self.slot(key).await?;
        let state = slot.state.read().await.clone();
        Ok(Session {
            key: key.clone(),
            state,
        })
    }

    /// Applies a delta atomically: persist the next state first, commit it
    /// to memory only on success. A concurrent reader of the same session
    /// sees either the whole delta or none of it.
    pub async fn apply(&self, key: &SessionKey, delta: &StateDelta) -> Result<Session, EngineError> {
        let slot = self.slot(key).await?;
        let mut state = slot.state.write().await;
        let mut next = state.clone();
        delta.apply_to(&mut next);

        self.backend
            .save(key, &next)
            .await
            .map_err(EngineError::StoreUnavailable)?;

        *state = next.clone();
        debug!(session = %key, keys = delta.len(), "state delta committed");
        Ok(Session {
            key: key.clone(),
            state: next,
        })
    }

    /// Single-key write, a one-entry [`StateDelta`].
    pub async fn set(
        &self,
        key: &SessionKey,
        state_key: &str,
        value: serde_json::Value,
    ) -> Result<Session, EngineError> {
        let mut delta = StateDelta::new();
        delta.set(state_key, value);
        self.apply(key, &delta).await
    }

    /// Acquires the session's exclusive lease, waiting in FIFO order
    /// behind any holder.
    pub async fn lease(&self, key: &SessionKey) -> Result<SessionLease, EngineError> {
        let slot = self.slot(key).await?;
        let guard = slot.lease.clone().lock_owned().await;
        Ok(SessionLease { _guard: guard })
    }

    /// Acquires the lease only if it is free, otherwise `SessionBusy`.
    pub async fn try_lease(&self, key: &SessionKey) -> Result<SessionLease, EngineError> {
        let slot = self.slot(key).await?;
        let guard = slot
            .lease
            .clone()
            .try_lock_owned()
            .map_err(|_| EngineError::SessionBusy)?;
        Ok(SessionLease { _guard: guard })
    }
}
