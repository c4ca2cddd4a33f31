//! Data Access Layer
//!
//! This module contains all the functions for interacting with the PostgreSQL
//! database. Each session is one row holding its whole state as a JSONB blob;
//! queries use the runtime `sqlx` API so the crate builds without a live
//! database.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use parlando_core::session::SessionKey;
use parlando_core::state::StateMap;
use parlando_core::store::SessionBackend;

use crate::models::SessionRow;

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts or replaces one session's state blob.
    pub async fn upsert_session(
        &self,
        key: &SessionKey,
        state: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO practice_sessions (app_name, user_id, session_id, state_blob)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (app_name, user_id, session_id)
            DO UPDATE SET state_blob = EXCLUDED.state_blob, updated_at = now()
            "#,
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetches one session's state blob, if the session exists.
    pub async fn load_session(&self, key: &SessionKey) -> Result<Option<serde_json::Value>> {
        let blob: Option<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT state_blob FROM practice_sessions
            WHERE app_name = $1 AND user_id = $2 AND session_id = $3
            "#,
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(blob)
    }

    /// Lists all sessions for a given user, most recently touched first.
    pub async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionRow>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT session_id, state_blob, created_at, updated_at
            FROM practice_sessions
            WHERE app_name = $1 AND user_id = $2
            ORDER BY updated_at DESC
            "#,
        )
        .bind(app_name)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn decode_state(value: serde_json::Value) -> Result<StateMap> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => anyhow::bail!("session state blob is not a JSON object: {other}"),
    }
}

/// The engine's persistence contract over the `practice_sessions` table.
#[derive(Clone)]
pub struct PgSessionBackend {
    db: Db,
}

impl PgSessionBackend {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionBackend for PgSessionBackend {
    async fn load(&self, key: &SessionKey) -> Result<Option<StateMap>> {
        match self.db.load_session(key).await? {
            Some(blob) => Ok(Some(decode_state(blob)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &SessionKey, state: &StateMap) -> Result<()> {
        let blob = serde_json::Value::Object(state.clone());
        self.db.upsert_session(key, &blob).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_state_accepts_objects() {
        let map = decode_state(json!({"exercise": {"kind": "drill"}})).unwrap();
        assert!(map.contains_key("exercise"));
    }

    #[test]
    fn test_decode_state_rejects_non_objects() {
        assert!(decode_state(json!([1, 2, 3])).is_err());
        assert!(decode_state(json!("blob")).is_err());
    }
}
