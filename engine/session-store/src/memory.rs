//! In-memory session store for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{SessionRecord, SessionStore, StoreError};

#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, game_id: &str) -> Result<SessionRecord, StoreError> {
        self.records
            .lock()
            .await
            .get(game_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(game_id.to_string()))
    }

    async fn set(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .insert(record.game_id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, game_id: &str) -> Result<(), StoreError> {
        self.records.lock().await.remove(game_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
