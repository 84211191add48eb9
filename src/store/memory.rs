use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::MotStatusStore;
use crate::models::MotStatusUpdate;

/// In-process status store. Backs `batch --dry-run` and tests.
#[derive(Default)]
pub struct MemoryStatusStore {
    records: RwLock<HashMap<String, MotStatusUpdate>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, registration: &str) -> Option<MotStatusUpdate> {
        self.records.read().await.get(registration).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MotStatusStore for MemoryStatusStore {
    async fn record_status(&self, update: &MotStatusUpdate) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        // Same merge rule as the Postgres upsert: missing dates keep the known value
        let merged = match records.get(&update.registration) {
            Some(prev) => MotStatusUpdate {
                expiry_date: update.expiry_date.or(prev.expiry_date),
                last_test_date: update.last_test_date.or(prev.last_test_date),
                ..update.clone()
            },
            None => update.clone(),
        };
        records.insert(update.registration.clone(), merged);
        Ok(())
    }
}
