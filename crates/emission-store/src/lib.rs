use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gacha_domain::{Address, CharacterId, EmissionTable, GachaId, H256, RewardAmount, TraceId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Read-only source of per-gacha emission rows, owned by the admin side.
#[async_trait]
pub trait EmissionTableSource: Send + Sync {
    async fn emission_table(&self, gacha_id: &GachaId)
    -> Result<Option<EmissionTable>, StoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryEmissionStore {
    tables: Arc<Mutex<HashMap<GachaId, EmissionTable>>>,
}

impl InMemoryEmissionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_table(&self, table: EmissionTable) -> Result<(), StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(table.gacha_id().clone(), table);
        Ok(())
    }

    pub fn remove_table(&self, gacha_id: &GachaId) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .remove(gacha_id)
            .is_some())
    }
}

#[async_trait]
impl EmissionTableSource for InMemoryEmissionStore {
    async fn emission_table(
        &self,
        gacha_id: &GachaId,
    ) -> Result<Option<EmissionTable>, StoreError> {
        Ok(self
            .tables
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(gacha_id)
            .cloned())
    }
}

/// One settled draw: which character a recipient obtained and the
/// transaction that paid for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    pub trace_id: TraceId,
    pub gacha_id: GachaId,
    pub character_id: CharacterId,
    pub recipient: Address,
    pub amount: RewardAmount,
    pub nonce: u64,
    pub tx_hash: H256,
    pub settled_at: DateTime<Utc>,
}

#[async_trait]
pub trait DrawRecordRepository: Send + Sync {
    async fn insert_draw_record(&self, record: &DrawRecord) -> Result<(), StoreError>;

    async fn list_draw_records_by_recipient(
        &self,
        recipient: &Address,
    ) -> Result<Vec<DrawRecord>, StoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryDrawRecordRepository {
    records: Arc<Mutex<Vec<DrawRecord>>>,
}

impl InMemoryDrawRecordRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records_snapshot(&self) -> Vec<DrawRecord> {
        self.records.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DrawRecordRepository for InMemoryDrawRecordRepository {
    async fn insert_draw_record(&self, record: &DrawRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .push(record.clone());
        Ok(())
    }

    async fn list_draw_records_by_recipient(
        &self,
        recipient: &Address,
    ) -> Result<Vec<DrawRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .iter()
            .filter(|r| &r.recipient == recipient)
            .cloned()
            .collect())
    }
}
