use crate::backend::{DealRegistryBackend, RegistryStats, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_types::{DatasetId, DealId};
use tokio::sync::RwLock;

/// In-memory registry for tests and short-lived runs
pub struct MemoryRegistry {
    records: Arc<RwLock<BTreeMap<DealId, Vec<u8>>>>,
    by_dataset: Arc<RwLock<HashMap<DatasetId, BTreeSet<DealId>>>>,
    next_id: AtomicU64,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
            by_dataset: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DealRegistryBackend for MemoryRegistry {
    async fn get(&self, deal_id: DealId) -> Result<Option<Vec<u8>>> {
        Ok(self.records.read().await.get(&deal_id).cloned())
    }

    async fn put(&self, deal_id: DealId, dataset_id: &DatasetId, record: &[u8]) -> Result<()> {
        // Hold both locks so the record and its index entry appear together
        let mut records = self.records.write().await;
        let mut by_dataset = self.by_dataset.write().await;
        records.insert(deal_id, record.to_vec());
        by_dataset.entry(*dataset_id).or_default().insert(deal_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DealId>> {
        Ok(self.records.read().await.keys().copied().collect())
    }

    async fn list_by_dataset(&self, dataset_id: &DatasetId) -> Result<Vec<DealId>> {
        Ok(self
            .by_dataset
            .read()
            .await
            .get(dataset_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn next_deal_id(&self) -> Result<DealId> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn get_stats(&self) -> Result<RegistryStats> {
        let records = self.records.read().await;
        Ok(RegistryStats {
            deal_count: records.len(),
            dataset_count: self.by_dataset.read().await.len(),
            total_size_bytes: Some(records.values().map(|r| r.len() as u64).sum()),
        })
    }
}
