use crate::backend::{DealRegistryBackend, RegistryError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tessera_types::{DatasetId, DealId};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    pub backend_type: BackendType,
}

#[derive(Debug, Clone, Default)]
pub enum BackendType {
    #[default]
    Memory,
    #[cfg(feature = "rocksdb")]
    RocksDB { path: String },
}

/// A record the registry can store and index.
pub trait RegistryRecord: Serialize + DeserializeOwned + Send + Sync {
    fn deal_id(&self) -> DealId;
    fn dataset_id(&self) -> DatasetId;
}

/// Typed view over a registry backend.
///
/// Writes to one deal are serialized through a per-deal async mutex, so a
/// read-modify-write never interleaves with another write to the same deal
/// while distinct deals proceed in parallel. Each record is stored as a
/// single JSON value.
pub struct DealStore<R> {
    backend: Arc<dyn DealRegistryBackend>,
    locks: Arc<RwLock<HashMap<DealId, Arc<Mutex<()>>>>>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for DealStore<R> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            locks: Arc::clone(&self.locks),
            _record: PhantomData,
        }
    }
}

impl<R: RegistryRecord> DealStore<R> {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let backend: Arc<dyn DealRegistryBackend> = match &config.backend_type {
            BackendType::Memory => Arc::new(crate::memory::MemoryRegistry::new()),
            #[cfg(feature = "rocksdb")]
            BackendType::RocksDB { path } => Arc::new(crate::rocks::RocksRegistry::new(path)?),
        };
        Ok(Self::with_backend(backend))
    }

    pub fn with_backend(backend: Arc<dyn DealRegistryBackend>) -> Self {
        Self {
            backend,
            locks: Arc::new(RwLock::new(HashMap::new())),
            _record: PhantomData,
        }
    }

    pub fn backend(&self) -> &Arc<dyn DealRegistryBackend> {
        &self.backend
    }

    async fn lock_for(&self, deal_id: DealId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(&deal_id) {
            return Arc::clone(lock);
        }
        Arc::clone(self.locks.write().await.entry(deal_id).or_default())
    }

    pub async fn next_deal_id(&self) -> Result<DealId> {
        self.backend.next_deal_id().await
    }

    pub async fn get(&self, deal_id: DealId) -> Result<Option<R>> {
        match self.backend.get(deal_id).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn require(&self, deal_id: DealId) -> Result<R> {
        self.get(deal_id).await?.ok_or(RegistryError::NotFound(deal_id))
    }

    /// Store a new record; fails if the id is taken.
    pub async fn insert(&self, record: &R) -> Result<()> {
        let deal_id = record.deal_id();
        let lock = self.lock_for(deal_id).await;
        let _guard = lock.lock().await;

        if self.backend.get(deal_id).await?.is_some() {
            return Err(RegistryError::AlreadyExists(deal_id));
        }
        let bytes = serde_json::to_vec(record)?;
        self.backend.put(deal_id, &record.dataset_id(), &bytes).await?;
        debug!(deal_id, "Deal record inserted");
        Ok(())
    }

    /// Read-modify-write one record under its lock. Nothing is written when
    /// `f` fails or leaves the record unchanged.
    pub async fn update<T, E, F>(&self, deal_id: DealId, f: F) -> std::result::Result<(R, T), E>
    where
        F: FnOnce(&mut R) -> std::result::Result<T, E>,
        E: From<RegistryError>,
    {
        let lock = self.lock_for(deal_id).await;
        let _guard = lock.lock().await;

        let before = self
            .backend
            .get(deal_id)
            .await?
            .ok_or(RegistryError::NotFound(deal_id))?;
        let mut record: R = serde_json::from_slice(&before).map_err(RegistryError::from)?;
        let out = f(&mut record)?;

        let after = serde_json::to_vec(&record).map_err(RegistryError::from)?;
        if after != before {
            self.backend.put(deal_id, &record.dataset_id(), &after).await?;
        }
        Ok((record, out))
    }

    pub async fn list(&self) -> Result<Vec<R>> {
        let mut records = Vec::new();
        for id in self.backend.list().await? {
            if let Some(record) = self.get(id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn list_by_dataset(&self, dataset_id: &DatasetId) -> Result<Vec<R>> {
        let mut records = Vec::new();
        for id in self.backend.list_by_dataset(dataset_id).await? {
            if let Some(record) = self.get(id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn flush(&self) -> Result<()> {
        self.backend.flush().await
    }
}
