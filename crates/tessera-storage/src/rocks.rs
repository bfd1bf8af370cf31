use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use tessera_types::{DatasetId, DealId};

use crate::backend::{DealRegistryBackend, RegistryError, RegistryStats, Result};

const DEAL_PREFIX: &str = "deal:";
const DATASET_PREFIX: &str = "ds:";
const NEXT_ID_KEY: &[u8] = b"meta:next_deal_id";

/// RocksDB-backed registry; records survive restarts
pub struct RocksRegistry {
    db: Arc<DB>,
    id_lock: Mutex<()>,
}

impl RocksRegistry {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_max_background_jobs(2);

        let db = DB::open(&opts, path)
            .map_err(|e| RegistryError::BackendError(format!("Failed to open RocksDB: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
            id_lock: Mutex::new(()),
        })
    }

    fn deal_key(deal_id: DealId) -> Vec<u8> {
        format!("{}{:020}", DEAL_PREFIX, deal_id).into_bytes()
    }

    fn dataset_prefix(dataset_id: &DatasetId) -> String {
        format!("{}{}:", DATASET_PREFIX, dataset_id.to_hex())
    }

    fn dataset_key(dataset_id: &DatasetId, deal_id: DealId) -> Vec<u8> {
        format!("{}{:020}", Self::dataset_prefix(dataset_id), deal_id).into_bytes()
    }

    /// Deal ids encoded as the zero-padded suffix of keys under `prefix`
    fn scan_ids(&self, prefix: &str) -> Result<Vec<DealId>> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward));
        let mut ids = Vec::new();

        for item in iter {
            let (key, _) = item.map_err(|e| RegistryError::BackendError(format!("Iterator error: {}", e)))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            if let Some(id) = std::str::from_utf8(&key)
                .ok()
                .and_then(|k| k.strip_prefix(prefix))
                .and_then(|suffix| suffix.parse::<DealId>().ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl DealRegistryBackend for RocksRegistry {
    async fn get(&self, deal_id: DealId) -> Result<Option<Vec<u8>>> {
        self.db
            .get(Self::deal_key(deal_id))
            .map_err(|e| RegistryError::BackendError(format!("RocksDB get error: {}", e)))
    }

    async fn put(&self, deal_id: DealId, dataset_id: &DatasetId, record: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put(Self::deal_key(deal_id), record);
        batch.put(Self::dataset_key(dataset_id, deal_id), b"");
        self.db
            .write(batch)
            .map_err(|e| RegistryError::BackendError(format!("RocksDB write error: {}", e)))
    }

    async fn list(&self) -> Result<Vec<DealId>> {
        self.scan_ids(DEAL_PREFIX)
    }

    async fn list_by_dataset(&self, dataset_id: &DatasetId) -> Result<Vec<DealId>> {
        self.scan_ids(&Self::dataset_prefix(dataset_id))
    }

    async fn next_deal_id(&self) -> Result<DealId> {
        let _guard = self
            .id_lock
            .lock()
            .map_err(|_| RegistryError::BackendError("deal id lock poisoned".to_string()))?;

        let current = match self
            .db
            .get(NEXT_ID_KEY)
            .map_err(|e| RegistryError::BackendError(format!("RocksDB get error: {}", e)))?
        {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| RegistryError::SerializationError("corrupt deal id counter".to_string()))?;
                u64::from_be_bytes(arr)
            }
            None => 1,
        };

        self.db
            .put(NEXT_ID_KEY, (current + 1).to_be_bytes())
            .map_err(|e| RegistryError::BackendError(format!("RocksDB put error: {}", e)))?;
        Ok(current)
    }

    async fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| RegistryError::BackendError(format!("RocksDB flush error: {}", e)))
    }

    async fn get_stats(&self) -> Result<RegistryStats> {
        let deal_count = self.list().await?.len();

        let iter = self
            .db
            .iterator(IteratorMode::From(DATASET_PREFIX.as_bytes(), rocksdb::Direction::Forward));
        let mut datasets = std::collections::HashSet::new();
        for item in iter {
            let (key, _) = item.map_err(|e| RegistryError::BackendError(format!("Iterator error: {}", e)))?;
            if !key.starts_with(DATASET_PREFIX.as_bytes()) {
                break;
            }
            if let Some(hex) = std::str::from_utf8(&key)
                .ok()
                .and_then(|k| k.strip_prefix(DATASET_PREFIX))
                .and_then(|rest| rest.split(':').next())
            {
                datasets.insert(hex.to_string());
            }
        }

        Ok(RegistryStats {
            deal_count,
            dataset_count: datasets.len(),
            total_size_bytes: None,
        })
    }
}
