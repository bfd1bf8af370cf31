use async_trait::async_trait;
use tessera_types::{DatasetId, DealId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Deal not found: {0}")]
    NotFound(DealId),

    #[error("Deal already exists: {0}")]
    AlreadyExists(DealId),

    #[error("Registry backend error: {0}")]
    BackendError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Key-value store of serialized deal records keyed by deal id, with a
/// secondary index by dataset.
#[async_trait]
pub trait DealRegistryBackend: Send + Sync {
    /// Fetch a record
    async fn get(&self, deal_id: DealId) -> Result<Option<Vec<u8>>>;

    /// Write a record as one value, replacing any previous version
    async fn put(&self, deal_id: DealId, dataset_id: &DatasetId, record: &[u8]) -> Result<()>;

    /// All deal ids, ascending
    async fn list(&self) -> Result<Vec<DealId>>;

    /// Deal ids recorded for one dataset, ascending
    async fn list_by_dataset(&self, dataset_id: &DatasetId) -> Result<Vec<DealId>>;

    /// Allocate the next deal id; ids start at 1 and are never reused
    async fn next_deal_id(&self) -> Result<DealId>;

    /// Flush any pending writes
    async fn flush(&self) -> Result<()>;

    /// Get registry statistics
    async fn get_stats(&self) -> Result<RegistryStats>;
}

#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub deal_count: usize,
    pub dataset_count: usize,
    pub total_size_bytes: Option<u64>,
}
