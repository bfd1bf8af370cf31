//! Storage Market Coordinator
//!
//! Caller-facing entry point tying the components together:
//! 1. Archive the dataset and compute its piece commitment
//! 2. Plan replicas with the optimizer
//! 3. Draft one deal per replica and start its lifecycle
//! 4. Verify, renew, retrieve and report on the deals

use crate::deal_manager::{DealManager, DealManagerConfig};
use crate::error::{Result, StorageMarketError};
use crate::ledger::LedgerClient;
use crate::lifecycle::VerificationOutcome;
use crate::optimizer::{OptimizerConfig, PieceDescriptor, ProviderCatalog, StorageOptimizer};
use crate::pool::ComputePool;
use crate::proof::{Proof, ProofEngine};
use crate::provider::{ByteRange, ProviderTransport};
use crate::types::{Deal, DealParameters, DealState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tessera_archive::{
    dataset_fingerprint, dataset_size, extract_file, piece_commitment, Archive, ArchiveBuilder, ArchiveConfig,
    ArchiveError, PieceCommitment,
};
use tessera_crypto::Keypair;
use tessera_storage::DealStore;
use tessera_types::{ContentId, DatasetId, DealId, FilAmount};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Configuration for the storage market coordinator
#[derive(Debug, Clone, Default)]
pub struct MarketConfig {
    pub archive: ArchiveConfig,
    pub optimizer: OptimizerConfig,
    pub deals: DealManagerConfig,
    /// Pick the chunk size from the dataset size instead of `archive.chunk_size`
    pub adaptive_chunking: bool,
    /// Compute pool size; 0 uses every available core
    pub compute_threads: usize,
}

/// An archived dataset ready to be handed to providers
#[derive(Debug)]
pub struct PreparedDataset {
    pub dataset_id: DatasetId,
    pub archive: Arc<Archive>,
    pub car_bytes: Arc<Vec<u8>>,
    pub commitment: PieceCommitment,
    pub chunk_size: usize,
}

/// Deal counts by state plus committed spend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketStats {
    pub datasets: usize,
    pub total_deals: usize,
    pub pending_deals: usize,
    pub active_deals: usize,
    pub expiring_deals: usize,
    pub expired_deals: usize,
    pub failed_deals: usize,
    pub monitored_deals: usize,
    /// Total cost of deals that are pending or storing
    pub committed_cost: FilAmount,
}

/// Central coordinator for the storage market
pub struct StorageMarketCoordinator {
    config: MarketConfig,
    optimizer: StorageOptimizer,
    deals: DealManager,
    catalog: RwLock<ProviderCatalog>,
    prepared: RwLock<HashMap<DatasetId, Arc<PreparedDataset>>>,
    proofs: ProofEngine,
    pool: ComputePool,
    provider: Arc<dyn ProviderTransport>,
}

impl StorageMarketCoordinator {
    /// Create a coordinator and start its deal manager. Must be called inside
    /// a tokio runtime.
    pub fn new(
        config: MarketConfig,
        store: DealStore<Deal>,
        ledger: Arc<dyn LedgerClient>,
        provider: Arc<dyn ProviderTransport>,
        keypair: Arc<Keypair>,
        catalog: ProviderCatalog,
    ) -> Self {
        let pool = if config.compute_threads == 0 {
            ComputePool::with_available_cores()
        } else {
            ComputePool::new(config.compute_threads)
        };
        let deals = DealManager::new(config.deals.clone(), store, ledger, Arc::clone(&provider), keypair);

        Self {
            optimizer: StorageOptimizer::new(config.optimizer.clone()),
            deals,
            catalog: RwLock::new(catalog),
            prepared: RwLock::new(HashMap::new()),
            proofs: ProofEngine::new(pool.clone()),
            pool,
            provider,
            config,
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn deal_manager(&self) -> &DealManager {
        &self.deals
    }

    pub fn optimizer(&self) -> &StorageOptimizer {
        &self.optimizer
    }

    pub async fn set_catalog(&self, catalog: ProviderCatalog) {
        *self.catalog.write().await = catalog;
    }

    /// Archive `paths` and compute the piece commitment, on the compute pool.
    /// Results are cached by dataset fingerprint, so unchanged inputs are
    /// archived once.
    pub async fn prepare_dataset(&self, paths: &[PathBuf]) -> Result<Arc<PreparedDataset>> {
        let fingerprint_paths = paths.to_vec();
        let dataset_id = self
            .pool
            .run(move || dataset_fingerprint(&fingerprint_paths))
            .await??;

        if let Some(cached) = self.prepared(&dataset_id).await {
            debug!(dataset_id = %dataset_id, "Reusing prepared dataset");
            return Ok(cached);
        }

        let paths = paths.to_vec();
        let archive_config = self.config.archive.clone();
        let chunker = self.config.adaptive_chunking.then(|| self.optimizer.clone());

        let prepared = self
            .pool
            .run(move || -> std::result::Result<PreparedDataset, ArchiveError> {
                let chunk_size = match &chunker {
                    Some(optimizer) => {
                        let plan = optimizer.chunking_strategy(dataset_size(&paths)?);
                        usize::try_from(plan.chunk_size).unwrap_or(archive_config.chunk_size)
                    }
                    None => archive_config.chunk_size,
                };

                let archive = ArchiveBuilder::from_config(&archive_config)?.build(&paths, chunk_size)?;
                let car_bytes = archive.to_bytes()?;
                let commitment = piece_commitment(&car_bytes, archive_config.sector_size_hint)?;
                Ok(PreparedDataset {
                    dataset_id,
                    archive: Arc::new(archive),
                    car_bytes: Arc::new(car_bytes),
                    commitment,
                    chunk_size,
                })
            })
            .await??;

        info!(
            dataset_id = %prepared.dataset_id,
            piece_cid = %prepared.commitment.piece_cid(),
            car_bytes = prepared.car_bytes.len(),
            padded_size = prepared.commitment.padded_size,
            chunk_size = prepared.chunk_size,
            "Dataset prepared"
        );

        // A concurrent preparation of the same inputs may have won the race.
        let mut cache = self.prepared.write().await;
        let prepared = cache
            .entry(dataset_id)
            .or_insert_with(|| Arc::new(prepared))
            .clone();
        Ok(prepared)
    }

    /// Drop a prepared dataset's archive from memory. Deals already started
    /// keep their own handle on the bytes.
    pub async fn forget_dataset(&self, dataset_id: &DatasetId) -> bool {
        self.prepared.write().await.remove(dataset_id).is_some()
    }

    pub async fn prepared(&self, dataset_id: &DatasetId) -> Option<Arc<PreparedDataset>> {
        self.prepared.read().await.get(dataset_id).cloned()
    }

    /// Archive, plan and draft deals for a dataset, then start every deal's
    /// lifecycle. Storing the same dataset again adds replicas after the
    /// existing ones.
    pub async fn store_dataset(
        &self,
        paths: &[PathBuf],
        budget: FilAmount,
        min_replicas: usize,
    ) -> Result<Vec<DealParameters>> {
        let prepared = self.prepare_dataset(paths).await?;
        let piece = PieceDescriptor::new(prepared.dataset_id, &prepared.commitment);

        let mut params = {
            let catalog = self.catalog.read().await;
            self.optimizer.optimize(&piece, budget, min_replicas, &catalog)?
        };

        let offset = self
            .deals
            .list_dataset_deals(&prepared.dataset_id)
            .await?
            .iter()
            .map(|d| d.replica_index + 1)
            .max()
            .unwrap_or(0);
        for p in &mut params {
            p.replica_index += offset;
        }

        for p in &params {
            let deal = self.deals.create_deal(p).await?;
            self.deals
                .start_lifecycle(deal.deal_id, Some(Arc::clone(&prepared.car_bytes)))
                .await?;
        }

        info!(
            dataset_id = %prepared.dataset_id,
            deals = params.len(),
            "Dataset submitted for storage"
        );
        Ok(params)
    }

    pub async fn get_deal_status(&self, deal_id: DealId) -> Result<Deal> {
        self.deals.get_deal(deal_id).await
    }

    pub async fn verify_deal(&self, deal_id: DealId) -> Result<VerificationOutcome> {
        self.deals.verify_deal(deal_id).await
    }

    pub async fn renew_deal(&self, deal_id: DealId, extra_epochs: u64) -> Result<Deal> {
        self.deals.renew_deal(deal_id, extra_epochs).await
    }

    pub async fn list_dataset_deals(&self, dataset_id: &DatasetId) -> Result<Vec<Deal>> {
        self.deals.list_dataset_deals(dataset_id).await
    }

    pub async fn cancel_monitoring(&self, deal_id: DealId) -> Result<bool> {
        self.deals.cancel_monitoring(deal_id).await
    }

    pub async fn resume_all(&self) -> Result<usize> {
        self.deals.resume_all().await
    }

    /// Inclusion proof for a block of a prepared dataset's archive
    pub async fn prove_inclusion(&self, dataset_id: &DatasetId, target: &ContentId) -> Result<Proof> {
        let prepared = self
            .prepared(dataset_id)
            .await
            .ok_or_else(|| StorageMarketError::NotFound(format!("dataset {} not prepared", dataset_id)))?;
        self.proofs
            .inclusion_proof(Arc::clone(&prepared.archive), *target)
            .await
    }

    /// Fetch a deal's archive from its provider and extract one file. The
    /// fetched bytes must match the deal's piece commitment.
    pub async fn retrieve_file(&self, deal_id: DealId, path: &str) -> Result<Vec<u8>> {
        let deal = self.deals.get_deal(deal_id).await?;
        if !deal.state.is_storing() {
            return Err(StorageMarketError::InvalidStateTransition {
                from: format!("{:?}", deal.state),
                to: "Retrieval".to_string(),
            });
        }
        let range = ByteRange::prefix(deal.raw_size)
            .ok_or_else(|| StorageMarketError::MalformedInput(format!("deal {} holds no data", deal_id)))?;

        let bytes = self
            .config
            .deals
            .retry
            .run("fetch_data", || {
                self.provider.fetch_data(&deal.provider, &deal.piece_cid, range)
            })
            .await?;
        if bytes.len() as u64 != deal.raw_size {
            return Err(StorageMarketError::CorruptArchive(format!(
                "provider returned {} bytes, deal covers {}",
                bytes.len(),
                deal.raw_size
            )));
        }

        let expected = deal.piece_cid;
        let padded_size = deal.padded_size;
        let path = path.to_string();
        let file = self
            .pool
            .run(move || -> Result<Vec<u8>> {
                let commitment = piece_commitment(&bytes, padded_size)?;
                if !commitment.piece_cid().ct_eq(&expected) {
                    return Err(StorageMarketError::CorruptArchive(format!(
                        "retrieved bytes do not match piece {}",
                        expected
                    )));
                }
                let archive = Archive::from_bytes(&bytes)?;
                Ok(extract_file(&archive, &path)?)
            })
            .await??;

        debug!(deal_id, provider = %deal.provider, bytes = file.len(), "File retrieved");
        Ok(file)
    }

    pub async fn get_stats(&self) -> Result<MarketStats> {
        let deals = self.deals.store().list().await?;
        let mut stats = MarketStats {
            datasets: self.prepared.read().await.len(),
            total_deals: deals.len(),
            ..Default::default()
        };

        for deal in &deals {
            match deal.state {
                DealState::Drafted | DealState::Proposed | DealState::Publishing => stats.pending_deals += 1,
                DealState::Active | DealState::Renewed => stats.active_deals += 1,
                DealState::Expiring => stats.expiring_deals += 1,
                DealState::Expired => stats.expired_deals += 1,
                DealState::Failed => stats.failed_deals += 1,
            }
            if !matches!(deal.state, DealState::Expired | DealState::Failed) {
                stats.committed_cost = stats.committed_cost.saturating_add(deal.total_cost);
            }
            if self.deals.is_monitored(deal.deal_id).await {
                stats.monitored_deals += 1;
            }
        }
        Ok(stats)
    }

    /// Stop every lifecycle task and flush the registry
    pub async fn shutdown(&self) -> Result<()> {
        self.deals.shutdown().await
    }
}
