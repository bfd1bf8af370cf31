//! Command handlers for the `tessera` binary.

use crate::config::{NodeConfig, DEFAULT_CONFIG_FILE};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tessera_archive::{
    dataset_fingerprint, dataset_size, parse_archive, piece_commitment, Archive, ArchiveBuilder, ArchivedFile,
    PieceCommitment,
};
use tessera_crypto::Keypair;
use tessera_storage::DealStore;
use tessera_storage_market::{
    ChunkPlan, DealState, MarketConfig, MarketStats, ProviderCatalog, SimulatedLedger, SimulatedNetwork,
    SimulatedProvider, StorageMarketCoordinator, StorageOptimizer, StoragePlan,
};
use tessera_types::{ContentId, DealId, FilAmount};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub dataset_id: String,
    pub root: ContentId,
    pub blocks: usize,
    pub files: usize,
    pub chunk_size: usize,
    pub car_bytes: u64,
    pub commitment: PieceCommitment,
    pub piece_cid: ContentId,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectedFile {
    pub path: String,
    pub cid: ContentId,
    pub size: u64,
}

impl From<ArchivedFile> for InspectedFile {
    fn from(file: ArchivedFile) -> Self {
        Self {
            path: file.path,
            cid: file.cid,
            size: file.size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInspection {
    pub roots: Vec<ContentId>,
    pub blocks: usize,
    pub block_bytes: u64,
    pub files: Vec<InspectedFile>,
}

/// Write a default configuration and a fresh node key into `output`
pub fn init_node(output: &Path) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(output).with_context(|| format!("Failed to create {}", output.display()))?;

    let key_path = output.join("node.key");
    let mut config = NodeConfig::default();
    config.node.data_dir = output.join("data");
    config.node.key_file = Some(key_path.clone());
    let config_path = output.join(DEFAULT_CONFIG_FILE);
    config.save_to_file(&config_path)?;

    let keypair = generate_key(&key_path, false)?;
    info!(
        config = %config_path.display(),
        key = %key_path.display(),
        public_key = %keypair.public_key(),
        "Node initialized"
    );
    Ok((config_path, key_path))
}

/// Write a fresh node key to `path`. An existing key is only replaced with
/// `overwrite`.
pub fn generate_key(path: &Path, overwrite: bool) -> Result<Keypair> {
    if path.exists() && !overwrite {
        bail!("Key file {} already exists", path.display());
    }
    let keypair = Keypair::generate();
    keypair
        .save_to_file(path)
        .with_context(|| format!("Failed to write key {}", path.display()))?;
    info!(path = %path.display(), public_key = %keypair.public_key(), "Keypair saved");
    Ok(keypair)
}

/// Chunk size used for `paths` under `config`
pub fn chunk_size_for(config: &NodeConfig, paths: &[PathBuf]) -> Result<usize> {
    if !config.node.adaptive_chunking {
        return Ok(config.archive.chunk_size);
    }
    let plan = StorageOptimizer::new(config.optimizer.clone()).chunking_strategy(dataset_size(paths)?);
    Ok(usize::try_from(plan.chunk_size).unwrap_or(config.archive.chunk_size))
}

/// Archive `paths` into a TCAR file at `out`
pub fn archive_paths(config: &NodeConfig, paths: &[PathBuf], out: &Path) -> Result<ArchiveSummary> {
    let chunk_size = chunk_size_for(config, paths)?;
    let archive = ArchiveBuilder::from_config(&config.archive)?.build(paths, chunk_size)?;
    let bytes = archive.to_bytes()?;
    fs::write(out, &bytes).with_context(|| format!("Failed to write archive {}", out.display()))?;
    let commitment = piece_commitment(&bytes, config.archive.sector_size_hint)?;

    let root = *archive.root().context("archive has no root")?;
    Ok(ArchiveSummary {
        dataset_id: dataset_fingerprint(paths)?.to_string(),
        root,
        blocks: archive.len(),
        files: archive.list_files()?.len(),
        chunk_size,
        car_bytes: bytes.len() as u64,
        piece_cid: commitment.piece_cid(),
        commitment,
    })
}

fn open_archive(car: &Path) -> Result<Archive> {
    let file = File::open(car).with_context(|| format!("Failed to open archive {}", car.display()))?;
    Ok(parse_archive(BufReader::new(file))?)
}

pub fn inspect_archive(car: &Path) -> Result<ArchiveInspection> {
    let archive = open_archive(car)?;
    Ok(ArchiveInspection {
        roots: archive.roots().to_vec(),
        blocks: archive.len(),
        block_bytes: archive.block_bytes(),
        files: archive.list_files()?.into_iter().map(InspectedFile::from).collect(),
    })
}

/// Extract `path` from the archive into `out`, returning the bytes written
pub fn extract_from_archive(car: &Path, path: &str, out: &Path) -> Result<u64> {
    let data = open_archive(car)?.extract_file(path)?;
    fs::write(out, &data).with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(data.len() as u64)
}

pub fn compute_commp(car: &Path, sector_size: u64) -> Result<PieceCommitment> {
    let bytes = fs::read(car).with_context(|| format!("Failed to read {}", car.display()))?;
    Ok(piece_commitment(&bytes, sector_size)?)
}

pub fn plan_storage(
    config: &NodeConfig,
    size: u64,
    budget: FilAmount,
    replicas: usize,
    catalog: &Path,
) -> Result<StoragePlan> {
    let catalog = ProviderCatalog::load(catalog)?;
    Ok(StorageOptimizer::new(config.optimizer.clone()).plan(size, budget, replicas, &catalog)?)
}

pub fn chunking_plan(config: &NodeConfig, size: u64) -> ChunkPlan {
    StorageOptimizer::new(config.optimizer.clone()).chunking_strategy(size)
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulatedDeal {
    pub deal_id: DealId,
    pub provider: String,
    pub state: DealState,
    pub duration_epochs: u64,
    pub total_cost: FilAmount,
    pub chain_deal_id: Option<u64>,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalCheck {
    pub deal_id: DealId,
    pub path: String,
    pub bytes: usize,
    pub matches: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub dataset_id: String,
    pub piece_cid: ContentId,
    pub padded_size: u64,
    pub deals: Vec<SimulatedDeal>,
    pub retrieval: Option<RetrievalCheck>,
    pub stats: MarketStats,
}

/// Providers used when no catalog is given
pub fn default_simulated_providers() -> Vec<SimulatedProvider> {
    vec![
        SimulatedProvider::new("f01000", FilAmount::from_atto(1_000_000_000), "eu-west"),
        SimulatedProvider::new("f01001", FilAmount::from_atto(1_200_000_000), "us-east"),
        SimulatedProvider::new("f01002", FilAmount::from_atto(1_500_000_000), "ap-south"),
        SimulatedProvider::new("f01003", FilAmount::from_atto(4_000_000_000), "eu-north"),
    ]
}

/// Market settings for a simulated run: the configured archive, optimizer
/// and retry limits with timings scaled down to milliseconds
pub fn simulation_config(config: &NodeConfig) -> MarketConfig {
    let mut market = config.market_config();
    let deals = &mut market.deals;
    deals.epoch_duration = Duration::from_millis(10);
    deals.inclusion_timeout = Duration::from_secs(5);
    deals.poll_base_interval = Duration::from_millis(10);
    deals.poll_max_interval = Duration::from_millis(100);
    deals.expiring_window = Duration::from_secs(60);
    deals.retry.per_call_timeout = Duration::from_secs(5);
    deals.retry.backoff_base = Duration::from_millis(5);
    deals.retry.backoff_max = Duration::from_millis(50);
    market
}

/// Store `paths` with simulated providers and ledger, wait for every deal to
/// settle, verify the active ones and retrieve one file back
pub async fn run_simulation(
    config: &NodeConfig,
    paths: &[PathBuf],
    budget: FilAmount,
    replicas: usize,
    catalog: Option<&Path>,
) -> Result<SimulationReport> {
    let mut network = SimulatedNetwork::new();
    match catalog {
        Some(path) => {
            for listing in ProviderCatalog::load(path)?.providers {
                network.add(SimulatedProvider::with_listing(listing, Keypair::generate()));
            }
        }
        None => {
            for provider in default_simulated_providers() {
                network.add(provider);
            }
        }
    }
    let catalog = network.catalog();
    info!(providers = catalog.len(), replicas, budget = %budget, "Starting simulation");

    let store = DealStore::new(Default::default())?;
    let coordinator = StorageMarketCoordinator::new(
        simulation_config(config),
        store,
        Arc::new(SimulatedLedger::new()),
        Arc::new(network),
        Arc::new(Keypair::generate()),
        catalog,
    );

    let result = drive_simulation(&coordinator, paths, budget, replicas).await;
    coordinator.shutdown().await?;
    result
}

async fn drive_simulation(
    coordinator: &StorageMarketCoordinator,
    paths: &[PathBuf],
    budget: FilAmount,
    replicas: usize,
) -> Result<SimulationReport> {
    let params = coordinator.store_dataset(paths, budget, replicas).await?;
    let Some(first) = params.first() else {
        bail!("optimizer returned no deals");
    };
    let dataset_id = first.dataset_id;
    let prepared = coordinator
        .prepared(&dataset_id)
        .await
        .context("dataset was not prepared")?;

    let settled = [DealState::Active, DealState::Failed];
    let mut deals = Vec::new();
    for deal in coordinator.list_dataset_deals(&dataset_id).await? {
        let deal = coordinator
            .deal_manager()
            .wait_for_state(deal.deal_id, &settled, Duration::from_secs(30))
            .await?;

        let verified = if deal.state == DealState::Active {
            coordinator.verify_deal(deal.deal_id).await?.verified
        } else {
            warn!(deal_id = deal.deal_id, provider = %deal.provider, failure = ?deal.failure, "Deal failed");
            false
        };
        deals.push(SimulatedDeal {
            deal_id: deal.deal_id,
            provider: deal.provider.to_string(),
            state: deal.state,
            duration_epochs: deal.duration_epochs,
            total_cost: deal.total_cost,
            chain_deal_id: deal.chain_deal_id,
            verified,
        });
    }

    let retrieval = match (
        deals.iter().find(|d| d.state == DealState::Active),
        prepared.archive.list_files()?.into_iter().next(),
    ) {
        (Some(deal), Some(file)) => {
            let bytes = coordinator.retrieve_file(deal.deal_id, &file.path).await?;
            let expected = prepared.archive.extract_file(&file.path)?;
            Some(RetrievalCheck {
                deal_id: deal.deal_id,
                path: file.path,
                bytes: bytes.len(),
                matches: bytes == expected,
            })
        }
        _ => None,
    };

    Ok(SimulationReport {
        dataset_id: dataset_id.to_string(),
        piece_cid: prepared.commitment.piece_cid(),
        padded_size: prepared.commitment.padded_size,
        deals,
        retrieval,
        stats: coordinator.get_stats().await?,
    })
}
