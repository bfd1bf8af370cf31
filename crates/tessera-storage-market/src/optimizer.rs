//! Storage Optimizer
//!
//! Chooses replica count, duration and providers for a piece at minimum cost,
//! and picks a chunk size for large payloads.

use crate::error::{Result, StorageMarketError};
use crate::types::DealParameters;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use tessera_archive::{padded_sector_size, CommitmentVersion, PieceCommitment};
use tessera_types::{ContentId, DatasetId, FilAmount, ProviderAddress, PublicKey, DEFAULT_CHUNK_SIZE, DEFAULT_FANOUT};
use tracing::{debug, info};

const GIB: u128 = 1 << 30;
const MIB: u64 = 1 << 20;

/// One provider's offer in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderListing {
    pub address: ProviderAddress,
    pub public_key: PublicKey,
    pub price_per_gib_epoch: FilAmount,
    #[serde(default)]
    pub verified_price_per_gib_epoch: Option<FilAmount>,
    /// Observed fraction of deals kept to term (0.0 – 1.0)
    pub reliability: f64,
    pub region: String,
    pub min_duration_epochs: u64,
    pub max_duration_epochs: u64,
    pub min_piece_size: u64,
    pub max_piece_size: u64,
}

impl ProviderListing {
    fn price(&self, verified: bool) -> Option<FilAmount> {
        if verified {
            self.verified_price_per_gib_epoch
        } else {
            Some(self.price_per_gib_epoch)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCatalog {
    pub providers: Vec<ProviderListing>,
}

impl ProviderCatalog {
    pub fn new(providers: Vec<ProviderListing>) -> Self {
        Self { providers }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StorageMarketError::MalformedInput(format!("provider catalog: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| StorageMarketError::NotFound(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn find(&self, address: &ProviderAddress) -> Option<&ProviderListing> {
        self.providers.iter().find(|p| &p.address == address)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Chunk size selection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Payloads below this size use `default_chunk_size`
    pub threshold_bytes: u64,
    pub default_chunk_size: u64,
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub tree_arity: u64,
    pub depth_weight: f64,
    pub overhead_weight: f64,
    pub granularity_weight: f64,
    /// Fixed transfer cost per chunk (headers, CID, round trip)
    pub per_chunk_overhead_bytes: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: 64 * MIB,
            default_chunk_size: DEFAULT_CHUNK_SIZE as u64,
            min_chunk_size: 256 * 1024,
            max_chunk_size: 4 * MIB,
            tree_arity: DEFAULT_FANOUT as u64,
            depth_weight: 1.0,
            overhead_weight: 1.0,
            granularity_weight: 1.0,
            per_chunk_overhead_bytes: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub min_duration_epochs: u64,
    pub candidate_durations: Vec<u64>,
    pub min_reliability: f64,
    /// Use verified-deal pricing
    pub verified: bool,
    pub chunking: ChunkingConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_duration_epochs: 518_400, // ~180 days at 30s epochs
            candidate_durations: vec![518_400, 777_600, 1_051_200, 1_555_200],
            min_reliability: 0.9,
            verified: false,
            chunking: ChunkingConfig::default(),
        }
    }
}

/// Piece to place, as produced by the archive codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceDescriptor {
    pub dataset_id: DatasetId,
    pub piece_cid: ContentId,
    pub commitment_version: CommitmentVersion,
    pub raw_size: u64,
    pub padded_size: u64,
}

impl PieceDescriptor {
    pub fn new(dataset_id: DatasetId, commitment: &PieceCommitment) -> Self {
        Self {
            dataset_id,
            piece_cid: commitment.piece_cid(),
            commitment_version: commitment.version,
            raw_size: commitment.unpadded_size,
            padded_size: commitment.padded_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedReplica {
    pub provider: ProviderAddress,
    pub provider_key: PublicKey,
    pub region: String,
    pub reliability: f64,
    pub price_per_epoch: FilAmount,
    pub cost: FilAmount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePlan {
    pub duration_epochs: u64,
    pub padded_size: u64,
    pub replicas: Vec<PlannedReplica>,
    pub total_cost: FilAmount,
    pub reliability_sum: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub chunk_size: u64,
    pub chunk_count: u64,
    pub tree_arity: u64,
    pub tree_depth: u32,
}

#[derive(Debug, Clone)]
struct Candidate<'a> {
    listing: &'a ProviderListing,
    price_per_epoch: FilAmount,
    cost: FilAmount,
}

/// `ceil(price × units × padded / GiB)`, `None` on overflow
fn scaled_cost(price_per_gib: FilAmount, units: u64, padded_size: u64) -> Option<FilAmount> {
    let numerator = price_per_gib
        .to_atto()
        .checked_mul(units as u128)?
        .checked_mul(padded_size as u128)?;
    Some(FilAmount::from_atto(numerator.div_ceil(GIB)))
}

fn tree_depth(chunk_count: u64, arity: u64) -> u32 {
    let arity = arity.max(2);
    let mut nodes = chunk_count.max(1);
    let mut depth = 1;
    while nodes > arity {
        nodes = nodes.div_ceil(arity);
        depth += 1;
    }
    depth
}

#[derive(Debug, Clone)]
pub struct StorageOptimizer {
    config: OptimizerConfig,
}

impl StorageOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    fn durations(&self) -> Vec<u64> {
        let mut durations: Vec<u64> = self
            .config
            .candidate_durations
            .iter()
            .copied()
            .filter(|d| *d >= self.config.min_duration_epochs)
            .collect();
        if durations.is_empty() {
            durations.push(self.config.min_duration_epochs);
        }
        durations.sort_unstable();
        durations.dedup();
        durations
    }

    fn eligible<'a>(&self, catalog: &'a ProviderCatalog, duration: u64, padded_size: u64) -> Vec<Candidate<'a>> {
        let mut seen = HashSet::new();
        catalog
            .providers
            .iter()
            .filter(|p| (p.min_duration_epochs..=p.max_duration_epochs).contains(&duration))
            .filter(|p| (p.min_piece_size..=p.max_piece_size).contains(&padded_size))
            .filter(|p| p.reliability >= self.config.min_reliability)
            .filter_map(|p| {
                let price = p.price(self.config.verified)?;
                Some(Candidate {
                    listing: p,
                    price_per_epoch: scaled_cost(price, 1, padded_size)?,
                    cost: scaled_cost(price, duration, padded_size)?,
                })
            })
            .filter(|c| seen.insert(c.listing.address.clone()))
            .collect()
    }

    /// Cheapest `min_replicas` providers for one duration. Equal-cost ties go
    /// to higher reliability, then a region not yet used, then address.
    fn select(&self, mut candidates: Vec<Candidate<'_>>, duration: u64, padded_size: u64, min_replicas: usize) -> Option<StoragePlan> {
        if candidates.len() < min_replicas {
            return None;
        }
        candidates.sort_by(|a, b| {
            a.cost
                .cmp(&b.cost)
                .then_with(|| b.listing.reliability.partial_cmp(&a.listing.reliability).unwrap_or(Ordering::Equal))
                .then_with(|| a.listing.address.cmp(&b.listing.address))
        });

        let mut regions: HashSet<&str> = HashSet::new();
        let mut replicas = Vec::with_capacity(min_replicas);
        while replicas.len() < min_replicas {
            let best = candidates.first()?;
            let (cost, reliability) = (best.cost, best.listing.reliability);
            let pick = candidates
                .iter()
                .take_while(|c| c.cost == cost && c.listing.reliability == reliability)
                .position(|c| !regions.contains(c.listing.region.as_str()))
                .unwrap_or(0);
            let chosen = candidates.remove(pick);
            regions.insert(chosen.listing.region.as_str());
            replicas.push(PlannedReplica {
                provider: chosen.listing.address.clone(),
                provider_key: chosen.listing.public_key,
                region: chosen.listing.region.clone(),
                reliability: chosen.listing.reliability,
                price_per_epoch: chosen.price_per_epoch,
                cost: chosen.cost,
            });
        }

        let total_cost = replicas
            .iter()
            .try_fold(FilAmount::ZERO, |acc, r| acc.checked_add(r.cost))?;
        let reliability_sum = replicas.iter().map(|r| r.reliability).sum();
        Some(StoragePlan {
            duration_epochs: duration,
            padded_size,
            replicas,
            total_cost,
            reliability_sum,
        })
    }

    /// Minimum-cost plan for a payload of `size_bytes`
    pub fn plan(&self, size_bytes: u64, budget: FilAmount, min_replicas: usize, catalog: &ProviderCatalog) -> Result<StoragePlan> {
        if min_replicas == 0 {
            return Err(StorageMarketError::MalformedInput(
                "min_replicas must be at least 1".to_string(),
            ));
        }
        let padded_size = padded_sector_size(size_bytes, 0)?;

        let best = self
            .durations()
            .into_iter()
            .filter_map(|d| self.select(self.eligible(catalog, d, padded_size), d, padded_size, min_replicas))
            .min_by(|a, b| {
                a.total_cost
                    .cmp(&b.total_cost)
                    .then_with(|| b.reliability_sum.partial_cmp(&a.reliability_sum).unwrap_or(Ordering::Equal))
                    .then_with(|| b.duration_epochs.cmp(&a.duration_epochs))
            });

        let Some(plan) = best else {
            return Err(StorageMarketError::BudgetInfeasible { required: None, budget });
        };
        if plan.total_cost > budget {
            return Err(StorageMarketError::BudgetInfeasible {
                required: Some(plan.total_cost),
                budget,
            });
        }

        debug!(
            padded_size,
            duration_epochs = plan.duration_epochs,
            replicas = plan.replicas.len(),
            total_cost = %plan.total_cost,
            "Storage plan selected"
        );
        Ok(plan)
    }

    /// Deal parameters for each replica of the cheapest feasible plan
    pub fn optimize(
        &self,
        piece: &PieceDescriptor,
        budget: FilAmount,
        min_replicas: usize,
        catalog: &ProviderCatalog,
    ) -> Result<Vec<DealParameters>> {
        let plan = self.plan(piece.padded_size, budget, min_replicas, catalog)?;
        let replication_factor = plan.replicas.len() as u32;

        info!(
            dataset_id = %piece.dataset_id,
            piece_cid = %piece.piece_cid,
            replicas = replication_factor,
            duration_epochs = plan.duration_epochs,
            total_cost = %plan.total_cost,
            "Deal parameters computed"
        );

        Ok(plan
            .replicas
            .into_iter()
            .enumerate()
            .map(|(i, replica)| DealParameters {
                dataset_id: piece.dataset_id,
                piece_cid: piece.piece_cid,
                commitment_version: piece.commitment_version,
                raw_size: piece.raw_size,
                padded_size: piece.padded_size,
                provider: replica.provider,
                provider_key: replica.provider_key,
                price_per_epoch: replica.price_per_epoch,
                duration_epochs: plan.duration_epochs,
                verified: self.config.verified,
                replication_factor,
                replica_index: i as u32,
                total_cost: replica.cost,
            })
            .collect())
    }

    /// Chunk size for a payload. Small payloads use the default; large ones
    /// score power-of-two sizes by proof depth, per-chunk transfer overhead
    /// and recovery granularity.
    pub fn chunking_strategy(&self, size_bytes: u64) -> ChunkPlan {
        let cfg = &self.config.chunking;
        let arity = cfg.tree_arity.max(2);
        let plan_for = |chunk_size: u64| {
            let chunk_count = size_bytes.div_ceil(chunk_size).max(1);
            ChunkPlan {
                chunk_size,
                chunk_count,
                tree_arity: arity,
                tree_depth: tree_depth(chunk_count, arity),
            }
        };

        if size_bytes < cfg.threshold_bytes {
            return plan_for(cfg.default_chunk_size.max(1));
        }

        let score = |plan: &ChunkPlan| {
            let overhead_pct =
                (plan.chunk_count * cfg.per_chunk_overhead_bytes) as f64 / size_bytes.max(1) as f64 * 100.0;
            let granularity_mib = plan.chunk_size as f64 / MIB as f64;
            cfg.depth_weight * plan.tree_depth as f64
                + cfg.overhead_weight * overhead_pct
                + cfg.granularity_weight * granularity_mib
        };

        let mut best: Option<(ChunkPlan, f64)> = None;
        let mut chunk_size = cfg.min_chunk_size.max(1).next_power_of_two();
        while chunk_size <= cfg.max_chunk_size.max(1) {
            let plan = plan_for(chunk_size);
            let s = score(&plan);
            // strict comparison keeps the smaller chunk on ties
            if best.map_or(true, |(_, b)| s < b) {
                best = Some((plan, s));
            }
            chunk_size *= 2;
        }

        best.map(|(plan, _)| plan)
            .unwrap_or_else(|| plan_for(cfg.default_chunk_size.max(1)))
    }
}

impl Default for StorageOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}
