//! # Tessera Storage Market
//!
//! Storage deal management and verification engine for decentralized
//! storage networks.
//!
//! ## Overview
//!
//! A dataset is archived into a content-addressed TCAR archive, committed to
//! as a padded piece, and placed with several storage providers at minimum
//! cost. Each deal is then driven through its lifecycle and periodically
//! challenged to prove the provider still holds the data.
//!
//! ## Architecture
//!
//! - **Proof Engine**: Merkle inclusion proofs over archives, possession
//!   proofs over piece commitments, signed by the prover
//! - **Storage Optimizer**: replica, duration and provider selection under a
//!   budget; adaptive chunk sizing
//! - **Deal Manager**: per-deal lifecycle tasks reporting to a single registry
//!   writer, with cancellation, retries and renewal
//! - **External interfaces**: `LedgerClient` and `ProviderTransport` traits,
//!   with in-process simulations in [`sim`]
//!
//! ## Deal States
//!
//! 1. **Drafted**: parameters computed, nothing submitted
//! 2. **Proposed**: provider acknowledged, data handed over, transaction sent
//! 3. **Publishing**: transaction included, provider sealing
//! 4. **Active**: sealed and verified on schedule
//! 5. **Expiring** / **Renewed**: inside the expiry window, or extended
//! 6. **Expired** / **Failed**: terminal

pub mod coordinator;
pub mod deal_manager;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod optimizer;
pub mod pool;
pub mod proof;
pub mod provider;
pub mod retry;
pub mod sim;
pub mod types;

pub use coordinator::{MarketConfig, MarketStats, PreparedDataset, StorageMarketCoordinator};
pub use deal_manager::{DealManager, DealManagerConfig, RenewalPolicy};
pub use error::{Result, StorageMarketError};
pub use ledger::{
    InclusionStatus, LedgerAddress, LedgerClient, Receipt, StateQuery, StateValue, TransactionPayload, TxRef,
};
pub use lifecycle::{Applier, DealLifecycle, EventSink, LifecycleEvent, LifecycleEventKind, VerificationOutcome};
pub use optimizer::{
    ChunkPlan, ChunkingConfig, OptimizerConfig, PieceDescriptor, PlannedReplica, ProviderCatalog, ProviderListing,
    StorageOptimizer, StoragePlan,
};
pub use pool::ComputePool;
pub use proof::{
    challenge_index, derive_challenge_seed, generate_inclusion_proof, verify_inclusion_proof, verify_possession_proof,
    MerklePath, Proof, ProofEngine,
};
pub use provider::{ByteRange, ProviderAck, ProviderDealStatus, ProviderTransport};
pub use retry::RetryPolicy;
pub use sim::{LedgerBehaviour, ProviderBehaviour, SimulatedLedger, SimulatedNetwork, SimulatedProvider};
pub use types::{
    epochs_to_duration, AuditEntry, AuditEvent, Deal, DealParameters, DealState, FailureCause, LifecycleState,
    TransitionCause,
};
