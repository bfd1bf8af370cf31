//! In-process ledger and providers with scripted behaviour.
//!
//! Used by the integration tests and the `tessera simulate` command to run
//! the whole engine without a network.

use crate::error::{Result, StorageMarketError};
use crate::ledger::{
    InclusionStatus, LedgerAddress, LedgerClient, Receipt, StateQuery, StateValue, TransactionPayload, TxRef,
};
use crate::optimizer::{ProviderCatalog, ProviderListing};
use crate::pool::ComputePool;
use crate::proof::{Proof, ProofEngine};
use crate::provider::{ByteRange, ProviderAck, ProviderDealStatus, ProviderTransport};
use crate::types::DealParameters;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_archive::{MAX_SECTOR_SIZE, MIN_SECTOR_SIZE};
use tessera_crypto::{verify_signature, Keypair};
use tessera_types::{ContentId, DealId, FilAmount, ProviderAddress};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Take one unit from a failure budget, if any is left
fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Clone, Default)]
pub struct LedgerBehaviour {
    /// Reject every transaction with this reason
    pub reject_transactions: Option<String>,
    /// Accept transactions but never include them
    pub never_include: bool,
    /// Lose the first inclusion response for each transaction, so callers
    /// observe the same inclusion twice
    pub duplicate_inclusion: bool,
    pub inclusion_delay: Duration,
    /// Hold the response to a recorded submission this long
    pub submit_delay: Duration,
}

#[derive(Default)]
struct LedgerState {
    height: u64,
    next_chain_deal_id: u64,
    receipts: HashMap<TxRef, Receipt>,
    reported: HashMap<TxRef, u32>,
    chain_ids: HashMap<DealId, u64>,
    submitted: Vec<TransactionPayload>,
}

/// Ledger that includes transactions immediately, one block per transaction
pub struct SimulatedLedger {
    behaviour: RwLock<LedgerBehaviour>,
    state: Mutex<LedgerState>,
    beacon: [u8; 32],
    draws: AtomicU64,
    transient_failures: AtomicU32,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::with_behaviour(LedgerBehaviour::default())
    }

    pub fn with_behaviour(behaviour: LedgerBehaviour) -> Self {
        Self {
            behaviour: RwLock::new(behaviour),
            state: Mutex::new(LedgerState::default()),
            beacon: rand::random(),
            draws: AtomicU64::new(0),
            transient_failures: AtomicU32::new(0),
        }
    }

    pub async fn set_behaviour(&self, behaviour: LedgerBehaviour) {
        *self.behaviour.write().await = behaviour;
    }

    /// Fail the next `n` calls with a transient error
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    pub async fn height(&self) -> u64 {
        self.state.lock().await.height
    }

    pub async fn submitted(&self) -> Vec<TransactionPayload> {
        self.state.lock().await.submitted.clone()
    }

    /// Times an inclusion outcome was served for `tx_ref`
    pub async fn inclusion_reports(&self, tx_ref: &TxRef) -> u32 {
        self.state.lock().await.reported.get(tx_ref).copied().unwrap_or(0)
    }

    fn transient(&self, call: &str) -> Result<()> {
        if take_failure(&self.transient_failures) {
            return Err(StorageMarketError::TransientNetwork(format!("ledger {}: connection reset", call)));
        }
        Ok(())
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn submit_transaction(&self, payload: &TransactionPayload, keypair: &Keypair) -> Result<TxRef> {
        self.transient("submit_transaction")?;

        let message = payload.signing_bytes()?;
        let signature = keypair.sign(&message);
        if !verify_signature(&message, &signature, keypair.public_key()) {
            return Err(StorageMarketError::TransactionRejected("bad signature".to_string()));
        }

        let behaviour = self.behaviour.read().await.clone();
        let mut state = self.state.lock().await;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&message);
        hasher.update(&(state.submitted.len() as u64).to_le_bytes());
        let tx_ref = TxRef(hex::encode(&hasher.finalize().as_bytes()[..16]));

        let receipt = match &behaviour.reject_transactions {
            Some(reason) => Receipt {
                tx_ref: tx_ref.clone(),
                status: InclusionStatus::Rejected { reason: reason.clone() },
                block_height: state.height,
                chain_deal_id: None,
            },
            None => {
                state.height += 1;
                let deal_id = payload.deal_id();
                let chain_deal_id = match state.chain_ids.get(&deal_id) {
                    Some(id) => *id,
                    None => {
                        state.next_chain_deal_id += 1;
                        let id = state.next_chain_deal_id;
                        state.chain_ids.insert(deal_id, id);
                        id
                    }
                };
                Receipt {
                    tx_ref: tx_ref.clone(),
                    status: InclusionStatus::Included,
                    block_height: state.height,
                    chain_deal_id: Some(chain_deal_id),
                }
            }
        };

        state.receipts.insert(tx_ref.clone(), receipt);
        state.submitted.push(payload.clone());
        drop(state);
        debug!(tx_ref = %tx_ref, deal_id = payload.deal_id(), "Simulated transaction submitted");

        if !behaviour.submit_delay.is_zero() {
            tokio::time::sleep(behaviour.submit_delay).await;
        }
        Ok(tx_ref)
    }

    async fn await_inclusion(&self, tx_ref: &TxRef, timeout: Duration) -> Result<Receipt> {
        self.transient("await_inclusion")?;
        let behaviour = self.behaviour.read().await.clone();

        if behaviour.never_include || behaviour.inclusion_delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(StorageMarketError::TransientNetwork(format!("{} not yet included", tx_ref)));
        }
        if !behaviour.inclusion_delay.is_zero() {
            tokio::time::sleep(behaviour.inclusion_delay).await;
        }

        let mut state = self.state.lock().await;
        let receipt = state
            .receipts
            .get(tx_ref)
            .cloned()
            .ok_or_else(|| StorageMarketError::NotFound(format!("transaction {}", tx_ref)))?;
        let reported = state.reported.entry(tx_ref.clone()).or_default();
        *reported += 1;

        if behaviour.duplicate_inclusion && *reported == 1 {
            return Err(StorageMarketError::TransientNetwork(format!(
                "response for {} lost after inclusion",
                tx_ref
            )));
        }
        Ok(receipt)
    }

    async fn read_contract_state(&self, _address: &LedgerAddress, query: &StateQuery) -> Result<StateValue> {
        self.transient("read_contract_state")?;
        match query {
            StateQuery::Randomness { round } => {
                let draw = self.draws.fetch_add(1, Ordering::SeqCst);
                let mut hasher = blake3::Hasher::new();
                hasher.update(&self.beacon);
                hasher.update(&round.to_le_bytes());
                hasher.update(&draw.to_le_bytes());
                Ok(StateValue::Randomness(*hasher.finalize().as_bytes()))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderBehaviour {
    pub reject_proposals: Option<String>,
    pub reject_sealing: Option<String>,
    /// Status polls answered `Sealing` before the deal turns `Active`
    pub seal_after_polls: u32,
    pub never_seal: bool,
    /// Flip a byte of every proven leaf
    pub corrupt_proofs: bool,
    /// Answer challenges and retrievals as if the data were gone
    pub lose_data: bool,
}

struct HostedDeal {
    params: DealParameters,
    received: bool,
    polls: u32,
}

/// A storage provider that keeps pieces in memory and proves over them
pub struct SimulatedProvider {
    listing: ProviderListing,
    keypair: Keypair,
    behaviour: RwLock<ProviderBehaviour>,
    deals: Mutex<HashMap<DealId, HostedDeal>>,
    data: RwLock<HashMap<ContentId, Arc<Vec<u8>>>>,
    proofs: ProofEngine,
    transient_failures: AtomicU32,
}

impl SimulatedProvider {
    /// Provider accepting any duration and piece size
    pub fn new(address: &str, price_per_gib_epoch: FilAmount, region: &str) -> Self {
        let keypair = Keypair::generate();
        let listing = ProviderListing {
            address: ProviderAddress::new(address),
            public_key: *keypair.public_key(),
            price_per_gib_epoch,
            verified_price_per_gib_epoch: None,
            reliability: 0.99,
            region: region.to_string(),
            min_duration_epochs: 1,
            max_duration_epochs: u64::MAX,
            min_piece_size: MIN_SECTOR_SIZE,
            max_piece_size: MAX_SECTOR_SIZE,
        };
        Self::with_listing(listing, keypair)
    }

    /// `listing.public_key` is replaced by the keypair's
    pub fn with_listing(mut listing: ProviderListing, keypair: Keypair) -> Self {
        listing.public_key = *keypair.public_key();
        Self {
            listing,
            keypair,
            behaviour: RwLock::new(ProviderBehaviour::default()),
            deals: Mutex::new(HashMap::new()),
            data: RwLock::new(HashMap::new()),
            proofs: ProofEngine::new(ComputePool::new(2)),
            transient_failures: AtomicU32::new(0),
        }
    }

    pub fn address(&self) -> &ProviderAddress {
        &self.listing.address
    }

    pub fn listing(&self) -> &ProviderListing {
        &self.listing
    }

    pub async fn set_behaviour(&self, behaviour: ProviderBehaviour) {
        *self.behaviour.write().await = behaviour;
    }

    /// Fail the next `n` calls with a transient error
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    pub async fn holds(&self, piece_cid: &ContentId) -> bool {
        self.data.read().await.contains_key(piece_cid)
    }

    fn transient(&self, call: &str) -> Result<()> {
        if take_failure(&self.transient_failures) {
            return Err(StorageMarketError::TransientNetwork(format!(
                "{} {}: connection reset",
                self.listing.address, call
            )));
        }
        Ok(())
    }

    async fn propose(&self, deal_id: DealId, params: &DealParameters) -> Result<ProviderAck> {
        self.transient("propose_deal")?;
        if let Some(reason) = &self.behaviour.read().await.reject_proposals {
            return Ok(ProviderAck::rejected(reason.clone()));
        }
        if params.provider != self.listing.address {
            return Ok(ProviderAck::rejected(format!("proposal addressed to {}", params.provider)));
        }

        let mut deals = self.deals.lock().await;
        deals.entry(deal_id).or_insert_with(|| HostedDeal {
            params: params.clone(),
            received: false,
            polls: 0,
        });
        Ok(ProviderAck::accepted())
    }

    async fn receive(&self, deal_id: DealId, piece_cid: &ContentId, bytes: Arc<Vec<u8>>) -> Result<()> {
        self.transient("transfer_data")?;
        let padded_size = {
            let deals = self.deals.lock().await;
            let deal = deals
                .get(&deal_id)
                .ok_or_else(|| StorageMarketError::NotFound(format!("deal {} not proposed", deal_id)))?;
            if deal.params.piece_cid != *piece_cid {
                return Err(StorageMarketError::ProviderRejected(format!(
                    "deal {} is for piece {}",
                    deal_id, deal.params.piece_cid
                )));
            }
            deal.params.padded_size
        };

        let commitment = self.proofs.register_piece(Arc::clone(&bytes), padded_size).await?;
        if commitment.piece_cid() != *piece_cid {
            self.proofs.remove_piece(&commitment.piece_cid()).await;
            return Err(StorageMarketError::ProviderRejected(format!(
                "received bytes commit to {}, not {}",
                commitment.piece_cid(),
                piece_cid
            )));
        }

        self.data.write().await.insert(*piece_cid, bytes);
        if let Some(deal) = self.deals.lock().await.get_mut(&deal_id) {
            deal.received = true;
        }
        debug!(provider = %self.listing.address, deal_id, piece_cid = %piece_cid, "Simulated provider received piece");
        Ok(())
    }

    async fn status(&self, deal_id: DealId) -> Result<ProviderDealStatus> {
        self.transient("poll_status")?;
        let behaviour = self.behaviour.read().await.clone();
        let mut deals = self.deals.lock().await;
        let Some(deal) = deals.get_mut(&deal_id) else {
            return Ok(ProviderDealStatus::Unknown);
        };
        if !deal.received {
            return Ok(ProviderDealStatus::AwaitingData);
        }
        if let Some(reason) = behaviour.reject_sealing {
            return Ok(ProviderDealStatus::Rejected { reason });
        }
        if behaviour.never_seal {
            return Ok(ProviderDealStatus::Sealing);
        }
        deal.polls += 1;
        if deal.polls > behaviour.seal_after_polls {
            Ok(ProviderDealStatus::Active)
        } else {
            Ok(ProviderDealStatus::Sealing)
        }
    }

    async fn read(&self, piece_cid: &ContentId, range: ByteRange) -> Result<Vec<u8>> {
        self.transient("fetch_data")?;
        if self.behaviour.read().await.lose_data {
            return Err(StorageMarketError::NotFound(format!("piece {} not held", piece_cid)));
        }
        let data = self
            .data
            .read()
            .await
            .get(piece_cid)
            .cloned()
            .ok_or_else(|| StorageMarketError::NotFound(format!("piece {} not held", piece_cid)))?;
        if range.end() >= data.len() as u64 {
            return Err(StorageMarketError::MalformedInput(format!(
                "range {}..={} beyond piece of {} bytes",
                range.start(),
                range.end(),
                data.len()
            )));
        }
        Ok(data[range.start() as usize..=range.end() as usize].to_vec())
    }

    async fn prove(&self, piece_cid: &ContentId, seed: &[u8; 32]) -> Result<Proof> {
        self.transient("prove_possession")?;
        let behaviour = self.behaviour.read().await.clone();
        if behaviour.lose_data {
            return Err(StorageMarketError::NotFound(format!("piece {} not held", piece_cid)));
        }

        let mut proof = self.proofs.generate_possession_proof(piece_cid, seed).await?;
        if behaviour.corrupt_proofs {
            if let Some(byte) = proof.leaf_value.first_mut() {
                *byte ^= 0x01;
            }
        }
        proof.sign(&self.keypair);
        Ok(proof)
    }
}

/// Routes provider calls to simulated providers by address
#[derive(Default)]
pub struct SimulatedNetwork {
    providers: HashMap<ProviderAddress, Arc<SimulatedProvider>>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, provider: SimulatedProvider) -> Arc<SimulatedProvider> {
        let provider = Arc::new(provider);
        self.providers.insert(provider.address().clone(), Arc::clone(&provider));
        provider
    }

    pub fn provider(&self, address: &ProviderAddress) -> Option<&Arc<SimulatedProvider>> {
        self.providers.get(address)
    }

    /// Catalog listing every provider, ordered by address
    pub fn catalog(&self) -> ProviderCatalog {
        let mut listings: Vec<ProviderListing> = self.providers.values().map(|p| p.listing().clone()).collect();
        listings.sort_by(|a, b| a.address.cmp(&b.address));
        ProviderCatalog::new(listings)
    }

    fn route(&self, address: &ProviderAddress) -> Result<&Arc<SimulatedProvider>> {
        self.providers
            .get(address)
            .ok_or_else(|| StorageMarketError::TransientNetwork(format!("no route to {}", address)))
    }
}

#[async_trait]
impl ProviderTransport for SimulatedNetwork {
    async fn propose_deal(&self, provider: &ProviderAddress, deal_id: DealId, params: &DealParameters) -> Result<ProviderAck> {
        self.route(provider)?.propose(deal_id, params).await
    }

    async fn transfer_data(
        &self,
        provider: &ProviderAddress,
        deal_id: DealId,
        piece_cid: &ContentId,
        data: Arc<Vec<u8>>,
    ) -> Result<()> {
        self.route(provider)?.receive(deal_id, piece_cid, data).await
    }

    async fn poll_status(&self, provider: &ProviderAddress, deal_id: DealId) -> Result<ProviderDealStatus> {
        self.route(provider)?.status(deal_id).await
    }

    async fn fetch_data(&self, provider: &ProviderAddress, piece_cid: &ContentId, range: ByteRange) -> Result<Vec<u8>> {
        self.route(provider)?.read(piece_cid, range).await
    }

    async fn prove_possession(&self, provider: &ProviderAddress, piece_cid: &ContentId, seed: &[u8; 32]) -> Result<Proof> {
        self.route(provider)?.prove(piece_cid, seed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::{derive_challenge_seed, verify_possession_proof};
    use crate::types::Deal;
    use tessera_archive::{piece_commitment, CommitmentVersion};
    use tessera_types::DatasetId;

    fn params_for(provider: &SimulatedProvider, bytes: &[u8]) -> DealParameters {
        let commitment = piece_commitment(bytes, 0).unwrap();
        DealParameters {
            dataset_id: DatasetId::new(bytes),
            piece_cid: commitment.piece_cid(),
            commitment_version: CommitmentVersion::V1,
            raw_size: commitment.unpadded_size,
            padded_size: commitment.padded_size,
            provider: provider.address().clone(),
            provider_key: provider.listing().public_key,
            price_per_epoch: FilAmount::from_atto(1),
            duration_epochs: 10,
            verified: false,
            replication_factor: 1,
            replica_index: 0,
            total_cost: FilAmount::from_atto(10),
        }
    }

    #[tokio::test]
    async fn test_ledger_includes_and_assigns_chain_ids() {
        let ledger = SimulatedLedger::new();
        let keypair = Keypair::generate();
        let provider = SimulatedProvider::new("f01", FilAmount::from_atto(1), "eu");
        let deal = Deal::from_parameters(7, &params_for(&provider, b"payload"), chrono::Utc::now());

        let tx = ledger
            .submit_transaction(&TransactionPayload::publish(&deal), &keypair)
            .await
            .unwrap();
        let receipt = ledger.await_inclusion(&tx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(receipt.status, InclusionStatus::Included);
        assert_eq!(receipt.block_height, 1);
        assert_eq!(receipt.chain_deal_id, Some(1));

        // renewals keep the chain id
        let renew = ledger
            .submit_transaction(&TransactionPayload::renew(&deal, 5), &keypair)
            .await
            .unwrap();
        let receipt = ledger.await_inclusion(&renew, Duration::from_secs(1)).await.unwrap();
        assert_eq!(receipt.chain_deal_id, Some(1));
        assert_eq!(ledger.height().await, 2);
    }

    #[tokio::test]
    async fn test_ledger_rejects_and_drops() {
        let ledger = SimulatedLedger::with_behaviour(LedgerBehaviour {
            reject_transactions: Some("insufficient funds".to_string()),
            ..Default::default()
        });
        let keypair = Keypair::generate();
        let provider = SimulatedProvider::new("f01", FilAmount::from_atto(1), "eu");
        let deal = Deal::from_parameters(1, &params_for(&provider, b"x"), chrono::Utc::now());
        let tx = ledger
            .submit_transaction(&TransactionPayload::publish(&deal), &keypair)
            .await
            .unwrap();
        let receipt = ledger.await_inclusion(&tx, Duration::from_secs(1)).await.unwrap();
        assert!(matches!(receipt.status, InclusionStatus::Rejected { .. }));

        ledger
            .set_behaviour(LedgerBehaviour {
                never_include: true,
                ..Default::default()
            })
            .await;
        let err = ledger.await_inclusion(&tx, Duration::from_millis(10)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_duplicate_inclusion_reports_twice() {
        let ledger = SimulatedLedger::with_behaviour(LedgerBehaviour {
            duplicate_inclusion: true,
            ..Default::default()
        });
        let keypair = Keypair::generate();
        let provider = SimulatedProvider::new("f01", FilAmount::from_atto(1), "eu");
        let deal = Deal::from_parameters(1, &params_for(&provider, b"x"), chrono::Utc::now());
        let tx = ledger
            .submit_transaction(&TransactionPayload::publish(&deal), &keypair)
            .await
            .unwrap();

        assert!(ledger.await_inclusion(&tx, Duration::from_secs(1)).await.is_err());
        assert!(ledger.await_inclusion(&tx, Duration::from_secs(1)).await.is_ok());
        assert_eq!(ledger.inclusion_reports(&tx).await, 2);
    }

    #[tokio::test]
    async fn test_randomness_changes_per_draw() {
        let ledger = SimulatedLedger::new();
        let query = StateQuery::Randomness { round: 3 };
        let a = ledger.read_contract_state(&LedgerAddress::default(), &query).await.unwrap();
        let b = ledger.read_contract_state(&LedgerAddress::default(), &query).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_provider_proves_what_it_received() {
        let mut network = SimulatedNetwork::new();
        let provider = network.add(SimulatedProvider::new("f01", FilAmount::from_atto(1), "eu"));
        let bytes: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let params = params_for(&provider, &bytes);
        let addr = provider.address().clone();

        let ack = network.propose_deal(&addr, 1, &params).await.unwrap();
        assert!(ack.accepted);
        assert_eq!(network.poll_status(&addr, 1).await.unwrap(), ProviderDealStatus::AwaitingData);
        network
            .transfer_data(&addr, 1, &params.piece_cid, Arc::new(bytes.clone()))
            .await
            .unwrap();
        assert_eq!(network.poll_status(&addr, 1).await.unwrap(), ProviderDealStatus::Active);

        let seed = derive_challenge_seed(&[9u8; 32], 1, 0);
        let proof = network.prove_possession(&addr, &params.piece_cid, &seed).await.unwrap();
        assert!(proof.verify_signature(&params.provider_key));
        assert!(verify_possession_proof(&proof, &params.commitment().unwrap(), &seed));

        let range = ByteRange::new(10, 19).unwrap();
        let fetched = network.fetch_data(&addr, &params.piece_cid, range).await.unwrap();
        assert_eq!(fetched, bytes[10..20].to_vec());
    }

    #[tokio::test]
    async fn test_provider_rejects_mismatched_payload() {
        let mut network = SimulatedNetwork::new();
        let provider = network.add(SimulatedProvider::new("f01", FilAmount::from_atto(1), "eu"));
        let params = params_for(&provider, b"the agreed payload");
        let addr = provider.address().clone();

        network.propose_deal(&addr, 1, &params).await.unwrap();
        let err = network
            .transfer_data(&addr, 1, &params.piece_cid, Arc::new(b"something else".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageMarketError::ProviderRejected(_)));
        assert!(!provider.holds(&params.piece_cid).await);
    }

    #[tokio::test]
    async fn test_corrupt_proofs_fail_verification() {
        let mut network = SimulatedNetwork::new();
        let provider = network.add(SimulatedProvider::new("f01", FilAmount::from_atto(1), "eu"));
        let bytes = vec![7u8; 4096];
        let params = params_for(&provider, &bytes);
        let addr = provider.address().clone();
        network.propose_deal(&addr, 1, &params).await.unwrap();
        network
            .transfer_data(&addr, 1, &params.piece_cid, Arc::new(bytes))
            .await
            .unwrap();

        provider
            .set_behaviour(ProviderBehaviour {
                corrupt_proofs: true,
                ..Default::default()
            })
            .await;
        let seed = [3u8; 32];
        let proof = network.prove_possession(&addr, &params.piece_cid, &seed).await.unwrap();
        assert!(!verify_possession_proof(&proof, &params.commitment().unwrap(), &seed));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_unreachable() {
        let network = SimulatedNetwork::new();
        let err = network
            .poll_status(&ProviderAddress::new("f0404"), 1)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_catalog_lists_every_provider() {
        let mut network = SimulatedNetwork::new();
        network.add(SimulatedProvider::new("f02", FilAmount::from_atto(2), "us"));
        network.add(SimulatedProvider::new("f01", FilAmount::from_atto(1), "eu"));
        let catalog = network.catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.providers[0].address.as_str(), "f01");
    }
}
