//! Deal lifecycle tasks and the event applier.
//!
//! Each deal is driven by its own [`DealLifecycle`] task. Tasks never write
//! the registry themselves: they report what they observed as a
//! [`LifecycleEvent`] and the single [`Applier`] task turns it into a state
//! transition, one registry write per event. Tasks re-read the record after
//! every step, so a restarted task resumes from the last recorded state.

use crate::deal_manager::{DealManagerConfig, RenewalPolicy};
use crate::error::{Result, StorageMarketError};
use crate::ledger::{InclusionStatus, LedgerClient, Receipt, StateQuery, StateValue, TransactionPayload, TxRef};
use crate::proof::{derive_challenge_seed, verify_possession_proof, MerklePath, Proof};
use crate::provider::{ByteRange, ProviderDealStatus, ProviderTransport};
use crate::types::{std_to_chrono, Deal, DealState, FailureCause, LifecycleState, TransitionCause};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tessera_crypto::Keypair;
use tessera_storage::DealStore;
use tessera_types::DealId;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a lifecycle task observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEventKind {
    ProposalSubmitted { tx_ref: TxRef },
    InclusionObserved { block_height: u64, chain_deal_id: Option<u64> },
    SealingConfirmed,
    VerificationCompleted { ok: bool, detail: Option<String> },
    ExpiryWindowReached { expires_at: DateTime<Utc> },
    ExpiryReached { expires_at: DateTime<Utc> },
    RenewalConfirmed { extra_epochs: u64 },
    Failed { cause: FailureCause },
}

#[derive(Debug)]
pub struct LifecycleEvent {
    pub deal_id: DealId,
    pub kind: LifecycleEventKind,
    reply: oneshot::Sender<Result<Deal>>,
}

/// Sending half of the applier channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Report an event and wait for the record it produced
    pub async fn submit(&self, deal_id: DealId, kind: LifecycleEventKind) -> Result<Deal> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(LifecycleEvent { deal_id, kind, reply })
            .await
            .map_err(|_| StorageMarketError::Cancelled)?;
        response.await.map_err(|_| StorageMarketError::Cancelled)?
    }
}

/// Single writer of deal records
pub struct Applier {
    store: DealStore<Deal>,
    transitions: broadcast::Sender<Deal>,
    config: Arc<DealManagerConfig>,
}

impl Applier {
    pub fn new(store: DealStore<Deal>, transitions: broadcast::Sender<Deal>, config: Arc<DealManagerConfig>) -> Self {
        Self {
            store,
            transitions,
            config,
        }
    }

    pub fn spawn(self, mut rx: mpsc::Receiver<LifecycleEvent>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let result = self.apply(event.deal_id, event.kind).await;
                let _ = event.reply.send(result);
            }
            debug!("Lifecycle applier stopped");
        })
    }

    /// Apply one event. Duplicate and stale reports are no-ops.
    pub async fn apply(&self, deal_id: DealId, kind: LifecycleEventKind) -> Result<Deal> {
        let now = Utc::now();
        let epoch_duration = self.config.epoch_duration;
        let max_failures = self.config.max_consecutive_failures;

        let (deal, from) = self
            .store
            .update(deal_id, |deal: &mut Deal| -> Result<DealState> {
                let from = deal.state;
                match kind {
                    LifecycleEventKind::ProposalSubmitted { tx_ref } => match deal.state {
                        DealState::Drafted => {
                            deal.transition_to(
                                DealState::Proposed,
                                Some(TransitionCause::ProposalSubmitted { tx_ref: tx_ref.clone() }),
                                now,
                            )?;
                            deal.transaction_ref = Some(tx_ref);
                            deal.proposed_at = Some(now);
                        }
                        DealState::Proposed if deal.transaction_ref.as_ref() == Some(&tx_ref) => {}
                        _ => {
                            return Err(StorageMarketError::InvalidStateTransition {
                                from: format!("{:?}", deal.state),
                                to: format!("{:?}", DealState::Proposed),
                            })
                        }
                    },
                    LifecycleEventKind::InclusionObserved {
                        block_height,
                        chain_deal_id,
                    } => match deal.state {
                        DealState::Proposed => {
                            deal.transition_to(
                                DealState::Publishing,
                                Some(TransitionCause::InclusionObserved { block_height }),
                                now,
                            )?;
                            deal.chain_deal_id = chain_deal_id;
                        }
                        DealState::Drafted => {
                            return Err(StorageMarketError::InvalidStateTransition {
                                from: format!("{:?}", deal.state),
                                to: format!("{:?}", DealState::Publishing),
                            })
                        }
                        // already past inclusion
                        _ => {}
                    },
                    LifecycleEventKind::SealingConfirmed => match deal.state {
                        DealState::Publishing => deal.activate(now, epoch_duration)?,
                        DealState::Drafted | DealState::Proposed => {
                            return Err(StorageMarketError::InvalidStateTransition {
                                from: format!("{:?}", deal.state),
                                to: format!("{:?}", DealState::Active),
                            })
                        }
                        _ => {}
                    },
                    LifecycleEventKind::VerificationCompleted { ok, detail } => {
                        deal.record_verification(ok, detail, now, max_failures)?;
                    }
                    LifecycleEventKind::ExpiryWindowReached { expires_at } => {
                        if deal.state == DealState::Active && deal.expires_at == Some(expires_at) {
                            deal.transition_to(DealState::Expiring, Some(TransitionCause::ExpiryWindowReached), now)?;
                        }
                    }
                    LifecycleEventKind::ExpiryReached { expires_at } => {
                        if deal.state == DealState::Expiring && deal.expires_at == Some(expires_at) {
                            deal.transition_to(DealState::Expired, Some(TransitionCause::Lapsed), now)?;
                        }
                    }
                    LifecycleEventKind::RenewalConfirmed { extra_epochs } => {
                        deal.renew(extra_epochs, now, epoch_duration)?;
                    }
                    LifecycleEventKind::Failed { cause } => {
                        if !deal.state.is_terminal() {
                            deal.fail(cause, now)?;
                        }
                    }
                }
                Ok(from)
            })
            .await?;

        if deal.state != from {
            self.log_milestone(&deal, from);
        }
        // Receivers come and go; an empty channel is fine.
        let _ = self.transitions.send(deal.clone());
        Ok(deal)
    }

    fn log_milestone(&self, deal: &Deal, from: DealState) {
        match deal.state {
            DealState::Active if from == DealState::Publishing => info!(
                deal_id = deal.deal_id,
                provider = %deal.provider,
                piece_cid = %deal.piece_cid,
                expires_at = ?deal.expires_at,
                "Deal active"
            ),
            DealState::Active => info!(
                deal_id = deal.deal_id,
                provider = %deal.provider,
                renewals = deal.renewals,
                expires_at = ?deal.expires_at,
                "Deal renewed"
            ),
            DealState::Failed => warn!(
                deal_id = deal.deal_id,
                provider = %deal.provider,
                cause = ?deal.failure,
                "Deal failed"
            ),
            DealState::Expired => info!(
                deal_id = deal.deal_id,
                provider = %deal.provider,
                "Deal expired"
            ),
            state => debug!(deal_id = deal.deal_id, from = ?from, to = ?state, "Deal advanced"),
        }
    }
}

/// Result of challenging a provider
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub verified: bool,
    /// Last proof checked, when one was obtained
    pub proof: Option<Proof>,
    pub detail: Option<String>,
}

/// Collaborators shared by lifecycle tasks and the manager
#[derive(Clone)]
pub struct LifecycleContext {
    pub config: Arc<DealManagerConfig>,
    pub store: DealStore<Deal>,
    pub ledger: Arc<dyn LedgerClient>,
    pub provider: Arc<dyn ProviderTransport>,
    pub keypair: Arc<Keypair>,
    pub events: EventSink,
}

impl LifecycleContext {
    fn current_round(&self) -> u64 {
        let epoch_ms = self.config.epoch_duration.as_millis().max(1);
        (Utc::now().timestamp_millis().max(0) as u128 / epoch_ms) as u64
    }

    async fn challenge_randomness(&self) -> Result<[u8; 32]> {
        let query = StateQuery::Randomness {
            round: self.current_round(),
        };
        let value = self
            .config
            .retry
            .run("read_contract_state", || {
                self.ledger.read_contract_state(&self.config.ledger_address, &query)
            })
            .await?;
        match value {
            StateValue::Randomness(randomness) => Ok(randomness),
        }
    }

    /// Wait for a transaction's inclusion, bounded by the inclusion timeout
    pub async fn wait_for_inclusion(&self, tx_ref: &TxRef) -> Result<Receipt> {
        let timeout = self.config.inclusion_timeout;
        let per_call = timeout.min(self.config.retry.per_call_timeout);
        let receipt = tokio::time::timeout(
            timeout,
            self.config
                .retry
                .run("await_inclusion", || self.ledger.await_inclusion(tx_ref, per_call)),
        )
        .await
        .map_err(|_| StorageMarketError::InclusionTimeout(tx_ref.to_string()))??;

        match &receipt.status {
            InclusionStatus::Included => Ok(receipt),
            InclusionStatus::Rejected { reason } => Err(StorageMarketError::TransactionRejected(reason.clone())),
        }
    }

    /// Challenge the provider and check every answer. Failures of any kind,
    /// transport included, make the outcome unverified.
    pub async fn verify_storage(&self, deal: &Deal) -> VerificationOutcome {
        match self.challenge_deal(deal).await {
            Ok(proof) => VerificationOutcome {
                verified: true,
                proof: Some(proof),
                detail: None,
            },
            Err(e) => {
                warn!(
                    deal_id = deal.deal_id,
                    provider = %deal.provider,
                    piece_cid = %deal.piece_cid,
                    error = %e,
                    "Storage verification failed"
                );
                VerificationOutcome {
                    verified: false,
                    proof: None,
                    detail: Some(e.to_string()),
                }
            }
        }
    }

    async fn challenge_deal(&self, deal: &Deal) -> Result<Proof> {
        let commitment = deal.commitment()?;
        let randomness = self.challenge_randomness().await?;

        let mut last = None;
        for i in 0..self.config.challenges_per_verification.max(1) {
            let seed = derive_challenge_seed(&randomness, deal.deal_id, i);
            let proof = self
                .config
                .retry
                .run("prove_possession", || {
                    self.provider.prove_possession(&deal.provider, &deal.piece_cid, &seed)
                })
                .await?;

            if self.config.require_signed_proofs && !proof.verify_signature(&deal.provider_key) {
                return Err(StorageMarketError::VerificationFailed(
                    "proof signature does not verify".to_string(),
                ));
            }
            if !verify_possession_proof(&proof, &commitment, &seed) {
                return Err(StorageMarketError::VerificationFailed(format!(
                    "challenge {} answered with an invalid proof",
                    i
                )));
            }
            if self.config.retrieval_spot_check {
                self.spot_check(deal, &proof).await?;
            }
            last = Some(proof);
        }

        last.ok_or_else(|| StorageMarketError::VerificationFailed("no challenge issued".to_string()))
    }

    /// Retrieve the challenged leaf and compare it with the proven value
    async fn spot_check(&self, deal: &Deal, proof: &Proof) -> Result<()> {
        let MerklePath::Piece { leaf_index, .. } = &proof.merkle_path else {
            return Ok(());
        };
        let start = leaf_index.saturating_mul(32);
        if start >= deal.raw_size {
            return Ok(());
        }
        let end = (start + 31).min(deal.raw_size - 1);
        let range = ByteRange::new(start, end)?;

        let bytes = self
            .config
            .retry
            .run("fetch_data", || self.provider.fetch_data(&deal.provider, &deal.piece_cid, range))
            .await?;
        let expected = proof.leaf_value.get(..range.size() as usize);
        if expected != Some(bytes.as_slice()) {
            return Err(StorageMarketError::VerificationFailed(format!(
                "retrieved bytes {}..={} differ from the proven leaf",
                start, end
            )));
        }
        Ok(())
    }

    /// Submit a renewal, wait for inclusion, then apply it
    pub async fn renew(&self, deal: &Deal, extra_epochs: u64) -> Result<Deal> {
        let payload = TransactionPayload::renew(deal, extra_epochs);
        let tx_ref = self
            .config
            .retry
            .run("submit_transaction", || self.ledger.submit_transaction(&payload, &self.keypair))
            .await?;
        let receipt = self.wait_for_inclusion(&tx_ref).await?;
        debug!(
            deal_id = deal.deal_id,
            tx_ref = %tx_ref,
            block_height = receipt.block_height,
            "Renewal included"
        );
        self.events
            .submit(deal.deal_id, LifecycleEventKind::RenewalConfirmed { extra_epochs })
            .await
    }
}

async fn until_cancelled(cancel: &CancellationToken, step: impl Future<Output = Result<()>>) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(StorageMarketError::Cancelled),
        result = step => result,
    }
}

/// Drives one deal from its recorded state towards a terminal state
pub struct DealLifecycle {
    deal_id: DealId,
    ctx: LifecycleContext,
    payload: Option<Arc<Vec<u8>>>,
    cancel: CancellationToken,
    last_check: Option<DateTime<Utc>>,
    auto_renew_attempted: bool,
}

impl DealLifecycle {
    pub fn new(deal_id: DealId, ctx: LifecycleContext, payload: Option<Arc<Vec<u8>>>, cancel: CancellationToken) -> Self {
        Self {
            deal_id,
            ctx,
            payload,
            cancel,
            last_check: None,
            auto_renew_attempted: false,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let deal_id = self.deal_id;
        match self.drive().await {
            Ok(()) => debug!(deal_id, "Lifecycle task finished"),
            Err(StorageMarketError::Cancelled) => debug!(deal_id, "Lifecycle task cancelled"),
            Err(e) => warn!(deal_id, error = %e, "Lifecycle task stopped"),
        }
    }

    /// Cancellation is honoured between steps and inside waiting steps. Once
    /// a publish transaction is submitted, its reference is always recorded.
    async fn drive(&mut self) -> Result<()> {
        let cancel = self.cancel.clone();
        loop {
            if cancel.is_cancelled() {
                return Err(StorageMarketError::Cancelled);
            }
            let deal = self.ctx.store.require(self.deal_id).await?;
            let step = match deal.state {
                DealState::Expired | DealState::Failed => return Ok(()),
                DealState::Drafted => match until_cancelled(&cancel, self.hand_over(&deal)).await {
                    Ok(()) if cancel.is_cancelled() => Err(StorageMarketError::Cancelled),
                    Ok(()) => self.publish(&deal).await,
                    Err(e) => Err(e),
                },
                DealState::Proposed => until_cancelled(&cancel, self.await_inclusion(&deal)).await,
                DealState::Publishing => until_cancelled(&cancel, self.await_sealing(&deal)).await,
                DealState::Active | DealState::Renewed | DealState::Expiring => {
                    until_cancelled(&cancel, self.monitor(&deal)).await
                }
            };

            match step {
                Ok(()) => {}
                Err(StorageMarketError::Cancelled) => return Err(StorageMarketError::Cancelled),
                Err(StorageMarketError::InvalidStateTransition { from, to }) => {
                    debug!(deal_id = self.deal_id, from = %from, to = %to, "Stale report, re-reading deal");
                }
                Err(e) => {
                    warn!(
                        deal_id = self.deal_id,
                        provider = %deal.provider,
                        state = ?deal.state,
                        error = %e,
                        "Deal lifecycle step failed"
                    );
                    let cause = FailureCause::from_error(&e);
                    self.report(LifecycleEventKind::Failed { cause }).await?;
                }
            }
        }
    }

    async fn report(&self, kind: LifecycleEventKind) -> Result<Deal> {
        self.ctx.events.submit(self.deal_id, kind).await
    }

    /// Provider acceptance and data transfer. Safe to abandon and repeat.
    async fn hand_over(&self, deal: &Deal) -> Result<()> {
        let ctx = &self.ctx;
        let retry = &ctx.config.retry;
        let params = deal.parameters();

        let ack = retry
            .run("propose_deal", || ctx.provider.propose_deal(&deal.provider, deal.deal_id, &params))
            .await?;
        if !ack.accepted {
            return Err(StorageMarketError::ProviderRejected(
                ack.reason.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }

        match &self.payload {
            Some(data) => {
                retry
                    .run("transfer_data", || {
                        ctx.provider
                            .transfer_data(&deal.provider, deal.deal_id, &deal.piece_cid, Arc::clone(data))
                    })
                    .await?;
            }
            None => warn!(
                deal_id = deal.deal_id,
                provider = %deal.provider,
                "No payload held for transfer, assuming the provider already has it"
            ),
        }
        Ok(())
    }

    /// Submit the publish transaction and record its reference. Runs to
    /// completion even when the task is cancelled.
    async fn publish(&self, deal: &Deal) -> Result<()> {
        let ctx = &self.ctx;
        let payload = TransactionPayload::publish(deal);
        let tx_ref = ctx
            .config
            .retry
            .run("submit_transaction", || ctx.ledger.submit_transaction(&payload, &ctx.keypair))
            .await?;
        info!(
            deal_id = deal.deal_id,
            provider = %deal.provider,
            piece_cid = %deal.piece_cid,
            tx_ref = %tx_ref,
            "Deal proposed"
        );
        self.report(LifecycleEventKind::ProposalSubmitted { tx_ref }).await?;
        Ok(())
    }

    async fn await_inclusion(&self, deal: &Deal) -> Result<()> {
        let tx_ref = deal
            .transaction_ref
            .clone()
            .ok_or_else(|| StorageMarketError::Other("proposed deal has no transaction reference".to_string()))?;
        let receipt = self.ctx.wait_for_inclusion(&tx_ref).await?;
        self.report(LifecycleEventKind::InclusionObserved {
            block_height: receipt.block_height,
            chain_deal_id: receipt.chain_deal_id,
        })
        .await?;
        Ok(())
    }

    async fn await_sealing(&self, deal: &Deal) -> Result<()> {
        let config = &self.ctx.config;
        let max_polls = config.max_polls.max(1);

        for poll in 0..max_polls {
            let status = config
                .retry
                .run("poll_status", || self.ctx.provider.poll_status(&deal.provider, deal.deal_id))
                .await?;
            match status {
                ProviderDealStatus::Active => {
                    self.report(LifecycleEventKind::SealingConfirmed).await?;
                    return Ok(());
                }
                ProviderDealStatus::Rejected { reason } => {
                    return Err(StorageMarketError::ProviderRejected(reason));
                }
                ProviderDealStatus::AwaitingData | ProviderDealStatus::Sealing | ProviderDealStatus::Unknown => {}
            }
            if poll + 1 < max_polls {
                tokio::time::sleep(config.poll_interval(poll)).await;
            }
        }

        self.report(LifecycleEventKind::Failed {
            cause: FailureCause::PollBudgetExhausted { polls: max_polls },
        })
        .await?;
        Ok(())
    }

    /// One monitoring step for a sealed deal: expire, renew, verify, or
    /// sleep until the next of those is due.
    async fn monitor(&mut self, deal: &Deal) -> Result<()> {
        let config = Arc::clone(&self.ctx.config);
        let now = Utc::now();
        let expires_at = deal
            .expires_at
            .ok_or_else(|| StorageMarketError::Other("sealed deal has no expiry".to_string()))?;
        let expiring_at = expires_at - std_to_chrono(config.expiring_window);

        if deal.state == DealState::Expiring && now >= expires_at {
            self.report(LifecycleEventKind::ExpiryReached { expires_at }).await?;
            return Ok(());
        }

        if now >= expiring_at {
            if let RenewalPolicy::Auto { extra_epochs } = config.renewal_policy {
                if !self.auto_renew_attempted {
                    self.auto_renew_attempted = true;
                    match self.ctx.renew(deal, extra_epochs).await {
                        Ok(_) => {
                            self.auto_renew_attempted = false;
                            return Ok(());
                        }
                        Err(StorageMarketError::Cancelled) => return Err(StorageMarketError::Cancelled),
                        Err(e) => warn!(
                            deal_id = deal.deal_id,
                            provider = %deal.provider,
                            error = %e,
                            "Automatic renewal failed"
                        ),
                    }
                }
            }
            if deal.state == DealState::Active {
                self.report(LifecycleEventKind::ExpiryWindowReached { expires_at }).await?;
                return Ok(());
            }
        }

        let last = self
            .last_check
            .or(deal.last_verified_at)
            .or(deal.activated_at)
            .unwrap_or(now);
        let due = last + std_to_chrono(config.verification_interval);
        if now >= due {
            self.last_check = Some(now);
            let outcome = self.ctx.verify_storage(deal).await;
            self.report(LifecycleEventKind::VerificationCompleted {
                ok: outcome.verified,
                detail: outcome.detail,
            })
            .await?;
            return Ok(());
        }

        let next = if deal.state == DealState::Expiring {
            due.min(expires_at)
        } else {
            due.min(expiring_at)
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        Ok(())
    }
}
