use crate::error::{Result, StorageMarketError};
use crate::ledger::TxRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tessera_archive::{CommitmentVersion, PieceCommitment};
use tessera_storage::RegistryRecord;
use tessera_types::{ContentId, DatasetId, DealId, FilAmount, ProviderAddress, PublicKey};

/// Shared shape of lifecycle state enums
pub trait LifecycleState: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    fn is_terminal(&self) -> bool;
    fn can_transition_to(&self, next: &Self) -> bool;
}

/// Deal lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DealState {
    /// Parameters computed, nothing submitted
    Drafted,
    /// Provider acknowledged, proposal transaction submitted
    Proposed,
    /// Proposal included on the ledger, provider sealing
    Publishing,
    /// Sealed and under periodic verification
    Active,
    /// Inside the window before expiry
    Expiring,
    /// Renewal confirmed, about to return to Active
    Renewed,
    /// Ran to term without renewal
    Expired,
    /// Terminal failure, see `Deal::failure`
    Failed,
}

impl LifecycleState for DealState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Failed)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use DealState::*;
        match (self, next) {
            // Terminal states cannot transition
            (Expired, _) | (Failed, _) => false,

            // Any live state may fail
            (_, Failed) => true,

            (Drafted, Proposed) => true,
            (Proposed, Publishing) => true,
            (Publishing, Active) => true,

            (Active, Expiring) => true,
            (Active, Renewed) => true, // Early renewal
            (Expiring, Renewed) => true,
            (Expiring, Expired) => true,
            (Renewed, Active) => true,

            _ => false,
        }
    }
}

impl DealState {
    /// States in which the provider is expected to hold the sealed piece
    pub fn is_storing(&self) -> bool {
        matches!(self, Self::Active | Self::Expiring | Self::Renewed)
    }
}

impl fmt::Display for DealState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a deal ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    ProviderRejected { reason: String },
    TransactionRejected { reason: String },
    InclusionTimeout,
    PollBudgetExhausted { polls: u32 },
    RetryBudgetExhausted { operation: String },
    VerificationFailed { consecutive: u32 },
    Internal { reason: String },
}

impl FailureCause {
    /// Map a lifecycle error onto the recorded cause
    pub fn from_error(error: &StorageMarketError) -> Self {
        match error {
            StorageMarketError::ProviderRejected(reason) => Self::ProviderRejected {
                reason: reason.clone(),
            },
            StorageMarketError::TransactionRejected(reason) => Self::TransactionRejected {
                reason: reason.clone(),
            },
            StorageMarketError::InclusionTimeout(_) => Self::InclusionTimeout,
            StorageMarketError::RetryBudgetExhausted { operation, .. } => Self::RetryBudgetExhausted {
                operation: operation.clone(),
            },
            StorageMarketError::TransientNetwork(_) => Self::RetryBudgetExhausted {
                operation: "network".to_string(),
            },
            other => Self::Internal {
                reason: other.to_string(),
            },
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderRejected { reason } => write!(f, "provider rejected: {}", reason),
            Self::TransactionRejected { reason } => write!(f, "transaction rejected: {}", reason),
            Self::InclusionTimeout => write!(f, "inclusion timed out"),
            Self::PollBudgetExhausted { polls } => write!(f, "no sealing after {} polls", polls),
            Self::RetryBudgetExhausted { operation } => write!(f, "retries exhausted for {}", operation),
            Self::VerificationFailed { consecutive } => {
                write!(f, "{} consecutive failed verifications", consecutive)
            }
            Self::Internal { reason } => write!(f, "internal: {}", reason),
        }
    }
}

/// What caused a transition; recorded in the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionCause {
    ProposalSubmitted { tx_ref: TxRef },
    InclusionObserved { block_height: u64 },
    SealingConfirmed,
    ExpiryWindowReached,
    RenewalRequested { extra_epochs: u64 },
    RenewalCompleted,
    Lapsed,
    Failure { cause: FailureCause },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    Transition {
        from: DealState,
        to: DealState,
        cause: Option<TransitionCause>,
    },
    Verification {
        ok: bool,
        detail: Option<String>,
    },
    Renewal {
        extra_epochs: u64,
        new_expires_at: Option<DateTime<Utc>>,
    },
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub event: AuditEvent,
}

/// Parameters of one replica deal, as chosen by the optimizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealParameters {
    pub dataset_id: DatasetId,
    pub piece_cid: ContentId,
    pub commitment_version: CommitmentVersion,
    pub raw_size: u64,
    pub padded_size: u64,
    pub provider: ProviderAddress,
    pub provider_key: PublicKey,
    pub price_per_epoch: FilAmount,
    pub duration_epochs: u64,
    pub verified: bool,
    pub replication_factor: u32,
    pub replica_index: u32,
    /// Cost of this replica over its full duration
    pub total_cost: FilAmount,
}

impl DealParameters {
    pub fn commitment(&self) -> Result<PieceCommitment> {
        Ok(PieceCommitment::from_piece_cid(
            &self.piece_cid,
            self.commitment_version,
            self.padded_size,
            self.raw_size,
        )?)
    }
}

/// Storage deal record, persisted in the deal registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    // ========== Identity ==========
    pub deal_id: DealId,
    pub dataset_id: DatasetId,
    pub replica_index: u32,
    pub replication_factor: u32,

    // ========== Piece ==========
    pub piece_cid: ContentId,
    pub commitment_version: CommitmentVersion,
    pub raw_size: u64,
    pub padded_size: u64,

    // ========== Terms ==========
    pub provider: ProviderAddress,
    pub provider_key: PublicKey,
    pub price_per_epoch: FilAmount,
    pub duration_epochs: u64,
    pub verified: bool,
    pub total_cost: FilAmount,

    // ========== Lifecycle ==========
    pub state: DealState,
    pub created_at: DateTime<Utc>,
    pub proposed_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub transaction_ref: Option<TxRef>,
    pub chain_deal_id: Option<u64>,
    pub consecutive_failures: u32,
    pub renewals: u32,
    pub failure: Option<FailureCause>,
    pub audit_trail: Vec<AuditEntry>,
}

impl Deal {
    pub fn from_parameters(deal_id: DealId, params: &DealParameters, now: DateTime<Utc>) -> Self {
        Self {
            deal_id,
            dataset_id: params.dataset_id,
            replica_index: params.replica_index,
            replication_factor: params.replication_factor,
            piece_cid: params.piece_cid,
            commitment_version: params.commitment_version,
            raw_size: params.raw_size,
            padded_size: params.padded_size,
            provider: params.provider.clone(),
            provider_key: params.provider_key,
            price_per_epoch: params.price_per_epoch,
            duration_epochs: params.duration_epochs,
            verified: params.verified,
            total_cost: params.total_cost,
            state: DealState::Drafted,
            created_at: now,
            proposed_at: None,
            activated_at: None,
            expires_at: None,
            last_verified_at: None,
            transaction_ref: None,
            chain_deal_id: None,
            consecutive_failures: 0,
            renewals: 0,
            failure: None,
            audit_trail: Vec::new(),
        }
    }

    pub fn parameters(&self) -> DealParameters {
        DealParameters {
            dataset_id: self.dataset_id,
            piece_cid: self.piece_cid,
            commitment_version: self.commitment_version,
            raw_size: self.raw_size,
            padded_size: self.padded_size,
            provider: self.provider.clone(),
            provider_key: self.provider_key,
            price_per_epoch: self.price_per_epoch,
            duration_epochs: self.duration_epochs,
            verified: self.verified,
            replication_factor: self.replication_factor,
            replica_index: self.replica_index,
            total_cost: self.total_cost,
        }
    }

    pub fn commitment(&self) -> Result<PieceCommitment> {
        Ok(PieceCommitment::from_piece_cid(
            &self.piece_cid,
            self.commitment_version,
            self.padded_size,
            self.raw_size,
        )?)
    }

    /// Transition to a new state, recording it in the audit trail
    pub fn transition_to(
        &mut self,
        new_state: DealState,
        cause: Option<TransitionCause>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(StorageMarketError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", new_state),
            });
        }

        tracing::debug!(
            deal_id = self.deal_id,
            from = ?self.state,
            to = ?new_state,
            "Storage deal state transition"
        );

        self.audit_trail.push(AuditEntry {
            at,
            event: AuditEvent::Transition {
                from: self.state,
                to: new_state,
                cause,
            },
        });
        self.state = new_state;
        Ok(())
    }

    pub fn fail(&mut self, cause: FailureCause, at: DateTime<Utc>) -> Result<()> {
        self.transition_to(
            DealState::Failed,
            Some(TransitionCause::Failure { cause: cause.clone() }),
            at,
        )?;
        self.failure = Some(cause);
        Ok(())
    }

    /// Record a verification outcome. Returns true when the failure streak
    /// reached `max_consecutive_failures` and the deal moved to `Failed`.
    pub fn record_verification(
        &mut self,
        ok: bool,
        detail: Option<String>,
        at: DateTime<Utc>,
        max_consecutive_failures: u32,
    ) -> Result<bool> {
        if !self.state.is_storing() {
            return Err(StorageMarketError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: "Verification".to_string(),
            });
        }

        self.audit_trail.push(AuditEntry {
            at,
            event: AuditEvent::Verification { ok, detail },
        });

        if ok {
            self.last_verified_at = Some(at);
            self.consecutive_failures = 0;
            return Ok(false);
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= max_consecutive_failures.max(1) {
            self.fail(
                FailureCause::VerificationFailed {
                    consecutive: self.consecutive_failures,
                },
                at,
            )?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Mark sealing complete and fix the expiry
    pub fn activate(&mut self, at: DateTime<Utc>, epoch_duration: Duration) -> Result<()> {
        self.transition_to(DealState::Active, Some(TransitionCause::SealingConfirmed), at)?;
        self.activated_at = Some(at);
        self.expires_at = Some(at + epochs_to_duration(self.duration_epochs, epoch_duration));
        Ok(())
    }

    /// Apply a confirmed renewal: Active/Expiring → Renewed → Active in one step
    pub fn renew(&mut self, extra_epochs: u64, at: DateTime<Utc>, epoch_duration: Duration) -> Result<()> {
        self.transition_to(
            DealState::Renewed,
            Some(TransitionCause::RenewalRequested { extra_epochs }),
            at,
        )?;

        let base = self.expires_at.unwrap_or(at).max(at);
        let new_expires_at = base + epochs_to_duration(extra_epochs, epoch_duration);
        self.expires_at = Some(new_expires_at);
        self.duration_epochs = self.duration_epochs.saturating_add(extra_epochs);
        self.total_cost = self
            .total_cost
            .saturating_add(FilAmount::from_atto(
                self.price_per_epoch.to_atto().saturating_mul(extra_epochs as u128),
            ));
        self.renewals += 1;
        self.audit_trail.push(AuditEntry {
            at,
            event: AuditEvent::Renewal {
                extra_epochs,
                new_expires_at: Some(new_expires_at),
            },
        });

        self.transition_to(DealState::Active, Some(TransitionCause::RenewalCompleted), at)
    }

    /// Start of the expiring window, once the deal is active
    pub fn expiring_at(&self, window: Duration) -> Option<DateTime<Utc>> {
        self.expires_at.map(|e| e - std_to_chrono(window))
    }
}

impl RegistryRecord for Deal {
    fn deal_id(&self) -> DealId {
        self.deal_id
    }

    fn dataset_id(&self) -> DatasetId {
        self.dataset_id
    }
}

/// Wall-clock length of `epochs` ledger epochs
pub fn epochs_to_duration(epochs: u64, epoch_duration: Duration) -> chrono::Duration {
    let micros = epoch_duration.as_micros().saturating_mul(epochs as u128);
    chrono::Duration::microseconds(micros.min(MAX_SPAN_MICROS as u128) as i64)
}

pub(crate) fn std_to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::microseconds(d.as_micros().min(MAX_SPAN_MICROS as u128) as i64)
}

// Keeps `DateTime + span` clear of chrono's representable range.
const MAX_SPAN_MICROS: i64 = i64::MAX / 2;
