//! Interface to the settlement ledger. Only what the deal engine needs:
//! submit a transaction, wait for its inclusion, read contract state.

use crate::error::{Result, StorageMarketError};
use crate::types::Deal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tessera_crypto::Keypair;
use tessera_types::{ContentId, DatasetId, DealId, FilAmount, ProviderAddress};

/// Ledger-assigned handle for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(pub String);

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of the storage market contract on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerAddress(pub String);

impl Default for LedgerAddress {
    fn default() -> Self {
        Self("f05".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionPayload {
    PublishDeal {
        deal_id: DealId,
        dataset_id: DatasetId,
        piece_cid: ContentId,
        padded_size: u64,
        provider: ProviderAddress,
        price_per_epoch: FilAmount,
        duration_epochs: u64,
        verified: bool,
    },
    RenewDeal {
        deal_id: DealId,
        chain_deal_id: Option<u64>,
        extra_epochs: u64,
    },
}

impl TransactionPayload {
    pub fn publish(deal: &Deal) -> Self {
        Self::PublishDeal {
            deal_id: deal.deal_id,
            dataset_id: deal.dataset_id,
            piece_cid: deal.piece_cid,
            padded_size: deal.padded_size,
            provider: deal.provider.clone(),
            price_per_epoch: deal.price_per_epoch,
            duration_epochs: deal.duration_epochs,
            verified: deal.verified,
        }
    }

    pub fn renew(deal: &Deal, extra_epochs: u64) -> Self {
        Self::RenewDeal {
            deal_id: deal.deal_id,
            chain_deal_id: deal.chain_deal_id,
            extra_epochs,
        }
    }

    pub fn deal_id(&self) -> DealId {
        match self {
            Self::PublishDeal { deal_id, .. } | Self::RenewDeal { deal_id, .. } => *deal_id,
        }
    }

    /// Canonical bytes covered by the client signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StorageMarketError::Other(format!("payload encoding: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InclusionStatus {
    Included,
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_ref: TxRef,
    pub status: InclusionStatus,
    pub block_height: u64,
    /// Deal id assigned by the market contract on inclusion
    pub chain_deal_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateQuery {
    /// Unpredictable beacon output for a round, used to seed challenges
    Randomness { round: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateValue {
    Randomness([u8; 32]),
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Sign and submit a transaction
    async fn submit_transaction(&self, payload: &TransactionPayload, keypair: &Keypair) -> Result<TxRef>;

    /// Wait up to `timeout` for the transaction's inclusion outcome
    async fn await_inclusion(&self, tx_ref: &TxRef, timeout: Duration) -> Result<Receipt>;

    /// Read state from a contract
    async fn read_contract_state(&self, address: &LedgerAddress, query: &StateQuery) -> Result<StateValue>;
}
