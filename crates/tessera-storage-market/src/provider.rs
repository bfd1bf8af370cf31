//! Transport to remote storage providers.

use crate::error::{Result, StorageMarketError};
use crate::proof::Proof;
use crate::types::DealParameters;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_types::{ContentId, DealId, ProviderAddress};

/// Provider's answer to a deal proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAck {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl ProviderAck {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Provider-side progress of a published deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderDealStatus {
    AwaitingData,
    Sealing,
    /// Sealed and proving
    Active,
    Rejected { reason: String },
    Unknown,
}

/// Inclusive byte range for partial retrieval; `start <= end` always holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawByteRange")]
pub struct ByteRange {
    start: u64,
    end: u64,
}

#[derive(Deserialize)]
struct RawByteRange {
    start: u64,
    end: u64,
}

impl TryFrom<RawByteRange> for ByteRange {
    type Error = StorageMarketError;

    fn try_from(raw: RawByteRange) -> Result<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(StorageMarketError::MalformedInput(
                "Invalid byte range: start > end".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    /// The first `len` bytes; `None` when `len` is zero.
    pub fn prefix(len: u64) -> Option<Self> {
        len.checked_sub(1).map(|end| Self { start: 0, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte, inclusive
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Saturates for the full `0..=u64::MAX` range
    pub fn size(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }
}

#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Offer a deal; the provider acknowledges or rejects it
    async fn propose_deal(&self, provider: &ProviderAddress, deal_id: DealId, params: &DealParameters) -> Result<ProviderAck>;

    /// Hand the archive bytes over for an accepted deal
    async fn transfer_data(
        &self,
        provider: &ProviderAddress,
        deal_id: DealId,
        piece_cid: &ContentId,
        data: Arc<Vec<u8>>,
    ) -> Result<()>;

    /// Sealing progress of a deal
    async fn poll_status(&self, provider: &ProviderAddress, deal_id: DealId) -> Result<ProviderDealStatus>;

    /// Read back a byte range of a stored piece
    async fn fetch_data(&self, provider: &ProviderAddress, piece_cid: &ContentId, range: ByteRange) -> Result<Vec<u8>>;

    /// Answer a possession challenge for a stored piece
    async fn prove_possession(&self, provider: &ProviderAddress, piece_cid: &ContentId, seed: &[u8; 32]) -> Result<Proof>;
}
