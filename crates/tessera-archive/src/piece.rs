//! Padded piece commitments (`sha2-256-trunc254-padded`).
//!
//! Archive bytes are split into 32-byte leaves and zero-filled up to the
//! nearest supported sector size. Internal nodes are SHA-256 of the two
//! children with the top two bits of the last byte cleared. Padding is never
//! materialized: subtrees made only of zero leaves use precomputed digests.

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tessera_types::{ContentId, PIECE_CODEC, SHA2_256_TRUNC254_PADDED_CODE};

pub const NODE_SIZE: usize = 32;
pub const MIN_SECTOR_SIZE: u64 = 128;
pub const MAX_SECTOR_SIZE: u64 = 64 << 30;

pub type Node = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CommitmentVersion {
    /// Zero-fill padding, binary trunc254 SHA-256 tree.
    #[default]
    V1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceCommitment {
    pub version: CommitmentVersion,
    pub digest: Node,
    pub padded_size: u64,
    pub unpadded_size: u64,
}

impl PieceCommitment {
    pub fn piece_cid(&self) -> ContentId {
        ContentId::from_digest32(PIECE_CODEC, SHA2_256_TRUNC254_PADDED_CODE, &self.digest)
    }

    /// Rebuild a commitment from a piece CID and the sizes recorded with it.
    pub fn from_piece_cid(
        cid: &ContentId,
        version: CommitmentVersion,
        padded_size: u64,
        unpadded_size: u64,
    ) -> Result<Self> {
        if cid.codec() != PIECE_CODEC || cid.hash_code() != SHA2_256_TRUNC254_PADDED_CODE {
            return Err(ArchiveError::MalformedInput(format!("{} is not a piece CID", cid)));
        }
        let digest: Node = cid
            .digest()
            .try_into()
            .map_err(|_| ArchiveError::MalformedInput(format!("{} has a non 32-byte digest", cid)))?;
        if !is_supported_sector_size(padded_size) || unpadded_size > padded_size {
            return Err(ArchiveError::MalformedInput(format!(
                "inconsistent piece sizes: padded {} unpadded {}",
                padded_size, unpadded_size
            )));
        }
        Ok(Self {
            version,
            digest,
            padded_size,
            unpadded_size,
        })
    }

    /// Number of 32-byte leaves, padding included.
    pub fn leaf_count(&self) -> u64 {
        self.padded_size / NODE_SIZE as u64
    }

    /// Leaves that hold archive bytes; padding is never challenged.
    pub fn data_leaf_count(&self) -> u64 {
        self.unpadded_size.div_ceil(NODE_SIZE as u64)
    }

    pub fn depth(&self) -> u32 {
        self.leaf_count().trailing_zeros()
    }
}

pub fn is_supported_sector_size(size: u64) -> bool {
    size.is_power_of_two() && (MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&size)
}

/// Smallest supported sector size that holds `max(len, hint)` bytes.
pub fn padded_sector_size(len: u64, hint: u64) -> Result<u64> {
    let target = len.max(hint);
    if target > MAX_SECTOR_SIZE {
        return Err(ArchiveError::PayloadTooLarge {
            size: target,
            max: MAX_SECTOR_SIZE,
        });
    }
    Ok(target.next_power_of_two().max(MIN_SECTOR_SIZE))
}

pub fn hash_pair(left: &Node, right: &Node) -> Node {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out: Node = hasher.finalize().into();
    out[31] &= 0x3f;
    out
}

/// `zeros[i]` is the root of a subtree of `2^i` zero leaves.
pub fn zero_digests(depth: u32) -> Vec<Node> {
    let mut zeros = Vec::with_capacity(depth as usize + 1);
    zeros.push([0u8; 32]);
    for i in 0..depth as usize {
        let next = hash_pair(&zeros[i], &zeros[i]);
        zeros.push(next);
    }
    zeros
}

/// Recompute a root from a leaf and its bottom-up sibling path.
pub fn root_from_path(leaf: &Node, index: u64, siblings: &[Node]) -> Node {
    let mut current = *leaf;
    let mut idx = index;
    for sibling in siblings {
        current = if idx & 1 == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
        idx >>= 1;
    }
    current
}

fn leaves_of(bytes: &[u8]) -> Vec<Node> {
    bytes
        .chunks(NODE_SIZE)
        .map(|chunk| {
            let mut leaf = [0u8; 32];
            leaf[..chunk.len()].copy_from_slice(chunk);
            leaf
        })
        .collect()
}

fn next_level(level: &[Node], zero: &Node) -> Vec<Node> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            [left] => hash_pair(left, zero),
            _ => *zero,
        })
        .collect()
}

/// One 32-byte leaf with the sibling digests needed to reach the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceOpening {
    pub leaf_index: u64,
    pub leaf: Node,
    pub siblings: Vec<Node>,
}

/// Merkle levels over the data region of a piece, kept for opening leaves.
#[derive(Debug, Clone)]
pub struct PieceTree {
    levels: Vec<Vec<Node>>,
    zeros: Vec<Node>,
    commitment: PieceCommitment,
}

impl PieceTree {
    pub fn build(bytes: &[u8], sector_size_hint: u64) -> Result<Self> {
        let padded_size = padded_sector_size(bytes.len() as u64, sector_size_hint)?;
        let depth = (padded_size / NODE_SIZE as u64).trailing_zeros();
        let zeros = zero_digests(depth);

        let mut levels = Vec::with_capacity(depth as usize + 1);
        levels.push(leaves_of(bytes));
        for i in 0..depth as usize {
            let next = next_level(&levels[i], &zeros[i]);
            levels.push(next);
        }

        let digest = levels
            .last()
            .and_then(|top| top.first().copied())
            .unwrap_or(zeros[depth as usize]);

        Ok(Self {
            levels,
            zeros,
            commitment: PieceCommitment {
                version: CommitmentVersion::V1,
                digest,
                padded_size,
                unpadded_size: bytes.len() as u64,
            },
        })
    }

    pub fn commitment(&self) -> &PieceCommitment {
        &self.commitment
    }

    pub fn open(&self, leaf_index: u64) -> Result<PieceOpening> {
        if leaf_index >= self.commitment.leaf_count() {
            return Err(ArchiveError::NotFound(format!(
                "leaf {} outside a piece of {} leaves",
                leaf_index,
                self.commitment.leaf_count()
            )));
        }

        let depth = self.commitment.depth() as usize;
        let mut siblings = Vec::with_capacity(depth);
        let mut idx = leaf_index as usize;
        for level in 0..depth {
            let node = self.levels[level]
                .get(idx ^ 1)
                .copied()
                .unwrap_or(self.zeros[level]);
            siblings.push(node);
            idx >>= 1;
        }

        let leaf = self.levels[0]
            .get(leaf_index as usize)
            .copied()
            .unwrap_or(self.zeros[0]);
        Ok(PieceOpening {
            leaf_index,
            leaf,
            siblings,
        })
    }
}

/// Commitment over archive bytes padded to the smallest supported sector
/// size no smaller than `sector_size_hint`.
pub fn piece_commitment(bytes: &[u8], sector_size_hint: u64) -> Result<PieceCommitment> {
    let padded_size = padded_sector_size(bytes.len() as u64, sector_size_hint)?;
    let depth = (padded_size / NODE_SIZE as u64).trailing_zeros();
    let zeros = zero_digests(depth);

    let mut level = leaves_of(bytes);
    for zero in zeros.iter().take(depth as usize) {
        level = next_level(&level, zero);
    }

    Ok(PieceCommitment {
        version: CommitmentVersion::V1,
        digest: level.first().copied().unwrap_or(zeros[depth as usize]),
        padded_size,
        unpadded_size: bytes.len() as u64,
    })
}
