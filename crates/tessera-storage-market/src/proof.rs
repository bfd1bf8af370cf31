//! Proof Engine
//!
//! Two kinds of proof over archived data:
//! - **Inclusion proofs**: a block plus the encoded ancestors linking it to an
//!   archive root. Verification recomputes every CID on the way up.
//! - **Possession proofs**: one 32-byte leaf of the padded piece plus its
//!   sibling digests. The challenged leaf is derived from an unpredictable
//!   seed, so a provider can only answer if it holds the whole piece.
//!
//! All final comparisons are full-length (`subtle`).

use crate::error::{Result, StorageMarketError};
use crate::pool::ComputePool;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tessera_archive::{root_from_path, Archive, PieceCommitment, PieceTree, NODE_SIZE};
use tessera_crypto::{sign_data, verify_signature, Keypair};
use tessera_types::{ContentId, DagNode, DealId, PublicKey, Signature};
use tokio::sync::RwLock;
use tracing::debug;

const PROOF_DOMAIN: &[u8] = b"tessera-proof-v1";
const CHALLENGE_DOMAIN: &[u8] = b"tessera-challenge-v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MerklePath {
    /// Encoded ancestor blocks, immediate parent first, root last
    Dag { ancestors: Vec<Vec<u8>> },
    /// Challenged leaf and its bottom-up sibling digests
    Piece { leaf_index: u64, siblings: Vec<[u8; 32]> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub deal_id: Option<DealId>,
    pub piece_cid: Option<ContentId>,
    /// Block CID for inclusion proofs, piece CID for possession proofs
    pub target: ContentId,
    pub challenge: Option<[u8; 32]>,
    pub merkle_path: MerklePath,
    pub leaf_value: Vec<u8>,
    pub signature: Option<Signature>,
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

impl Proof {
    /// Canonical bytes covered by the prover's signature
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.leaf_value.len());
        out.extend_from_slice(PROOF_DOMAIN);

        match self.deal_id {
            Some(id) => {
                out.push(1);
                out.extend_from_slice(&id.to_le_bytes());
            }
            None => out.push(0),
        }
        match &self.piece_cid {
            Some(cid) => {
                out.push(1);
                put_bytes(&mut out, &cid.to_bytes());
            }
            None => out.push(0),
        }
        put_bytes(&mut out, &self.target.to_bytes());
        match &self.challenge {
            Some(seed) => {
                out.push(1);
                out.extend_from_slice(seed);
            }
            None => out.push(0),
        }

        match &self.merkle_path {
            MerklePath::Dag { ancestors } => {
                out.push(0);
                out.extend_from_slice(&(ancestors.len() as u64).to_le_bytes());
                for ancestor in ancestors {
                    put_bytes(&mut out, ancestor);
                }
            }
            MerklePath::Piece { leaf_index, siblings } => {
                out.push(1);
                out.extend_from_slice(&leaf_index.to_le_bytes());
                out.extend_from_slice(&(siblings.len() as u64).to_le_bytes());
                for sibling in siblings {
                    out.extend_from_slice(sibling);
                }
            }
        }
        put_bytes(&mut out, &self.leaf_value);
        out
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = Some(sign_data(&self.signing_bytes(), keypair));
    }

    pub fn verify_signature(&self, public_key: &PublicKey) -> bool {
        match &self.signature {
            Some(signature) => verify_signature(&self.signing_bytes(), signature, public_key),
            None => false,
        }
    }
}

/// Build the DAG path from `target` up to a declared root.
pub fn generate_inclusion_proof(archive: &Archive, target: &ContentId) -> Result<Proof> {
    let leaf_value = archive
        .get(target)
        .ok_or_else(|| StorageMarketError::NotFound(format!("block {} not in archive", target)))?
        .to_vec();

    // BFS parent index from the roots
    let mut parent: HashMap<ContentId, ContentId> = HashMap::new();
    let mut seen: HashSet<ContentId> = HashSet::new();
    let mut queue: VecDeque<ContentId> = VecDeque::new();
    for root in archive.roots() {
        if archive.contains(root) && seen.insert(*root) {
            queue.push_back(*root);
        }
    }

    while let Some(cid) = queue.pop_front() {
        if cid == *target {
            break;
        }
        let Some(bytes) = archive.get(&cid) else {
            continue;
        };
        for child in Archive::child_links(&cid, bytes)? {
            if archive.contains(&child) && seen.insert(child) {
                parent.insert(child, cid);
                queue.push_back(child);
            }
        }
    }

    if !seen.contains(target) {
        return Err(StorageMarketError::NotFound(format!(
            "block {} is not reachable from a root",
            target
        )));
    }

    let mut ancestors = Vec::new();
    let mut current = *target;
    while let Some(up) = parent.get(&current) {
        let bytes = archive
            .get(up)
            .ok_or_else(|| StorageMarketError::CorruptArchive(format!("ancestor {} missing", up)))?;
        ancestors.push(bytes.to_vec());
        current = *up;
    }

    Ok(Proof {
        deal_id: None,
        piece_cid: None,
        target: *target,
        challenge: None,
        merkle_path: MerklePath::Dag { ancestors },
        leaf_value,
        signature: None,
    })
}

pub fn verify_inclusion_proof(proof: &Proof, expected_root: &ContentId) -> bool {
    let MerklePath::Dag { ancestors } = &proof.merkle_path else {
        return false;
    };
    if !proof.target.verify_block(&proof.leaf_value) {
        return false;
    }

    let mut current = proof.target;
    for bytes in ancestors {
        let Ok(node) = DagNode::decode(bytes) else {
            return false;
        };
        if !node.links_to(&current) {
            return false;
        }
        current = DagNode::cid_of(bytes);
    }
    current.ct_eq(expected_root)
}

/// Seed for the `index`-th challenge of a verification round
pub fn derive_challenge_seed(randomness: &[u8; 32], deal_id: DealId, index: u32) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(CHALLENGE_DOMAIN);
    hasher.update(randomness);
    hasher.update(&deal_id.to_le_bytes());
    hasher.update(&index.to_le_bytes());
    hasher.finalize().into()
}

/// Leaf challenged by `seed`. Only leaves holding archive bytes qualify.
pub fn challenge_index(seed: &[u8; 32], piece_cid: &ContentId, data_leaves: u64) -> u64 {
    if data_leaves == 0 {
        return 0;
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed);
    hasher.update(&piece_cid.to_bytes());
    let hash = hasher.finalize();
    let mut word = [0u8; 8];
    word.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(word) % data_leaves
}

pub fn verify_possession_proof(proof: &Proof, commitment: &PieceCommitment, seed: &[u8; 32]) -> bool {
    let MerklePath::Piece { leaf_index, siblings } = &proof.merkle_path else {
        return false;
    };
    let piece_cid = commitment.piece_cid();

    if let Some(challenge) = &proof.challenge {
        if !bool::from(challenge.ct_eq(seed)) {
            return false;
        }
    }
    if let Some(claimed) = &proof.piece_cid {
        if !claimed.ct_eq(&piece_cid) {
            return false;
        }
    }
    if !proof.target.ct_eq(&piece_cid) {
        return false;
    }

    if *leaf_index != challenge_index(seed, &piece_cid, commitment.data_leaf_count()) {
        return false;
    }
    if siblings.len() != commitment.depth() as usize {
        return false;
    }
    let Ok(leaf) = <[u8; NODE_SIZE]>::try_from(proof.leaf_value.as_slice()) else {
        return false;
    };

    let root = root_from_path(&leaf, *leaf_index, siblings);
    root.ct_eq(&commitment.digest).into()
}

/// Prover side: holds piece trees and answers challenges against them.
#[derive(Clone)]
pub struct ProofEngine {
    pieces: Arc<RwLock<HashMap<ContentId, Arc<PieceTree>>>>,
    pool: ComputePool,
}

impl ProofEngine {
    pub fn new(pool: ComputePool) -> Self {
        Self {
            pieces: Arc::new(RwLock::new(HashMap::new())),
            pool,
        }
    }

    /// Build and keep the piece tree for archive bytes
    pub async fn register_piece(&self, archive_bytes: Arc<Vec<u8>>, sector_size_hint: u64) -> Result<PieceCommitment> {
        let tree = self
            .pool
            .run(move || PieceTree::build(&archive_bytes, sector_size_hint))
            .await??;
        let commitment = *tree.commitment();
        let piece_cid = commitment.piece_cid();

        self.pieces.write().await.insert(piece_cid, Arc::new(tree));
        debug!(piece_cid = %piece_cid, padded_size = commitment.padded_size, "Piece registered");
        Ok(commitment)
    }

    pub async fn has_piece(&self, piece_cid: &ContentId) -> bool {
        self.pieces.read().await.contains_key(piece_cid)
    }

    pub async fn remove_piece(&self, piece_cid: &ContentId) -> bool {
        self.pieces.write().await.remove(piece_cid).is_some()
    }

    pub async fn generate_possession_proof(&self, piece_cid: &ContentId, seed: &[u8; 32]) -> Result<Proof> {
        let tree = self
            .pieces
            .read()
            .await
            .get(piece_cid)
            .cloned()
            .ok_or_else(|| StorageMarketError::NotFound(format!("piece {} not held", piece_cid)))?;

        let index = challenge_index(seed, piece_cid, tree.commitment().data_leaf_count());
        let opening = self.pool.run(move || tree.open(index)).await??;

        Ok(Proof {
            deal_id: None,
            piece_cid: Some(*piece_cid),
            target: *piece_cid,
            challenge: Some(*seed),
            merkle_path: MerklePath::Piece {
                leaf_index: opening.leaf_index,
                siblings: opening.siblings,
            },
            leaf_value: opening.leaf.to_vec(),
            signature: None,
        })
    }

    /// Inclusion proof built on the compute pool
    pub async fn inclusion_proof(&self, archive: Arc<Archive>, target: ContentId) -> Result<Proof> {
        self.pool
            .run(move || generate_inclusion_proof(&archive, &target))
            .await?
    }
}
