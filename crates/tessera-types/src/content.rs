//! Content identifiers and the content addresser.
//!
//! A [`ContentId`] is a CIDv1: a codec tag plus a multihash. Blocks produced
//! by this crate are hashed with BLAKE3-256; chunks carry the `raw` codec and
//! DAG nodes the private-use `tessera-dag` codec.

use crate::dag::{BalancedLayout, DagNode, Link};
use crate::error::{Result, TypesError};
use cid::multihash::Multihash;
use cid::Cid;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{ErrorKind, Read};
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Multicodec `raw`, used for file chunks.
pub const RAW_CODEC: u64 = 0x55;
/// Private-use multicodec for bincode-encoded [`DagNode`]s.
pub const DAG_NODE_CODEC: u64 = 0x30_0001;
/// Multicodec `fil-commitment-unsealed`, used for piece CIDs.
pub const PIECE_CODEC: u64 = 0xf101;

pub const BLAKE3_HASH_CODE: u64 = 0x1e;
pub const SHA2_256_HASH_CODE: u64 = 0x12;
pub const SHA2_256_TRUNC254_PADDED_CODE: u64 = 0x1012;

pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;
pub const DEFAULT_FANOUT: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId(Cid);

impl ContentId {
    /// Build a CIDv1 from an already computed digest.
    pub fn new(codec: u64, hash_code: u64, digest: &[u8]) -> Result<Self> {
        let hash = Multihash::<64>::wrap(hash_code, digest)
            .map_err(|e| TypesError::InvalidCid(e.to_string()))?;
        Ok(Self(Cid::new_v1(codec, hash)))
    }

    /// Build a CIDv1 around a 32-byte digest.
    pub fn from_digest32(codec: u64, hash_code: u64, digest: &[u8; 32]) -> Self {
        // 32-byte digests always fit the 64-byte multihash
        let hash = Multihash::<64>::wrap(hash_code, digest).unwrap_or_default();
        Self(Cid::new_v1(codec, hash))
    }

    /// BLAKE3 address of a block under the given codec.
    pub fn for_block(codec: u64, bytes: &[u8]) -> Self {
        Self::from_digest32(codec, BLAKE3_HASH_CODE, blake3::hash(bytes).as_bytes())
    }

    /// The well-known identifier of the empty byte string.
    pub fn empty() -> Self {
        Self::for_block(RAW_CODEC, &[])
    }

    pub fn codec(&self) -> u64 {
        self.0.codec()
    }

    pub fn hash_code(&self) -> u64 {
        self.0.hash().code()
    }

    pub fn digest(&self) -> &[u8] {
        self.0.hash().digest()
    }

    pub fn is_raw(&self) -> bool {
        self.codec() == RAW_CODEC
    }

    pub fn is_dag_node(&self) -> bool {
        self.codec() == DAG_NODE_CODEC
    }

    pub fn as_cid(&self) -> &Cid {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn encoded_len(&self) -> usize {
        self.0.encoded_len()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Cid::try_from(bytes)
            .map(Self)
            .map_err(|e| TypesError::InvalidCid(e.to_string()))
    }

    /// Read one binary CID from the front of a stream.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Cid::read_bytes(reader)
            .map(Self)
            .map_err(|e| TypesError::InvalidCid(e.to_string()))
    }

    /// Recompute the digest of `bytes` with this identifier's hash function
    /// and compare it in full. Unknown hash functions never verify.
    pub fn verify_block(&self, bytes: &[u8]) -> bool {
        let computed: Vec<u8> = match self.hash_code() {
            BLAKE3_HASH_CODE => blake3::hash(bytes).as_bytes().to_vec(),
            SHA2_256_HASH_CODE => Sha256::digest(bytes).to_vec(),
            _ => return false,
        };
        computed.as_slice().ct_eq(self.digest()).into()
    }

    /// Full-length comparison of the binary encodings.
    pub fn ct_eq(&self, other: &ContentId) -> bool {
        self.to_bytes().as_slice().ct_eq(other.to_bytes().as_slice()).into()
    }
}

impl From<Cid> for ContentId {
    fn from(cid: Cid) -> Self {
        Self(cid)
    }
}

impl FromStr for ContentId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Cid::try_from(s)
            .map(Self)
            .map_err(|e| TypesError::InvalidCid(e.to_string()))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.0.to_string())
        } else {
            serializer.serialize_bytes(&self.0.to_bytes())
        }
    }
}

struct ContentIdVisitor;

impl<'de> Visitor<'de> for ContentIdVisitor {
    type Value = ContentId;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a CID string or CID bytes")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<ContentId, E> {
        ContentId::from_str(v).map_err(E::custom)
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<ContentId, E> {
        ContentId::from_bytes(v).map_err(E::custom)
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<ContentId, A::Error> {
        let mut bytes = Vec::new();
        while let Some(b) = seq.next_element::<u8>()? {
            bytes.push(b);
        }
        ContentId::from_bytes(&bytes).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(ContentIdVisitor)
        } else {
            deserializer.deserialize_bytes(ContentIdVisitor)
        }
    }
}

/// What [`ContentAddresser::address_of`] does with a zero-length input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyPolicy {
    #[default]
    Reject,
    WellKnown,
}

/// Derives stable identifiers for byte strings and byte streams.
#[derive(Debug, Clone)]
pub struct ContentAddresser {
    empty_policy: EmptyPolicy,
    fanout: usize,
}

impl Default for ContentAddresser {
    fn default() -> Self {
        Self {
            empty_policy: EmptyPolicy::default(),
            fanout: DEFAULT_FANOUT,
        }
    }
}

impl ContentAddresser {
    pub fn new(empty_policy: EmptyPolicy, fanout: usize) -> Result<Self> {
        if fanout < 2 {
            return Err(TypesError::InvalidParameter(format!(
                "fan-out must be at least 2, got {}",
                fanout
            )));
        }
        Ok(Self {
            empty_policy,
            fanout,
        })
    }

    pub fn empty_policy(&self) -> EmptyPolicy {
        self.empty_policy
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Address a single block of raw bytes.
    pub fn address_of(&self, bytes: &[u8]) -> Result<ContentId> {
        if bytes.is_empty() {
            return match self.empty_policy {
                EmptyPolicy::Reject => Err(TypesError::EmptyInput),
                EmptyPolicy::WellKnown => Ok(ContentId::empty()),
            };
        }
        Ok(ContentId::for_block(RAW_CODEC, bytes))
    }

    /// Address a stream as a balanced chunk DAG. The result is the root of
    /// the file node the archive builder produces for the same bytes.
    pub fn address_of_stream<R: Read>(&self, reader: R, chunk_size: usize) -> Result<ContentId> {
        match self.layout_stream(reader, chunk_size, |_, _| {})? {
            Some(link) => Ok(link.cid),
            None => match self.empty_policy {
                EmptyPolicy::Reject => Err(TypesError::EmptyInput),
                EmptyPolicy::WellKnown => Ok(DagNode::cid_of(&DagNode::empty_file().encode()?)),
            },
        }
    }

    /// Chunk a stream and fold it into the balanced DAG, handing every block
    /// (chunks and interior nodes) to `sink`. Returns `None` for an empty
    /// stream.
    pub fn layout_stream<R, F>(&self, mut reader: R, chunk_size: usize, mut sink: F) -> Result<Option<Link>>
    where
        R: Read,
        F: FnMut(ContentId, &[u8]),
    {
        if chunk_size == 0 {
            return Err(TypesError::InvalidParameter("chunk size must be non-zero".to_string()));
        }

        let mut layout = BalancedLayout::new(self.fanout);
        let mut buf = vec![0u8; chunk_size];
        loop {
            let n = fill_chunk(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];
            let cid = ContentId::for_block(RAW_CODEC, chunk);
            sink(cid, chunk);
            layout.push_leaf(Link::new(cid, n as u64), &mut sink)?;
            if n < chunk_size {
                break;
            }
        }
        layout.finish(&mut sink)
    }
}

/// Read until `buf` is full or the stream ends. Short reads never produce a
/// short chunk in the middle of a stream.
pub fn fill_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
