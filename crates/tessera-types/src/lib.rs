pub mod amount;
pub mod content;
pub mod dag;
pub mod error;
pub mod id;
pub mod keys;

pub use amount::{FilAmount, ATTO_PER_FIL, FIL_DECIMALS};
pub use content::{
    fill_chunk, ContentAddresser, ContentId, EmptyPolicy, BLAKE3_HASH_CODE, DAG_NODE_CODEC,
    DEFAULT_CHUNK_SIZE, DEFAULT_FANOUT, PIECE_CODEC, RAW_CODEC, SHA2_256_HASH_CODE,
    SHA2_256_TRUNC254_PADDED_CODE,
};
pub use dag::{BalancedLayout, DagNode, DirEntry, Link};
pub use error::{Result, TypesError};
pub use id::{DatasetId, DealId, ProviderAddress};
pub use keys::{PublicKey, Signature, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
