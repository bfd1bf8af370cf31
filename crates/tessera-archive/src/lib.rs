//! Archive Codec: builds content-addressed archives from files and
//! directories, reads and writes the TCAR wire format, and computes the
//! padded piece commitment storage deals are made against.

pub mod archive;
pub mod builder;
pub mod car;
pub mod error;
pub mod piece;

pub use archive::{extract_file, Archive, ArchivedFile};
pub use builder::{dataset_fingerprint, dataset_size, ArchiveBuilder, ArchiveConfig};
pub use car::{parse_archive, serialize_archive, CAR_VERSION};
pub use error::{ArchiveError, Result};
pub use piece::{
    padded_sector_size, piece_commitment, root_from_path, CommitmentVersion, PieceCommitment,
    PieceOpening, PieceTree, MAX_SECTOR_SIZE, MIN_SECTOR_SIZE, NODE_SIZE,
};
