use tessera_types::TypesError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Payload too large: {size} bytes exceeds the {max} byte maximum")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TypesError> for ArchiveError {
    fn from(e: TypesError) -> Self {
        match e {
            TypesError::EmptyInput | TypesError::InvalidParameter(_) | TypesError::InvalidAmount(_) => {
                Self::MalformedInput(e.to_string())
            }
            TypesError::InvalidCid(_) | TypesError::Serialization(_) => Self::CorruptArchive(e.to_string()),
            TypesError::Io(io) => Self::Io(io),
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
