use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Empty input cannot be addressed")]
    EmptyInput,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid content identifier: {0}")]
    InvalidCid(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for TypesError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for TypesError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TypesError>;
