use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry-assigned deal identifier.
pub type DealId = u64;

/// Fingerprint of a dataset: BLAKE3 over its relative paths and contents.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId([u8; 32]);

impl DatasetId {
    pub fn new(data: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetId({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Network address of a storage provider, e.g. `f01234`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderAddress(String);

impl ProviderAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_id() {
        let a = DatasetId::new(b"dataset");
        let b = DatasetId::new(b"dataset");
        assert_eq!(a, b);
        assert_ne!(a, DatasetId::new(b"dataset2"));
        assert_eq!(DatasetId::from_hex(&a.to_hex()).unwrap(), a);
        assert!(DatasetId::from_hex("00").is_err());
    }

    #[test]
    fn test_provider_address_is_transparent() {
        let addr = ProviderAddress::new("f01234");
        assert_eq!(serde_json::to_string(&addr).unwrap(), "\"f01234\"");
        assert_eq!(addr.to_string(), "f01234");
    }
}
