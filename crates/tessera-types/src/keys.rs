//! Ed25519 identities of deal parties and their detached signatures.
//!
//! Both serialize as lowercase hex so provider catalogs and deal records stay
//! readable.

use crate::error::{Result, TypesError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 64;

fn decode_fixed<const N: usize>(what: &str, s: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(s.trim()).map_err(|e| TypesError::InvalidParameter(format!("{}: {}", what, e)))?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        TypesError::InvalidParameter(format!("{} must be {} bytes, got {}", what, N, bytes.len()))
    })
}

/// Verifying key of a client or storage provider
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        decode_fixed("public key", s).map(Self)
    }

    /// First four bytes, enough to tell parties apart in logs
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl FromStr for PublicKey {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}..)", self.short())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Detached Ed25519 signature over a proof or ledger transaction
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Rejects anything that is not exactly [`SIGNATURE_LENGTH`] bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        <[u8; SIGNATURE_LENGTH]>::try_from(bytes).map(Self).map_err(|_| {
            TypesError::InvalidParameter(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LENGTH,
                bytes.len()
            ))
        })
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        decode_fixed("signature", s).map(Self)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..4]))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_parsing() {
        let pk = PublicKey::from_bytes([7u8; 32]);
        assert_eq!(pk.to_string().parse::<PublicKey>().unwrap(), pk);
        assert!(PublicKey::from_hex("abcd").is_err());
        assert!(PublicKey::from_hex("zz").is_err());
        assert_eq!(format!("{:?}", pk), "PublicKey(07070707..)");
    }

    #[test]
    fn test_keys_serialize_as_hex() {
        let pk = PublicKey::from_bytes([1u8; 32]);
        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        assert_eq!(serde_json::from_str::<PublicKey>(&json).unwrap(), pk);
        assert!(serde_json::from_str::<PublicKey>("\"0102\"").is_err());

        let sig = Signature::from_bytes([9u8; 64]);
        let encoded = bincode::serialize(&sig).unwrap();
        assert_eq!(bincode::deserialize::<Signature>(&encoded).unwrap(), sig);
    }

    #[test]
    fn test_signature_length_is_enforced() {
        assert!(Signature::from_slice(&[0u8; 64]).is_ok());
        assert!(Signature::from_slice(&[0u8; 10]).is_err());
        assert!(Signature::from_hex(&"ab".repeat(63)).is_err());
    }
}
