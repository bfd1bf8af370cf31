use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use std::path::Path;
use tessera_types::{PublicKey, Signature};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key file error: {0}")]
    KeyFile(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// A keypair for signing proofs and ledger transactions.
///
/// The secret half is zeroized on drop and never printed.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Create a keypair from the 32-byte secret
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&key_bytes)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = PublicKey::from_bytes(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            public_key,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let signature = self.signing_key.sign(message);
        Signature::from_bytes(signature.to_bytes())
    }

    /// Export the secret (public half can be derived)
    pub fn to_bytes(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }

    /// Load a hex-encoded secret written by [`Keypair::save_to_file`].
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let bytes = hex::decode(contents.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, hex::encode(self.signing_key.to_bytes()))?;

        // Secret keys are readable by the owner only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }
        tracing::debug!(public_key = %self.public_key, path = %path.display(), "Key saved");
        Ok(())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Sign arbitrary bytes.
pub fn sign_data(data: &[u8], keypair: &Keypair) -> Signature {
    keypair.sign(data)
}

/// Verify a detached signature. Malformed keys or signatures verify as false.
pub fn verify_signature(data: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    let verifying_key = match VerifyingKey::from_bytes(public_key.as_bytes()) {
        Ok(key) => key,
        Err(_) => return false,
    };

    let signature = DalekSignature::from_bytes(signature.as_bytes());
    verifying_key.verify(data, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = Keypair::generate();
        let sig = sign_data(b"piece proof", &keypair);
        assert!(verify_signature(b"piece proof", &sig, keypair.public_key()));
        assert!(!verify_signature(b"piece prooF", &sig, keypair.public_key()));

        let other = Keypair::generate();
        assert!(!verify_signature(b"piece proof", &sig, other.public_key()));
    }

    #[test]
    fn test_malformed_signature_is_rejected() {
        let keypair = Keypair::generate();
        assert!(!verify_signature(b"x", &Signature::from_bytes([0u8; 64]), keypair.public_key()));
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/node.key");
        let keypair = Keypair::generate();
        keypair.save_to_file(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let loaded = Keypair::load_from_file(&path).unwrap();
        assert_eq!(loaded.public_key(), keypair.public_key());
    }

    #[test]
    fn test_keypair_roundtrip() {
        let keypair = Keypair::generate();
        let restored = Keypair::from_bytes(&keypair.to_bytes()).unwrap();
        assert_eq!(keypair.public_key(), restored.public_key());
        assert!(Keypair::from_bytes(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let keypair = Keypair::from_bytes(&[42u8; 32]).unwrap();
        let debug = format!("{:?}", keypair);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&hex::encode([42u8; 32])));
    }

    #[test]
    fn test_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("node.key");
        let keypair = Keypair::generate();
        keypair.save_to_file(&path).unwrap();
        let loaded = Keypair::load_from_file(&path).unwrap();
        assert_eq!(loaded.public_key(), keypair.public_key());
    }
}
