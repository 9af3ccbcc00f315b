use super::LedgerError;
use ed25519_dalek::Signer;
use sha3::{Digest, Keccak256};

/// Holds the account key. Only signatures and the public key leave it.
pub struct LedgerSigner {
    key: ed25519_dalek::SigningKey,
}

impl LedgerSigner {
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            key: ed25519_dalek::SigningKey::from_bytes(&bytes),
        }
    }

    /// Parses a 32 byte secret, with or without a `0x` prefix.
    pub fn from_hex(secret: &str) -> Result<Self, LedgerError> {
        let trimmed = secret.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(trimmed)
            .map_err(|e| LedgerError::Encoding(format!("invalid private key hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| LedgerError::Encoding("private key must be 32 bytes".to_string()))?;
        Ok(Self::from_bytes(bytes))
    }

    /// Hex form accepted by `from_hex`, for provisioning a new account.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Account address: last 20 bytes of Keccak-256 over the public key.
    pub fn address(&self) -> String {
        address_for_public_key(&self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for LedgerSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LedgerSigner({})", self.address())
    }
}

pub fn address_for_public_key(public_key: &[u8; 32]) -> String {
    let digest = Keccak256::digest(public_key);
    format!("0x{}", hex::encode(&digest[12..]))
}

pub fn verify_signature(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), LedgerError> {
    use ed25519_dalek::Verifier;

    let key = ed25519_dalek::VerifyingKey::from_bytes(public_key)
        .map_err(|_| LedgerError::Encoding("invalid public key".to_string()))?;
    let signature = ed25519_dalek::Signature::from_bytes(signature);
    key.verify(message, &signature)
        .map_err(|_| LedgerError::Encoding("invalid signature".to_string()))
}
