use super::signer::{verify_signature, LedgerSigner};
use super::{Annotation, LedgerError, LedgerWrite};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Entity creation as understood by the storage contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEntity {
    pub key: String,
    pub btl: u64,
    /// Base64 of the entry bytes.
    pub data: String,
    #[serde(default)]
    pub string_annotations: Vec<(String, String)>,
    #[serde(default)]
    pub numeric_annotations: Vec<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePayload {
    pub creates: Vec<CreateEntity>,
}

impl StoragePayload {
    pub fn single(write: &LedgerWrite, btl: u64) -> Self {
        let mut string_annotations = Vec::new();
        let mut numeric_annotations = Vec::new();
        for annotation in &write.annotations {
            match annotation {
                Annotation::String { key, value } => {
                    string_annotations.push((key.clone(), value.clone()))
                }
                Annotation::Numeric { key, value } => {
                    numeric_annotations.push((key.clone(), *value))
                }
            }
        }

        Self {
            creates: vec![CreateEntity {
                key: write.key.clone(),
                btl,
                data: BASE64.encode(&write.value),
                string_annotations,
                numeric_annotations,
            }],
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        serde_json::to_vec(self).map_err(|e| LedgerError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        serde_json::from_slice(bytes).map_err(|e| LedgerError::Encoding(e.to_string()))
    }
}

/// Unsigned transaction with fixed gas and fee parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: String,
    pub gas_limit: u64,
    pub max_fee_per_gas: u64,
    pub max_priority_fee_per_gas: u64,
    pub value: u64,
    /// `0x`-prefixed hex of the storage payload.
    pub data: String,
}

impl TransactionEnvelope {
    pub fn signing_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        serde_json::to_vec(self).map_err(|e| LedgerError::Encoding(e.to_string()))
    }

    pub fn payload(&self) -> Result<StoragePayload, LedgerError> {
        let hex_data = self.data.strip_prefix("0x").unwrap_or(&self.data);
        let bytes = hex::decode(hex_data)
            .map_err(|e| LedgerError::Encoding(format!("invalid data hex: {}", e)))?;
        StoragePayload::from_bytes(&bytes)
    }

    pub fn sign(self, signer: &LedgerSigner) -> Result<SignedEnvelope, LedgerError> {
        let signature = signer.sign(&self.signing_bytes()?);
        Ok(SignedEnvelope {
            envelope: self,
            public_key: hex::encode(signer.public_key()),
            signature: hex::encode(signature),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub envelope: TransactionEnvelope,
    pub public_key: String,
    pub signature: String,
}

impl SignedEnvelope {
    /// Wire form passed to `eth_sendRawTransaction`.
    pub fn encode_raw(&self) -> Result<String, LedgerError> {
        let bytes = serde_json::to_vec(self).map_err(|e| LedgerError::Encoding(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(bytes)))
    }

    pub fn decode_raw(raw: &str) -> Result<Self, LedgerError> {
        let hex_raw = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(hex_raw)
            .map_err(|e| LedgerError::Encoding(format!("invalid raw transaction hex: {}", e)))?;
        serde_json::from_slice(&bytes).map_err(|e| LedgerError::Encoding(e.to_string()))
    }

    /// Transaction id: Keccak-256 over the raw bytes.
    pub fn tx_hash(&self) -> Result<String, LedgerError> {
        let raw = self.encode_raw()?;
        Ok(tx_hash_of_raw(&raw))
    }

    pub fn verify(&self) -> Result<(), LedgerError> {
        let public_key: [u8; 32] = decode_fixed(&self.public_key, "public key")?;
        let signature: [u8; 64] = decode_fixed(&self.signature, "signature")?;
        verify_signature(&public_key, &self.envelope.signing_bytes()?, &signature)
    }

    pub fn sender(&self) -> Result<String, LedgerError> {
        let public_key: [u8; 32] = decode_fixed(&self.public_key, "public key")?;
        Ok(super::signer::address_for_public_key(&public_key))
    }
}

pub fn tx_hash_of_raw(raw: &str) -> String {
    let hex_raw = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(hex_raw).unwrap_or_else(|_| raw.as_bytes().to_vec());
    format!("0x{}", hex::encode(Keccak256::digest(&bytes)))
}

fn decode_fixed<const N: usize>(value: &str, what: &str) -> Result<[u8; N], LedgerError> {
    let bytes = hex::decode(value)
        .map_err(|e| LedgerError::Encoding(format!("invalid {} hex: {}", what, e)))?;
    bytes
        .try_into()
        .map_err(|_| LedgerError::Encoding(format!("{} must be {} bytes", what, N)))
}
