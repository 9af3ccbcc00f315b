//! Ledger write path
//!
//! The ledger is a write-once durability backstop. Only three remote calls
//! are needed: pending nonce lookup, raw transaction submission, and receipt
//! lookup. Reads never go through here.

pub mod client;
pub mod envelope;
pub mod rpc;
pub mod signer;

pub use client::JsonRpcLedgerClient;
pub use envelope::{CreateEntity, SignedEnvelope, StoragePayload, TransactionEnvelope};
pub use signer::LedgerSigner;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Transport or node failure; the write may be retried later.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger refused the write.
    #[error("ledger rejected write: {0}")]
    Rejected(String),

    /// Submitted, but no receipt within the polling bound.
    #[error("ledger confirmation timed out after {attempts} polls (provisional id {provisional})")]
    Timeout { provisional: String, attempts: u32 },

    #[error("ledger encoding error: {0}")]
    Encoding(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }

    /// Transaction id that remains usable for linking, if one was issued.
    pub fn provisional_ref(&self) -> Option<DurableRef> {
        match self {
            LedgerError::Timeout { provisional, .. } => Some(DurableRef::provisional(provisional)),
            _ => None,
        }
    }
}

/// Content identifier of a ledger write: the transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableRef {
    pub tx_hash: String,
    pub confirmed: bool,
    #[serde(default)]
    pub block_number: Option<u64>,
}

impl DurableRef {
    pub fn confirmed(tx_hash: impl Into<String>, block_number: Option<u64>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            confirmed: true,
            block_number,
        }
    }

    pub fn provisional(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            confirmed: false,
            block_number: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Annotation {
    String { key: String, value: String },
    Numeric { key: String, value: u64 },
}

impl Annotation {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Annotation::String {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn numeric(key: impl Into<String>, value: u64) -> Self {
        Annotation::Numeric {
            key: key.into(),
            value,
        }
    }
}

/// One entry to be written to the ledger.
#[derive(Debug, Clone)]
pub struct LedgerWrite {
    pub key: String,
    pub value: Bytes,
    pub annotations: Vec<Annotation>,
    pub ttl: Duration,
}

#[async_trait]
pub trait LedgerBackend: Send + Sync {
    async fn submit(&self, write: LedgerWrite) -> std::result::Result<DurableRef, LedgerError>;
}

/// Backend used when no ledger is configured; the store runs mirror-only.
#[derive(Debug, Default, Clone)]
pub struct DisabledLedger;

#[async_trait]
impl LedgerBackend for DisabledLedger {
    async fn submit(&self, write: LedgerWrite) -> std::result::Result<DurableRef, LedgerError> {
        Err(LedgerError::Unavailable(format!(
            "ledger disabled, {} kept local-only",
            write.key
        )))
    }
}
