use super::envelope::{StoragePayload, TransactionEnvelope};
use super::rpc::{
    JsonRpcRequest, JsonRpcResponse, METHOD_GET_NONCE, METHOD_GET_RECEIPT, METHOD_SEND_RAW,
    TransactionReceipt, parse_quantity,
};
use super::signer::LedgerSigner;
use super::{DurableRef, LedgerBackend, LedgerError, LedgerWrite};
use crate::config::LedgerConfig;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Ledger backend speaking JSON-RPC over HTTP.
///
/// All writes from one process share a single signing account, so nonce
/// reservation, signing and submission happen inside one critical section.
/// Receipt polling happens outside it, so confirmations overlap.
pub struct JsonRpcLedgerClient {
    config: LedgerConfig,
    client: reqwest::Client,
    signer: LedgerSigner,
    address: String,
    /// Last nonce this process submitted successfully.
    nonce_lock: Mutex<Option<u64>>,
    request_id: AtomicU64,
}

impl std::fmt::Debug for JsonRpcLedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcLedgerClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("address", &self.address)
            .field("client", &"reqwest::Client")
            .finish()
    }
}

impl JsonRpcLedgerClient {
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        let signer = LedgerSigner::from_hex(&config.private_key)?;
        Self::with_signer(config, signer)
    }

    pub fn with_signer(config: LedgerConfig, signer: LedgerSigner) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("failed to create HTTP client: {}", e)))?;
        let address = signer.address();

        Ok(Self {
            config,
            client,
            signer,
            address,
            nonce_lock: Mutex::new(None),
            request_id: AtomicU64::new(1),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Pending transaction count of the account, so back-to-back writes
    /// see each other before they are mined.
    pub async fn pending_nonce(&self) -> Result<u64, LedgerError> {
        let params = vec![
            serde_json::json!(self.address),
            serde_json::json!("pending"),
        ];
        let value: String = self
            .call_with_retry(METHOD_GET_NONCE, params)
            .await?
            .ok_or_else(|| LedgerError::Encoding("missing nonce in response".to_string()))?;
        parse_quantity(&value)
    }

    pub async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        self.call(METHOD_GET_RECEIPT, vec![serde_json::json!(tx_hash)])
            .await
    }

    /// Submission is never retried: a resend with the same nonce could
    /// land twice or collide.
    async fn send_raw_transaction(&self, raw: &str) -> Result<String, LedgerError> {
        self.call::<String>(METHOD_SEND_RAW, vec![serde_json::json!(raw)])
            .await?
            .ok_or_else(|| LedgerError::Encoding("missing transaction hash in response".to_string()))
    }

    fn build_envelope(
        &self,
        nonce: u64,
        write: &LedgerWrite,
    ) -> Result<TransactionEnvelope, LedgerError> {
        let btl = self.config.btl_for(write.ttl);
        let payload = StoragePayload::single(write, btl);

        Ok(TransactionEnvelope {
            chain_id: self.config.chain_id,
            nonce,
            to: self.config.storage_address.clone(),
            gas_limit: self.config.gas_limit,
            max_fee_per_gas: self.config.max_fee_per_gas,
            max_priority_fee_per_gas: self.config.max_priority_fee_per_gas,
            value: 0,
            data: format!("0x{}", hex::encode(payload.to_bytes()?)),
        })
    }

    /// Reserves a nonce, signs and submits; returns the provisional id.
    async fn reserve_and_submit(&self, write: &LedgerWrite) -> Result<String, LedgerError> {
        let mut last_nonce = self.nonce_lock.lock().await;

        let pending = self.pending_nonce().await?;
        let nonce = match *last_nonce {
            Some(last) => pending.max(last + 1),
            None => pending,
        };

        let signed = self.build_envelope(nonce, write)?.sign(&self.signer)?;
        let raw = signed.encode_raw()?;
        let local_hash = signed.tx_hash()?;

        let tx_hash = self.send_raw_transaction(&raw).await?;
        *last_nonce = Some(nonce);

        if !tx_hash.eq_ignore_ascii_case(&local_hash) {
            warn!(
                key = %write.key,
                node_hash = %tx_hash,
                local_hash = %local_hash,
                "ledger returned a different transaction id, using the node's"
            );
        }

        debug!(key = %write.key, nonce, tx_hash = %tx_hash, "ledger write submitted");
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<DurableRef, LedgerError> {
        let policy = &self.config.confirmation;

        for attempt in 0..policy.attempts {
            if attempt > 0 {
                tokio::time::sleep(policy.interval()).await;
            }

            match self.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if !receipt.succeeded()? {
                        return Err(LedgerError::Rejected(format!(
                            "transaction {} reverted",
                            tx_hash
                        )));
                    }
                    let block_number = receipt.block();
                    info!(tx_hash, ?block_number, attempt, "ledger write confirmed");
                    return Ok(DurableRef::confirmed(tx_hash, block_number));
                }
                Ok(None) => {
                    debug!(tx_hash, attempt, "receipt not yet available");
                }
                Err(e) if e.is_retryable() => {
                    warn!(tx_hash, attempt, error = %e, "receipt poll failed");
                }
                Err(e) => return Err(e),
            }
        }

        Err(LedgerError::Timeout {
            provisional: tx_hash.to_string(),
            attempts: policy.attempts,
        })
    }

    async fn call_with_retry<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>, LedgerError> {
        let mut last_error = LedgerError::Unavailable(format!("{} not attempted", method));
        let mut retry_delay = self.config.rpc_retry_delay_ms;

        for attempt in 0..=self.config.rpc_retry_count {
            if attempt > 0 {
                warn!(method, attempt, retry_count = self.config.rpc_retry_count, "retrying ledger call");
                tokio::time::sleep(Duration::from_millis(retry_delay)).await;
                retry_delay = next_retry_delay(retry_delay);
            }

            match self.call(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => last_error = e,
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>, LedgerError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Unavailable(format!("{} timed out: {}", method, e))
                } else {
                    LedgerError::Unavailable(format!("{} request failed: {}", method, e))
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(LedgerError::Unavailable(format!(
                "{} HTTP error: {}",
                method, status
            )));
        }
        if !status.is_success() {
            return Err(LedgerError::Rejected(format!(
                "{} HTTP error: {}",
                method, status
            )));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Encoding(format!("{} response: {}", method, e)))?;

        if let Some(error) = body.error {
            return Err(LedgerError::Rejected(format!(
                "{} RPC error {}: {}",
                method, error.code, error.message
            )));
        }

        match body.result {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| LedgerError::Encoding(format!("{} result: {}", method, e))),
        }
    }
}

#[async_trait]
impl LedgerBackend for JsonRpcLedgerClient {
    async fn submit(&self, write: LedgerWrite) -> Result<DurableRef, LedgerError> {
        let tx_hash = self.reserve_and_submit(&write).await?;
        self.wait_for_receipt(&tx_hash).await
    }
}

/// Doubles the backoff, pinned at the maximum instead of wrapping.
fn next_retry_delay(delay_ms: u64) -> u64 {
    delay_ms.saturating_mul(2)
}
