use super::LedgerError;
use serde::{Deserialize, Serialize};

pub const METHOD_GET_NONCE: &str = "eth_getTransactionCount";
pub const METHOD_SEND_RAW: &str = "eth_sendRawTransaction";
pub const METHOD_GET_RECEIPT: &str = "eth_getTransactionReceipt";

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Vec<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Vec<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl TransactionReceipt {
    /// A receipt without a status field is treated as success.
    pub fn succeeded(&self) -> Result<bool, LedgerError> {
        match self.status.as_deref() {
            None => Ok(true),
            Some(status) => Ok(parse_quantity(status)? == 1),
        }
    }

    pub fn block(&self) -> Option<u64> {
        self.block_number
            .as_deref()
            .and_then(|value| parse_quantity(value).ok())
    }
}

/// Parses a `0x`-prefixed hex quantity.
pub fn parse_quantity(value: &str) -> Result<u64, LedgerError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::Encoding(format!("quantity missing 0x prefix: {}", value)))?;
    if digits.is_empty() {
        return Err(LedgerError::Encoding("empty quantity".to_string()));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::Encoding(format!("invalid quantity {}: {}", value, e)))
}

pub fn format_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}
