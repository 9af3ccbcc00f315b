use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger endpoint and signing account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Hex-encoded 32 byte ed25519 secret. Never sent over the wire.
    #[serde(default)]
    pub private_key: String,
    #[serde(default = "default_storage_address")]
    pub storage_address: String,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_max_fee_per_gas")]
    pub max_fee_per_gas: u64,
    #[serde(default = "default_max_priority_fee_per_gas")]
    pub max_priority_fee_per_gas: u64,
    #[serde(default = "default_block_time_secs")]
    pub block_time_secs: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_rpc_retry_count")]
    pub rpc_retry_count: u32,
    #[serde(default = "default_rpc_retry_delay_ms")]
    pub rpc_retry_delay_ms: u64,
    #[serde(default)]
    pub confirmation: ConfirmationPolicy,
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.rpc_url.trim().is_empty() {
            return Err(VaultError::Config("ledger.rpc_url cannot be empty".to_string()));
        }

        if self.private_key.trim().is_empty() {
            return Err(VaultError::Config(
                "ledger.private_key cannot be empty".to_string(),
            ));
        }

        if self.block_time_secs == 0 {
            return Err(VaultError::Config(
                "ledger.block_time_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Blocks-to-live for a time-to-live, rounded up and never zero.
    pub fn btl_for(&self, ttl: Duration) -> u64 {
        let block_time = self.block_time_secs.max(1);
        ttl.as_secs().div_ceil(block_time).max(1)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: default_ledger_enabled(),
            rpc_url: String::new(),
            chain_id: default_chain_id(),
            private_key: String::new(),
            storage_address: default_storage_address(),
            gas_limit: default_gas_limit(),
            max_fee_per_gas: default_max_fee_per_gas(),
            max_priority_fee_per_gas: default_max_priority_fee_per_gas(),
            block_time_secs: default_block_time_secs(),
            request_timeout_ms: default_request_timeout_ms(),
            rpc_retry_count: default_rpc_retry_count(),
            rpc_retry_delay_ms: default_rpc_retry_delay_ms(),
            confirmation: ConfirmationPolicy::default(),
        }
    }
}

/// Bounded receipt polling: `attempts` polls spaced `interval_ms` apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationPolicy {
    #[serde(default = "default_confirmation_attempts")]
    pub attempts: u32,
    #[serde(default = "default_confirmation_interval_ms")]
    pub interval_ms: u64,
}

impl ConfirmationPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            attempts: default_confirmation_attempts(),
            interval_ms: default_confirmation_interval_ms(),
        }
    }
}

/// Limits and file policy applied to every upload batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_site_size")]
    pub max_site_size: u64,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_forbidden_extensions")]
    pub forbidden_extensions: Vec<String>,
    #[serde(default = "default_allowed_hidden_paths")]
    pub allowed_hidden_paths: Vec<String>,
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
}

impl UploadConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 || self.max_site_size == 0 {
            return Err(VaultError::Config(
                "upload size limits must be positive".to_string(),
            ));
        }

        if self.max_file_size > self.max_site_size {
            return Err(VaultError::Config(format!(
                "upload.max_file_size ({}) exceeds upload.max_site_size ({})",
                self.max_file_size, self.max_site_size
            )));
        }

        if self.ttl_secs == 0 {
            return Err(VaultError::Config("upload.ttl_secs must be positive".to_string()));
        }

        Ok(())
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_site_size: default_max_site_size(),
            ttl_secs: default_ttl_secs(),
            forbidden_extensions: default_forbidden_extensions(),
            allowed_hidden_paths: default_allowed_hidden_paths(),
            upload_concurrency: default_upload_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl MirrorConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("mirror.db")
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_ledger_enabled() -> bool {
    true
}

fn default_chain_id() -> u64 {
    60138453033
}

fn default_storage_address() -> String {
    "0x0000000000000000000000000000000060138453".to_string()
}

fn default_gas_limit() -> u64 {
    1_000_000
}

fn default_max_fee_per_gas() -> u64 {
    2_000_000_000
}

fn default_max_priority_fee_per_gas() -> u64 {
    1_000_000_000
}

fn default_block_time_secs() -> u64 {
    2
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_rpc_retry_count() -> u32 {
    2
}

fn default_rpc_retry_delay_ms() -> u64 {
    250
}

fn default_confirmation_attempts() -> u32 {
    30
}

fn default_confirmation_interval_ms() -> u64 {
    2_000
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_site_size() -> u64 {
    50 * 1024 * 1024
}

fn default_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_forbidden_extensions() -> Vec<String> {
    [
        "exe", "dll", "so", "dylib", "bat", "cmd", "com", "msi", "sh", "bash", "ps1", "php",
        "phtml", "py", "pl", "rb", "cgi", "asp", "aspx", "jsp", "jar", "scr", "vbs",
    ]
    .iter()
    .map(|ext| ext.to_string())
    .collect()
}

fn default_allowed_hidden_paths() -> Vec<String> {
    vec![".well-known/".to_string()]
}

fn default_upload_concurrency() -> usize {
    4
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
