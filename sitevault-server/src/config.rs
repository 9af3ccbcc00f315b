use serde::{Deserialize, Serialize};
use sitevault_core::{LedgerConfig, MirrorConfig, Result, UploadConfig, VaultError};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Requests to `{label}.{base_domain}` are served from site `label`.
    #[serde(default)]
    pub base_domain: Option<String>,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,
}

impl ServerConfig {
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs.max(1))
    }

    /// Path prefix with exactly one leading slash and no trailing slash.
    pub fn normalized_path_prefix(&self) -> String {
        let trimmed = self.path_prefix.trim_matches('/');
        if trimmed.is_empty() {
            "/s".to_string()
        } else {
            format!("/{}", trimmed)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            base_domain: None,
            path_prefix: default_path_prefix(),
            reclaim_interval_secs: default_reclaim_interval_secs(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_path_prefix() -> String {
    "/s".to_string()
}

fn default_reclaim_interval_secs() -> u64 {
    300
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("SITEVAULT").separator("__"))
            .build()
            .map_err(|e| VaultError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| VaultError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.upload.validate()?;
        self.ledger.validate()?;

        let reserved = ["sites", "health"];
        let prefix = self.server.normalized_path_prefix();
        if reserved.contains(&prefix.trim_start_matches('/')) {
            return Err(VaultError::Config(format!(
                "server.path_prefix {} collides with an API route",
                prefix
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_yaml_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  bind_addr: 127.0.0.1:9000\n  base_domain: sites.example.org\nledger:\n  enabled: false\nupload:\n  max_file_size: 1024\n  max_site_size: 4096"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.server.base_domain.as_deref(), Some("sites.example.org"));
        assert_eq!(config.server.normalized_path_prefix(), "/s");
        assert!(!config.ledger.enabled);
        assert_eq!(config.upload.max_file_size, 1024);
        assert_eq!(config.upload.ttl_secs, UploadConfig::default().ttl_secs);
        assert_eq!(config.mirror.db_path(), MirrorConfig::default().db_path());
    }

    #[test]
    fn enabled_ledger_requires_endpoint() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "ledger:\n  enabled: true").unwrap();

        let err = Config::from_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, VaultError::Config(_)));
    }

    #[test]
    fn path_prefix_is_normalized_and_checked() {
        let mut config = Config::default();
        config.ledger.enabled = false;

        config.server.path_prefix = "sites/".to_string();
        assert_eq!(config.server.normalized_path_prefix(), "/sites");
        assert!(config.validate().is_err());

        config.server.path_prefix = "/p/".to_string();
        assert_eq!(config.server.normalized_path_prefix(), "/p");
        assert!(config.validate().is_ok());
    }
}
