//! Configuration management for prflow.
//!
//! Configuration is read once at startup from a TOML file. The default location
//! is platform-specific:
//!
//! - **macOS/Linux**: `~/.config/prflow/config.toml`
//! - **Windows**: `%APPDATA%\prflow\config.toml`
//!
//! # Example
//!
//! ```toml
//! api_url = "https://gitee.com"
//!
//! [[instances]]
//! owner = "acme"
//! repo = "web-app"
//! head = "dev"
//! base = "master"
//! reviewers = "alice,bob"
//! labels = "bug,自动化"
//! auto_review = true
//! auto_test = true
//! auto_merge = true
//! username = "ci-bot"
//! password = "..."
//! client_id = "..."
//! client_secret = "..."
//! ```

use crate::instance::{Credentials, Instance, InstanceRegistry};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config directory name.
const CONFIG_DIR_NAME: &str = "prflow";

/// Default hosting service URL.
pub const DEFAULT_API_URL: &str = "https://gitee.com";

/// Default upstream request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Configuration structures
// =============================================================================

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hosting service base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Upstream request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Directory mirroring the operation log. When unset, the `set_log_dir`
    /// tool is offered instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Repository instances
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

/// One `[[instances]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Repository owner (user or organization path)
    pub owner: String,
    /// Repository id
    pub repo: String,
    /// Source branch
    pub head: String,
    /// Target branch
    pub base: String,
    /// Comma-separated reviewer usernames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewers: Option<String>,
    /// Comma-separated tester usernames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testers: Option<String>,
    /// Comma-separated labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,
    #[serde(default)]
    pub auto_review: bool,
    #[serde(default)]
    pub auto_test: bool,
    #[serde(default)]
    pub auto_merge: bool,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            log_dir: None,
            instances: Vec::new(),
        }
    }
}

// =============================================================================
// Config implementation
// =============================================================================

impl Config {
    /// Get the configuration directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join(CONFIG_DIR_NAME))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// Unlike most tools a missing file is an error here: the server is
    /// useless without at least one instance.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        debug!(path = ?path, "Loading config");

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config = Self::parse(&contents)?;

        info!(
            path = ?path,
            instances = config.instances.len(),
            "Config loaded successfully"
        );
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields. Duplicate keys are caught by the registry.
    pub fn validate(&self) -> Result<()> {
        if self.instances.is_empty() {
            return Err(Error::Config(
                "At least one [[instances]] entry is required".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".to_string()));
        }

        for (idx, instance) in self.instances.iter().enumerate() {
            let required = [
                ("owner", &instance.owner),
                ("repo", &instance.repo),
                ("head", &instance.head),
                ("base", &instance.base),
                ("username", &instance.username),
                ("password", &instance.password),
                ("client_id", &instance.client_id),
                ("client_secret", &instance.client_secret),
            ];
            for (field, value) in required {
                if value.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "instances[{}].{} must not be empty",
                        idx, field
                    )));
                }
            }
        }

        Ok(())
    }

    /// Materialize the configured instances.
    pub fn instances(&self) -> Vec<Instance> {
        self.instances
            .iter()
            .map(|cfg| {
                let credentials = Credentials::new(
                    cfg.username.clone(),
                    cfg.password.clone(),
                    cfg.client_id.clone(),
                    cfg.client_secret.clone(),
                );
                let mut instance = Instance::new(
                    cfg.owner.clone(),
                    cfg.repo.clone(),
                    cfg.head.clone(),
                    cfg.base.clone(),
                    credentials,
                )
                .with_flags(cfg.auto_review, cfg.auto_test, cfg.auto_merge);
                instance.reviewers = cfg.reviewers.clone();
                instance.testers = cfg.testers.clone();
                instance.labels = cfg.labels.clone();
                instance
            })
            .collect()
    }

    /// Build the instance registry.
    pub fn registry(&self) -> Result<InstanceRegistry> {
        InstanceRegistry::new(self.instances())
    }

    /// Copy of the configuration with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for instance in &mut copy.instances {
            instance.password = "<redacted>".to_string();
            instance.client_secret = "<redacted>".to_string();
        }
        copy
    }
}

// =============================================================================
// Tests
// =============================================================================
