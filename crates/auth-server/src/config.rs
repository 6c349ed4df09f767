//! Configuration loading and management

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for the auth server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Client identifiers allowed to start the authorization flow
    #[serde(default)]
    pub allowed_client_ids: BTreeSet<String>,

    /// Token configuration
    #[serde(default)]
    pub tokens: TokenConfig,

    /// Token endpoint policy
    #[serde(default)]
    pub exchange: ExchangeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Authorization code lifetime in seconds (default: 10 minutes)
    #[serde(default = "default_authorization_code_lifetime")]
    pub authorization_code_lifetime_secs: u64,

    /// Access token lifetime in seconds (default: 1 hour)
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime_secs: u64,

    /// Refresh token lifetime in seconds (default: 1 day)
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime_secs: u64,

    /// Sign each token class with its own key instead of one shared key
    #[serde(default)]
    pub separate_class_keys: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            authorization_code_lifetime_secs: default_authorization_code_lifetime(),
            access_token_lifetime_secs: default_access_token_lifetime(),
            refresh_token_lifetime_secs: default_refresh_token_lifetime(),
            separate_class_keys: false,
        }
    }
}

/// Checks applied when an authorization code is exchanged at `/token`.
///
/// Everything is off by default, which keeps codes stateless and unbound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Reject codes whose embedded client_id/redirect_uri differ from the request
    #[serde(default)]
    pub verify_code_binding: bool,

    /// Remember exchanged codes until they expire and reject a second exchange
    #[serde(default)]
    pub single_use_codes: bool,

    /// What `expires_in` in the token response describes
    #[serde(default)]
    pub expires_in: ExpiresIn,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiresIn {
    /// Seconds left on the exchanged authorization code
    #[default]
    CodeRemaining,
    /// Lifetime of the freshly minted access token
    AccessToken,
}

fn default_authorization_code_lifetime() -> u64 {
    600 // 10 minutes
}

fn default_access_token_lifetime() -> u64 {
    3600 // 1 hour
}

fn default_refresh_token_lifetime() -> u64 {
    24 * 3600 // 1 day
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allowed_client_ids: BTreeSet::new(),
            tokens: TokenConfig::default(),
            exchange: ExchangeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config directory
    pub fn load(config_path: &str) -> Result<Self> {
        let config_file = Path::new(config_path).join("config.json");

        let config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| "Failed to parse config.json")?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            config
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_file
            );
            let config = Config::default();

            std::fs::create_dir_all(config_path)
                .with_context(|| format!("Failed to create config directory: {}", config_path))?;

            // Write default config for reference
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would mint tokens which are expired on issue
    pub fn validate(&self) -> Result<()> {
        let lifetimes = [
            ("authorization_code_lifetime_secs", self.tokens.authorization_code_lifetime_secs),
            ("access_token_lifetime_secs", self.tokens.access_token_lifetime_secs),
            ("refresh_token_lifetime_secs", self.tokens.refresh_token_lifetime_secs),
        ];
        for (name, secs) in lifetimes {
            if secs == 0 {
                bail!("tokens.{} must be greater than zero", name);
            }
        }
        Ok(())
    }

    /// Add client identifiers on top of the ones read from config.json
    pub fn allow_clients<I>(&mut self, client_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.allowed_client_ids.extend(
            client_ids
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
        );
    }
}
