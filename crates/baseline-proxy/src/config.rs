//! Configuration for the proxy daemon

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Main proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub organization: OrganizationConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub services: ServiceEndpoints,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            organization: OrganizationConfig::default(),
            registry: RegistryConfig::default(),
            services: ServiceEndpoints::default(),
            storage: StorageConfig::default(),
            bus: BusConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// HTTP edge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Shared secret verifying organization bearer tokens and invitation
    /// JWTs without a `kid` header
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Additional verification keys selected by the JWT `kid` header
    #[serde(default)]
    pub jwt_keys: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".parse().expect("valid default listen addr"),
            enable_cors: true,
            jwt_secret: default_jwt_secret(),
            jwt_keys: HashMap::new(),
        }
    }
}

/// Identity of the local organization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationConfig {
    /// Globally unique organization address
    pub address: Option<String>,

    pub organization_id: Option<String>,

    /// Refresh token exchanged for short-lived access tokens
    pub refresh_token: Option<String>,

    pub workgroup_id: Option<String>,

    /// Public messaging endpoint advertised to counterparties
    pub messaging_endpoint: Option<String>,

    /// Vault holding this organization's credentials
    pub vault_id: Option<String>,
}

/// On-chain registry and default counterparties
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Organization registry contract address
    pub contract_address: Option<String>,

    /// Counterparties seeded into the directory at startup
    #[serde(default)]
    pub default_counterparties: Vec<CounterpartyConfig>,
}

/// A statically configured counterparty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterpartyConfig {
    pub address: String,
    pub url: Option<String>,
}

/// Endpoints of the external services the proxy consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    #[serde(default = "default_ident_url")]
    pub ident_url: String,

    #[serde(default = "default_vault_url")]
    pub vault_url: String,

    #[serde(default = "default_privacy_url")]
    pub privacy_url: String,

    #[serde(default = "default_nchain_url")]
    pub nchain_url: String,

    /// System-of-record adapter
    pub sor_url: Option<String>,

    pub sor_bearer_token: Option<String>,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            ident_url: default_ident_url(),
            vault_url: default_vault_url(),
            privacy_url: default_privacy_url(),
            nchain_url: default_nchain_url(),
            sor_url: None,
            sor_bearer_token: None,
        }
    }
}

/// Registry persistence backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (development and testing)
    Memory,

    /// PostgreSQL storage
    Postgres {
        url: String,

        #[serde(default = "default_pool_size")]
        max_connections: u32,

        #[serde(default = "default_connect_timeout")]
        connect_timeout_secs: u64,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

/// Message bus consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Workers spawned per durable subject
    #[serde(default = "default_consumer_concurrency")]
    pub consumer_concurrency: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            consumer_concurrency: default_consumer_concurrency(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_jwt_secret() -> String {
    "baseline-development-secret-do-not-use".to_string()
}

fn default_ident_url() -> String {
    "https://ident.provide.services".to_string()
}

fn default_vault_url() -> String {
    "https://vault.provide.services".to_string()
}

fn default_privacy_url() -> String {
    "https://privacy.provide.services".to_string()
}

fn default_nchain_url() -> String {
    "https://nchain.provide.services".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_consumer_concurrency() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ProxyConfig {
    /// Load configuration from defaults, an optional file, and
    /// `BASELINE_`-prefixed environment variables (highest precedence).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&ProxyConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BASELINE")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
