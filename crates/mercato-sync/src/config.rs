//! # Sync Configuration
//!
//! Integration settings, loaded once at the start of a run and passed by
//! reference into every component.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MERCATO_API_KEY, MERCATO_API_SECRET, MERCATO_SELLER_ID             │
//! │     MERCATO_BASE_URL, MERCATO_SANDBOX                                  │
//! │     MERCATO_DATABASE_PATH, MERCATO_ALERT_DESTINATION                   │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/mercato/mercato.toml (Linux)                             │
//! │     ~/Library/Application Support/com.mercato.mercato/mercato.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [marketplace]
//! api_key = "..."
//! api_secret = "..."
//! seller_id = "123456"
//! sandbox = false
//!
//! [features]
//! auto_sync_enabled = true
//! product_sync_enabled = true
//! webhook_processing_enabled = true
//! auto_convert_orders = false
//!
//! [dispatcher]
//! batch_size = 50
//! max_retries = 3
//! max_execution_secs = 300
//!
//! [product_sync]
//! batch_size = 100
//! bulk_batch_size = 50
//! rate_limit_per_minute = 600
//!
//! [alerts]
//! destination = "ops@example.com"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

/// Production seller API.
pub const PRODUCTION_BASE_URL: &str = "https://api.trendyol.com/sapigw/";

/// Sandbox seller API.
pub const SANDBOX_BASE_URL: &str = "https://stageapi.trendyol.com/stagesapigw/";

const CONFIG_FILE_NAME: &str = "mercato.toml";
const DATABASE_FILE_NAME: &str = "mercato.db";

// =============================================================================
// Marketplace Settings
// =============================================================================

/// Seller API credentials and client behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceSettings {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub api_secret: Option<String>,

    #[serde(default)]
    pub seller_id: Option<String>,

    /// Overrides the production/sandbox URL when set.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Use the sandbox API.
    #[serde(default)]
    pub sandbox: bool,

    /// Whole-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connect timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait after a 429 before the next attempt (seconds).
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_request_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_rate_limit_wait() -> u64 {
    60
}
fn default_user_agent() -> String {
    format!("mercato/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for MarketplaceSettings {
    fn default() -> Self {
        MarketplaceSettings {
            api_key: None,
            api_secret: None,
            seller_id: None,
            base_url: None,
            sandbox: false,
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_attempts: default_max_attempts(),
            rate_limit_wait_secs: default_rate_limit_wait(),
            user_agent: default_user_agent(),
        }
    }
}

impl MarketplaceSettings {
    /// The base URL requests are built on.
    pub fn effective_base_url(&self) -> &str {
        match self.base_url.as_deref() {
            Some(url) => url,
            None if self.sandbox => SANDBOX_BASE_URL,
            None => PRODUCTION_BASE_URL,
        }
    }
}

/// Credentials that passed the presence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub seller_id: String,
}

// =============================================================================
// Feature Flags
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Master switch for outbound sync.
    #[serde(default = "default_true")]
    pub auto_sync_enabled: bool,

    #[serde(default = "default_true")]
    pub product_sync_enabled: bool,

    #[serde(default = "default_true")]
    pub webhook_processing_enabled: bool,

    /// Create a local order for every new marketplace order.
    #[serde(default)]
    pub auto_convert_orders: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        FeatureFlags {
            auto_sync_enabled: true,
            product_sync_enabled: true,
            webhook_processing_enabled: true,
            auto_convert_orders: false,
        }
    }
}

// =============================================================================
// Dispatcher Settings
// =============================================================================

/// Webhook dispatcher run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Events per main pass; the retry pass takes half.
    #[serde(default = "default_dispatch_batch")]
    pub batch_size: u32,

    /// Failures after which an event is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,

    /// Run budget and lock lifetime (seconds).
    #[serde(default = "default_dispatch_max_execution")]
    pub max_execution_secs: u64,

    /// New work stops this long before the budget runs out (seconds).
    #[serde(default = "default_dispatch_margin")]
    pub safety_margin_secs: u64,

    /// Fresh events older than this are not picked up (hours).
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,

    /// Claims older than this are released at run start (minutes).
    #[serde(default = "default_stuck_after")]
    pub stuck_after_minutes: i64,
}

fn default_dispatch_batch() -> u32 {
    50
}
fn default_max_retries() -> i64 {
    3
}
fn default_dispatch_max_execution() -> u64 {
    300
}
fn default_dispatch_margin() -> u64 {
    30
}
fn default_lookback_hours() -> i64 {
    mercato_core::DEFAULT_LOOKBACK_HOURS
}
fn default_stuck_after() -> i64 {
    30
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        DispatcherSettings {
            batch_size: default_dispatch_batch(),
            max_retries: default_max_retries(),
            max_execution_secs: default_dispatch_max_execution(),
            safety_margin_secs: default_dispatch_margin(),
            lookback_hours: default_lookback_hours(),
            stuck_after_minutes: default_stuck_after(),
        }
    }
}

// =============================================================================
// Product Sync Settings
// =============================================================================

/// Batch product synchronizer run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSyncSettings {
    #[serde(default = "default_sync_batch")]
    pub batch_size: u32,

    /// Products per bulk call; bulk upload takes half.
    #[serde(default = "default_bulk_batch")]
    pub bulk_batch_size: u32,

    #[serde(default = "default_sync_max_execution")]
    pub max_execution_secs: u64,

    #[serde(default = "default_sync_margin")]
    pub safety_margin_secs: u64,

    /// Outbound calls per rolling minute.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    /// Minimum gap between two calls (milliseconds).
    #[serde(default = "default_min_call_spacing")]
    pub min_call_spacing_ms: u64,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// VAT percentage sent with every product.
    #[serde(default = "default_vat_rate")]
    pub vat_rate: u32,

    #[serde(default = "default_cargo_company")]
    pub cargo_company_id: i64,
}

fn default_sync_batch() -> u32 {
    100
}
fn default_bulk_batch() -> u32 {
    50
}
fn default_sync_max_execution() -> u64 {
    1800
}
fn default_sync_margin() -> u64 {
    60
}
fn default_rate_limit() -> u32 {
    600
}
fn default_min_call_spacing() -> u64 {
    100
}
fn default_currency() -> String {
    "TRY".to_string()
}
fn default_vat_rate() -> u32 {
    18
}
fn default_cargo_company() -> i64 {
    10
}

impl Default for ProductSyncSettings {
    fn default() -> Self {
        ProductSyncSettings {
            batch_size: default_sync_batch(),
            bulk_batch_size: default_bulk_batch(),
            max_execution_secs: default_sync_max_execution(),
            safety_margin_secs: default_sync_margin(),
            rate_limit_per_minute: default_rate_limit(),
            min_call_spacing_ms: default_min_call_spacing(),
            currency: default_currency(),
            vat_rate: default_vat_rate(),
            cargo_company_id: default_cargo_company(),
        }
    }
}

// =============================================================================
// Alerts & Database
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertSettings {
    /// Where fatal run errors are reported (address or channel).
    #[serde(default)]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file; the platform data directory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete integration configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub marketplace: MarketplaceSettings,

    #[serde(default)]
    pub features: FeatureFlags,

    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    #[serde(default)]
    pub product_sync: ProductSyncSettings,

    #[serde(default)]
    pub alerts: AlertSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (mercato.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration. Credentials are checked separately, only
    /// by the job that needs them.
    pub fn validate(&self) -> SyncResult<()> {
        let url = Url::parse(self.marketplace.effective_base_url())?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(SyncError::InvalidUrl(format!(
                "Base URL must be http(s), got: {}",
                url
            )));
        }

        if self.marketplace.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if self.dispatcher.batch_size == 0 || self.product_sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.product_sync.bulk_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "bulk_batch_size must be greater than 0".into(),
            ));
        }

        if self.dispatcher.max_retries <= 0 {
            return Err(SyncError::InvalidConfig(
                "max_retries must be greater than 0".into(),
            ));
        }

        if self.product_sync.rate_limit_per_minute == 0 {
            return Err(SyncError::InvalidConfig(
                "rate_limit_per_minute must be greater than 0".into(),
            ));
        }

        if self.dispatcher.safety_margin_secs >= self.dispatcher.max_execution_secs
            || self.product_sync.safety_margin_secs >= self.product_sync.max_execution_secs
        {
            return Err(SyncError::InvalidConfig(
                "safety_margin_secs must be smaller than max_execution_secs".into(),
            ));
        }

        // A reclaim must never release claims held by a run that is still
        // inside its execution window.
        let stuck_after_secs = u64::try_from(self.dispatcher.stuck_after_minutes)
            .unwrap_or(0)
            .saturating_mul(60);
        if stuck_after_secs <= self.dispatcher.max_execution_secs {
            return Err(SyncError::InvalidConfig(
                "stuck_after_minutes must exceed the dispatcher max_execution_secs".into(),
            ));
        }

        Ok(())
    }

    /// Returns the credentials, or the name of the first missing one.
    pub fn credentials(&self) -> SyncResult<Credentials> {
        fn present(value: &Option<String>, name: &str) -> SyncResult<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| SyncError::MissingCredentials(name.to_string()))
        }

        Ok(Credentials {
            api_key: present(&self.marketplace.api_key, "api_key")?,
            api_secret: present(&self.marketplace.api_secret, "api_secret")?,
            seller_id: present(&self.marketplace.seller_id, "seller_id")?,
        })
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("MERCATO_API_KEY") {
            self.marketplace.api_key = Some(key);
        }

        if let Ok(secret) = std::env::var("MERCATO_API_SECRET") {
            self.marketplace.api_secret = Some(secret);
        }

        if let Ok(seller) = std::env::var("MERCATO_SELLER_ID") {
            debug!(seller_id = %seller, "Overriding seller id from environment");
            self.marketplace.seller_id = Some(seller);
        }

        if let Ok(url) = std::env::var("MERCATO_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            self.marketplace.base_url = Some(url);
        }

        if let Ok(sandbox) = std::env::var("MERCATO_SANDBOX") {
            match sandbox.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.marketplace.sandbox = true,
                "0" | "false" | "no" => self.marketplace.sandbox = false,
                _ => warn!(value = %sandbox, "Unknown MERCATO_SANDBOX value"),
            }
        }

        if let Ok(path) = std::env::var("MERCATO_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(destination) = std::env::var("MERCATO_ALERT_DESTINATION") {
            self.alerts.destination = Some(destination);
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "mercato", "mercato")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Returns the default database path in the platform data directory.
    pub fn default_database_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().join(DATABASE_FILE_NAME))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Configured database path, falling back to the platform default, then
    /// the working directory.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(Self::default_database_path)
            .unwrap_or_else(|| PathBuf::from(DATABASE_FILE_NAME))
    }

    pub fn product_sync_enabled(&self) -> bool {
        self.features.auto_sync_enabled && self.features.product_sync_enabled
    }

    pub fn webhook_processing_enabled(&self) -> bool {
        self.features.webhook_processing_enabled
    }

    pub fn dispatcher_max_execution(&self) -> Duration {
        Duration::from_secs(self.dispatcher.max_execution_secs)
    }

    pub fn product_sync_max_execution(&self) -> Duration {
        Duration::from_secs(self.product_sync.max_execution_secs)
    }

    pub fn alert_destination(&self) -> Option<&str> {
        self.alerts.destination.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.dispatcher.batch_size, 50);
        assert_eq!(config.dispatcher.max_retries, 3);
        assert_eq!(config.product_sync.bulk_batch_size, 50);
        assert_eq!(config.product_sync.rate_limit_per_minute, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_selection() {
        let mut settings = MarketplaceSettings::default();
        assert_eq!(settings.effective_base_url(), PRODUCTION_BASE_URL);
        settings.sandbox = true;
        assert_eq!(settings.effective_base_url(), SANDBOX_BASE_URL);
        settings.base_url = Some("http://localhost:8080/".into());
        assert_eq!(settings.effective_base_url(), "http://localhost:8080/");
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.marketplace.base_url = Some("ftp://example.com".into());
        assert!(config.validate().is_err());
        config.marketplace.base_url = None;

        config.dispatcher.safety_margin_secs = 300;
        assert!(config.validate().is_err());
        config.dispatcher.safety_margin_secs = 30;

        config.product_sync.rate_limit_per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stuck_window_must_outlast_dispatcher_run() {
        let mut config = SyncConfig::default();
        config.dispatcher.max_execution_secs = 600;

        config.dispatcher.stuck_after_minutes = 10;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        config.dispatcher.stuck_after_minutes = -1;
        assert!(config.validate().is_err());

        config.dispatcher.stuck_after_minutes = 11;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_report_first_missing() {
        let mut config = SyncConfig::default();
        config.marketplace.api_key = Some("key".into());
        config.marketplace.api_secret = Some("  ".into());

        match config.credentials() {
            Err(SyncError::MissingCredentials(name)) => assert_eq!(name, "api_secret"),
            other => panic!("unexpected: {:?}", other),
        }

        config.marketplace.api_secret = Some("secret".into());
        config.marketplace.seller_id = Some("42".into());
        assert_eq!(config.credentials().unwrap().seller_id, "42");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [features]
            product_sync_enabled = false

            [dispatcher]
            batch_size = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatcher.batch_size, 10);
        assert_eq!(config.dispatcher.max_retries, 3);
        assert!(config.features.auto_sync_enabled);
        assert!(!config.product_sync_enabled());
    }

    #[test]
    fn test_toml_serialization() {
        let config = SyncConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[marketplace]"));
        assert!(toml_str.contains("[dispatcher]"));
    }

    #[test]
    fn test_save_load_and_fallback() {
        let dir = std::env::temp_dir().join(format!("mercato-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join(CONFIG_FILE_NAME);

        let mut config = SyncConfig::default();
        config.dispatcher.batch_size = 12;
        config.save(Some(path.clone())).unwrap();

        let loaded = SyncConfig::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.dispatcher.batch_size, 12);

        std::fs::write(&path, "[dispatcher]\nbatch_size = \"many\"\n").unwrap();
        assert!(SyncConfig::load(Some(path.clone())).is_err());
        assert_eq!(SyncConfig::load_or_default(Some(path)).dispatcher.batch_size, 50);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
