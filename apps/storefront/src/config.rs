//! # Storefront Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DULCE_DB_PATH=/var/lib/dulce/dulce.db                              │
//! │     DULCE_OVERSELL_POLICY=reject                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/dulcebias/storefront.toml (Linux)                        │
//! │     ~/Library/Application Support/cl.dulcebias.storefront/... (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     free shipping from $15.000, flat rate $3.000, oversell = flag      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/dulce/dulce.db"
//! max_connections = 5
//!
//! [pricing]
//! free_shipping_threshold = 15000
//! shipping_cost = 3000
//!
//! [stock]
//! critical_threshold = 5
//! low_threshold = 10
//! oversell_policy = "flag"   # flag | allow_negative | reject
//!
//! [notifications]
//! poll_interval_secs = 5
//! batch_size = 50
//! retry_delay_secs = 300
//! admin_emails = ["kati@dulcebias.cl"]
//! admin_phones = ["+56912345678"]
//! from_email = "hola@dulcebias.cl"
//!
//! [checkout]
//! order_number_retries = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use dulce_core::cart::ShippingPolicy;
use dulce_core::stock::{OversellPolicy, StockThresholds};
use dulce_core::Money;
use dulce_db::{CheckoutSettings, DbConfig};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `dulce.db` in the platform data directory.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("cl", "dulcebias", "storefront")
        .map(|dirs| dirs.data_dir().join("dulce.db"))
        .unwrap_or_else(|| PathBuf::from("dulce.db"))
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Pricing Settings
// =============================================================================

/// Shipping rule, in whole pesos.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricingSettings {
    /// Subtotals at or above this ship free.
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: i64,

    #[serde(default = "default_shipping_cost")]
    pub shipping_cost: i64,
}

fn default_free_shipping_threshold() -> i64 {
    15_000
}

fn default_shipping_cost() -> i64 {
    3_000
}

impl Default for PricingSettings {
    fn default() -> Self {
        PricingSettings {
            free_shipping_threshold: default_free_shipping_threshold(),
            shipping_cost: default_shipping_cost(),
        }
    }
}

// =============================================================================
// Stock Settings
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StockSettings {
    /// At or below this a product raises an admin alert.
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: i64,

    #[serde(default = "default_low_threshold")]
    pub low_threshold: i64,

    /// What checkout does when an order asks for more than is on hand.
    #[serde(default)]
    pub oversell_policy: OversellPolicy,
}

fn default_critical_threshold() -> i64 {
    5
}

fn default_low_threshold() -> i64 {
    10
}

impl Default for StockSettings {
    fn default() -> Self {
        StockSettings {
            critical_threshold: default_critical_threshold(),
            low_threshold: default_low_threshold(),
            oversell_policy: OversellPolicy::default(),
        }
    }
}

// =============================================================================
// Notification Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Interval between queue polls (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Queue entries handled per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay before a failed notification is tried again (seconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Stock alerts go to each of these by email.
    #[serde(default)]
    pub admin_emails: Vec<String>,

    /// Stock alerts go to each of these by WhatsApp.
    #[serde(default)]
    pub admin_phones: Vec<String>,

    #[serde(default = "default_from_email")]
    pub from_email: String,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_batch_size() -> usize {
    50
}

fn default_retry_delay() -> u64 {
    300
}

fn default_from_email() -> String {
    "noreply@dulcebias.cl".to_string()
}

impl Default for NotificationSettings {
    fn default() -> Self {
        NotificationSettings {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            retry_delay_secs: default_retry_delay(),
            admin_emails: Vec::new(),
            admin_phones: Vec::new(),
            from_email: default_from_email(),
        }
    }
}

// =============================================================================
// Checkout Settings
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// Attempts when a concurrent checkout takes the same order number.
    #[serde(default = "default_order_number_retries")]
    pub order_number_retries: u32,
}

fn default_order_number_retries() -> u32 {
    5
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        CheckoutConfig {
            order_number_retries: default_order_number_retries(),
        }
    }
}

// =============================================================================
// Main Storefront Configuration
// =============================================================================

/// Complete storefront configuration. Every section is optional in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorefrontConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub pricing: PricingSettings,

    #[serde(default)]
    pub stock: StockSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub checkout: CheckoutConfig,
}

impl StorefrontConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (storefront.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading storefront config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load storefront config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ConfigError::SaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Storefront config saved");
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.pricing.free_shipping_threshold < 0 || self.pricing.shipping_cost < 0 {
            return Err(ConfigError::Invalid(
                "pricing amounts cannot be negative".into(),
            ));
        }
        if self.stock.critical_threshold < 0 || self.stock.low_threshold < self.stock.critical_threshold {
            return Err(ConfigError::Invalid(format!(
                "stock thresholds must satisfy 0 <= critical ({}) <= low ({})",
                self.stock.critical_threshold, self.stock.low_threshold
            )));
        }
        if self.notifications.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "notifications.poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.notifications.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "notifications.batch_size must be greater than 0".into(),
            ));
        }
        if let Some(bad) = self.notifications.admin_emails.iter().find(|e| !e.contains('@')) {
            return Err(ConfigError::Invalid(format!("admin email '{}' is not an address", bad)));
        }
        if self.checkout.order_number_retries == 0 {
            return Err(ConfigError::Invalid(
                "checkout.order_number_retries must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Applies `DULCE_*` overrides. Unparseable values are ignored with a
    /// warning.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("DULCE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(max) = var("DULCE_DB_MAX_CONNECTIONS") {
            match max.parse() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %max, "Invalid DULCE_DB_MAX_CONNECTIONS"),
            }
        }

        if let Some(threshold) = var("DULCE_FREE_SHIPPING_THRESHOLD") {
            match threshold.parse() {
                Ok(n) => self.pricing.free_shipping_threshold = n,
                Err(_) => warn!(value = %threshold, "Invalid DULCE_FREE_SHIPPING_THRESHOLD"),
            }
        }

        if let Some(cost) = var("DULCE_SHIPPING_COST") {
            match cost.parse() {
                Ok(n) => self.pricing.shipping_cost = n,
                Err(_) => warn!(value = %cost, "Invalid DULCE_SHIPPING_COST"),
            }
        }

        if let Some(policy) = var("DULCE_OVERSELL_POLICY") {
            match policy.parse() {
                Ok(p) => {
                    debug!(policy = %policy, "Overriding oversell policy from environment");
                    self.stock.oversell_policy = p;
                }
                Err(_) => warn!(policy = %policy, "Unknown oversell policy in environment"),
            }
        }

        if let Some(secs) = var("DULCE_POLL_INTERVAL_SECS") {
            match secs.parse() {
                Ok(n) => self.notifications.poll_interval_secs = n,
                Err(_) => warn!(value = %secs, "Invalid DULCE_POLL_INTERVAL_SECS"),
            }
        }

        if let Some(emails) = var("DULCE_ADMIN_EMAILS") {
            self.notifications.admin_emails = split_list(&emails);
        }

        if let Some(phones) = var("DULCE_ADMIN_PHONES") {
            self.notifications.admin_phones = split_list(&phones);
        }
    }

    /// `storefront.toml` in the platform config directory.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("cl", "dulcebias", "storefront")
            .map(|dirs| dirs.config_dir().join("storefront.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }

    pub fn shipping_policy(&self) -> ShippingPolicy {
        ShippingPolicy {
            free_shipping_threshold: Money::from_pesos(self.pricing.free_shipping_threshold),
            flat_rate: Money::from_pesos(self.pricing.shipping_cost),
        }
    }

    pub fn stock_thresholds(&self) -> StockThresholds {
        StockThresholds {
            critical: self.stock.critical_threshold,
            low: self.stock.low_threshold,
        }
    }

    pub fn checkout_settings(&self) -> CheckoutSettings {
        CheckoutSettings {
            shipping: self.shipping_policy(),
            oversell: self.stock.oversell_policy,
            thresholds: self.stock_thresholds(),
            max_attempts: self.checkout.order_number_retries,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.notifications.poll_interval_secs)
    }

    pub fn retry_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.notifications.retry_delay_secs as i64)
    }
}

/// Comma-separated list, blanks dropped.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = StorefrontConfig::default();
        assert_eq!(config.pricing.free_shipping_threshold, 15_000);
        assert_eq!(config.pricing.shipping_cost, 3_000);
        assert_eq!(config.stock.critical_threshold, 5);
        assert_eq!(config.stock.low_threshold, 10);
        assert_eq!(config.stock.oversell_policy, OversellPolicy::Flag);
        assert_eq!(config.notifications.poll_interval_secs, 5);
        assert_eq!(config.notifications.batch_size, 50);
        assert_eq!(config.notifications.retry_delay_secs, 300);
        assert_eq!(config.checkout.order_number_retries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = StorefrontConfig::from_toml(
            r#"
            [stock]
            oversell_policy = "reject"

            [notifications]
            admin_emails = ["kati@dulcebias.cl"]
            "#,
        )
        .unwrap();

        assert_eq!(config.stock.oversell_policy, OversellPolicy::Reject);
        assert_eq!(config.stock.critical_threshold, 5);
        assert_eq!(config.notifications.admin_emails, vec!["kati@dulcebias.cl"]);
        assert_eq!(config.pricing.shipping_cost, 3_000);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(StorefrontConfig::from_toml("[stock]\noversell_policy = \"maybe\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DULCE_DB_PATH", "/tmp/dulce-test.db"),
            ("DULCE_FREE_SHIPPING_THRESHOLD", "20000"),
            ("DULCE_OVERSELL_POLICY", "allow_negative"),
            ("DULCE_ADMIN_EMAILS", "a@dulcebias.cl, b@dulcebias.cl,"),
            ("DULCE_SHIPPING_COST", "not-a-number"),
        ]);

        let mut config = StorefrontConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/dulce-test.db"));
        assert_eq!(config.pricing.free_shipping_threshold, 20_000);
        assert_eq!(config.pricing.shipping_cost, 3_000);
        assert_eq!(config.stock.oversell_policy, OversellPolicy::AllowNegative);
        assert_eq!(
            config.notifications.admin_emails,
            vec!["a@dulcebias.cl", "b@dulcebias.cl"]
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = StorefrontConfig::default();
        config.stock.critical_threshold = 20;
        assert!(config.validate().is_err());

        config = StorefrontConfig::default();
        config.notifications.batch_size = 0;
        assert!(config.validate().is_err());

        config = StorefrontConfig::default();
        config.notifications.admin_emails = vec!["not-an-email".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_checkout_settings_follow_config() {
        let mut config = StorefrontConfig::default();
        config.pricing.free_shipping_threshold = 20_000;
        config.checkout.order_number_retries = 3;

        let settings = config.checkout_settings();
        assert_eq!(settings.shipping.free_shipping_threshold, Money::from_pesos(20_000));
        assert_eq!(settings.shipping.flat_rate, Money::from_pesos(3_000));
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.thresholds, StockThresholds { critical: 5, low: 10 });
    }

    #[test]
    fn test_toml_serialization() {
        let config = StorefrontConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[pricing]"));
        assert!(toml_str.contains("[notifications]"));
        assert!(toml_str.contains("oversell_policy = \"flag\""));
    }
}
