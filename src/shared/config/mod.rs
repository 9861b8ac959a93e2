//! Application configuration module
//!
//! Maps every collection name to its remote endpoint, key field,
//! normalization rules and fallback policy. Configuration can be built in
//! code through [`AppConfigBuilder`] or parsed from TOML.
//!
//! ```toml
//! base_url = "http://127.0.0.1:8000/sap/opu/odata/sap"
//! fetch_timeout_ms = 10000
//!
//! [[collections]]
//! name = "lots"
//! service = "ZQM_INSPECT_PR_CDS"
//! entity_set = "ZQM_INSPECT_PR"
//! key_field = "InspectionLotNumber"
//! decimal_fields = ["ActualQuantity", "InspectedQuantity"]
//! derived = "inspection_lot"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::shared::collection::CollectionName;

/// Default OData root of the inspection services
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/sap/opu/odata/sap";
/// Default deadline for full collection reads
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
/// Default deadline for `$count` reads
pub const DEFAULT_COUNT_TIMEOUT_MS: u64 = 5_000;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// OData root shared by all services
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Deadline for collection reads and creates, in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Deadline for count reads, in milliseconds
    #[serde(default = "default_count_timeout_ms")]
    pub count_timeout_ms: u64,
    /// Login service settings
    #[serde(default)]
    pub login: LoginConfig,
    /// Configured collections
    #[serde(default = "default_collections")]
    pub collections: Vec<CollectionConfig>,
}

/// Per-collection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Logical collection name
    pub name: CollectionName,
    /// OData service the entity set belongs to
    pub service: String,
    /// Entity set name
    pub entity_set: String,
    /// Primary key field
    pub key_field: String,
    /// Overrides the application base URL
    #[serde(default)]
    pub base_url: Option<String>,
    /// Fields delivered as decimal text and normalized to numbers
    #[serde(default)]
    pub decimal_fields: Vec<String>,
    /// Fields normalized to dates
    #[serde(default)]
    pub date_fields: Vec<String>,
    /// Which derived view rules apply
    #[serde(default)]
    pub derived: DerivedRules,
    /// Quantity bookkeeping for composite writes
    #[serde(default)]
    pub quantity: Option<QuantityRule>,
    /// Fields that must be non-blank when inserting
    #[serde(default)]
    pub required_on_insert: Vec<String>,
    /// Whether substitute data is served when the remote is unavailable
    #[serde(default = "default_true")]
    pub fallback: bool,
    /// Substitute count served when `$count` fails
    #[serde(default)]
    pub fallback_count: Option<u64>,
}

/// Derived view rule set attached to a collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedRules {
    /// No derived fields
    #[default]
    None,
    /// Status text/state and progress percentage
    InspectionLot,
    /// Formatted recording date and status state
    InspectionResult,
    /// Decision status state, code text and quantity progress
    UsageDecision,
}

/// Quantity bookkeeping rule: parts recorded against a lot may never exceed
/// `total - recorded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityRule {
    /// Field holding the total quantity
    pub total_field: String,
    /// Field accumulating already recorded quantity
    pub recorded_field: String,
    /// Category fields a composite write may split a quantity across
    pub part_fields: Vec<String>,
}

/// Login service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginConfig {
    pub service: String,
    pub entity_set: String,
    /// Credentials accepted when the login service is unreachable
    #[serde(default)]
    pub offline_users: Vec<OfflineUser>,
}

/// Credential pair accepted in offline mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineUser {
    pub username: String,
    pub password: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

fn default_count_timeout_ms() -> u64 {
    DEFAULT_COUNT_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            service: "ZQM_LOG_PR_CDS".to_string(),
            entity_set: "ZQM_LOG_PR".to_string(),
            offline_users: vec![OfflineUser {
                username: "demo".to_string(),
                password: "demo".to_string(),
            }],
        }
    }
}

/// Built-in inspection lot, result and usage decision collections
pub fn default_collections() -> Vec<CollectionConfig> {
    vec![
        CollectionConfig {
            name: CollectionName::lots(),
            service: "ZQM_INSPECT_PR_CDS".to_string(),
            entity_set: "ZQM_INSPECT_PR".to_string(),
            key_field: "InspectionLotNumber".to_string(),
            base_url: None,
            decimal_fields: vec!["ActualQuantity".to_string(), "InspectedQuantity".to_string()],
            date_fields: Vec::new(),
            derived: DerivedRules::InspectionLot,
            quantity: Some(QuantityRule {
                total_field: "ActualQuantity".to_string(),
                recorded_field: "InspectedQuantity".to_string(),
                part_fields: vec![
                    "UnrestrictedQuantity".to_string(),
                    "BlockedQuantity".to_string(),
                    "ScrapQuantity".to_string(),
                    "SampleQuantity".to_string(),
                ],
            }),
            required_on_insert: Vec::new(),
            fallback: true,
            fallback_count: Some(57),
        },
        CollectionConfig {
            name: CollectionName::results(),
            service: "ZQM_RESULT_PR_CDS".to_string(),
            entity_set: "ZQM_RESULT_PR".to_string(),
            key_field: "ResultId".to_string(),
            base_url: None,
            decimal_fields: Vec::new(),
            date_fields: vec!["RecordedDate".to_string()],
            derived: DerivedRules::InspectionResult,
            quantity: None,
            required_on_insert: vec!["InspectionLotNumber".to_string(), "PlantCode".to_string()],
            fallback: true,
            fallback_count: Some(42),
        },
        CollectionConfig {
            name: CollectionName::usage(),
            service: "ZQM_US_PR_CDS".to_string(),
            entity_set: "ZQM_US_PR".to_string(),
            key_field: "InspectionLotNumber".to_string(),
            base_url: None,
            decimal_fields: vec!["LotQuantity".to_string(), "InspectedQuantity".to_string()],
            date_fields: Vec::new(),
            derived: DerivedRules::UsageDecision,
            quantity: None,
            required_on_insert: Vec::new(),
            fallback: true,
            fallback_count: Some(57),
        },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            count_timeout_ms: DEFAULT_COUNT_TIMEOUT_MS,
            login: LoginConfig::default(),
            collections: default_collections(),
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url(&self.base_url)?;
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("fetch_timeout_ms"));
        }
        if self.count_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("count_timeout_ms"));
        }

        let mut seen = std::collections::HashSet::new();
        for collection in &self.collections {
            if !seen.insert(collection.name.clone()) {
                return Err(ConfigError::DuplicateCollection(collection.name.to_string()));
            }
            if collection.key_field.trim().is_empty() {
                return Err(ConfigError::MissingValue("key_field"));
            }
            if collection.entity_set.trim().is_empty() {
                return Err(ConfigError::MissingValue("entity_set"));
            }
            if let Some(url) = &collection.base_url {
                validate_url(url)?;
            }
            if let Some(rule) = &collection.quantity {
                if rule.part_fields.is_empty() {
                    return Err(ConfigError::MissingValue("quantity.part_fields"));
                }
            }
        }
        Ok(())
    }

    /// Look up a collection by name
    pub fn collection(&self, name: &CollectionName) -> Option<&CollectionConfig> {
        self.collections.iter().find(|c| &c.name == name)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn count_timeout(&self) -> Duration {
        Duration::from_millis(self.count_timeout_ms)
    }

    /// Root URL of the login service
    pub fn login_service_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.login.service)
    }
}

impl CollectionConfig {
    /// URL of the service root this collection lives in
    pub fn service_url(&self, default_base: &str) -> String {
        let base = self.base_url.as_deref().unwrap_or(default_base);
        format!("{}/{}", base.trim_end_matches('/'), self.service)
    }

    /// URL of the entity set
    pub fn entity_set_url(&self, default_base: &str) -> String {
        format!("{}/{}", self.service_url(default_base), self.entity_set)
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl(url.to_string()))
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    base_url: Option<String>,
    fetch_timeout_ms: Option<u64>,
    count_timeout_ms: Option<u64>,
    login: Option<LoginConfig>,
    collections: Option<Vec<CollectionConfig>>,
}

impl AppConfigBuilder {
    /// Set the OData root URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.fetch_timeout_ms = Some(ms);
        self
    }

    pub fn count_timeout_ms(mut self, ms: u64) -> Self {
        self.count_timeout_ms = Some(ms);
        self
    }

    pub fn login(mut self, login: LoginConfig) -> Self {
        self.login = Some(login);
        self
    }

    /// Replace the collection table
    pub fn collections(mut self, collections: Vec<CollectionConfig>) -> Self {
        self.collections = Some(collections);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        let config = AppConfig {
            base_url: self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            fetch_timeout_ms: self.fetch_timeout_ms.unwrap_or(DEFAULT_FETCH_TIMEOUT_MS),
            count_timeout_ms: self.count_timeout_ms.unwrap_or(DEFAULT_COUNT_TIMEOUT_MS),
            login: self.login.unwrap_or_default(),
            collections: self.collections.unwrap_or_else(default_collections),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("timeout must be greater than zero: {0}")]
    InvalidTimeout(&'static str),
    #[error("collection configured twice: {0}")]
    DuplicateCollection(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(String),
}
