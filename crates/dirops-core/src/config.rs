//! Configuration structures for directory operations.
//!
//! Configuration is resolved before an engine is constructed. The on-disk layout mirrors the
//! operator's `config.json`:
//!
//! ```json
//! {
//!   "ad_settings": {
//!     "domain_controllers": ["dc1.example.com", "dc2.example.com"],
//!     "base_dn": "DC=example,DC=com",
//!     "target_group_dn": "CN=KRR-LG-InetUsers,OU=Groups,DC=example,DC=com"
//!   },
//!   "logging": { "file": "logs/activity.log" }
//! }
//! ```
//!
//! Protected group names usually live in a separate `sensitive_groups.json` file, see
//! [`load_protected_groups`].

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use validator::{Validate, ValidationError};

/// Placeholder substituted with the escaped search text in [`DirectoryConfig::user_filter_template`].
pub const QUERY_PLACEHOLDER: &str = "{query}";

/// Default user search filter (matches account name or common name containing the query).
pub const DEFAULT_USER_FILTER_TEMPLATE: &str =
    "(&(objectCategory=person)(objectClass=user)(|(sAMAccountName=*{query}*)(cn=*{query}*)))";

/// Directory settings consumed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DirectoryConfig {
    /// Selectable domain controllers, in preference order
    #[validate(length(min = 1), custom(function = "validate_controllers"))]
    pub domain_controllers: Vec<String>,

    /// Search base for user lookups
    #[validate(custom(function = "validate_dn_syntax"))]
    pub base_dn: String,

    /// Group that users are added to by default
    #[validate(custom(function = "validate_dn_syntax"))]
    pub target_group_dn: String,

    /// Group simple names requiring operator confirmation
    #[serde(default)]
    pub protected_group_names: BTreeSet<String>,

    /// Filter template used for plain-text user searches
    #[validate(custom(function = "validate_filter_template"))]
    #[serde(default = "default_user_filter_template")]
    pub user_filter_template: String,

    /// Connection settings
    #[validate(nested)]
    #[serde(default)]
    pub connection: ConnectionConfig,
}

fn default_user_filter_template() -> String {
    DEFAULT_USER_FILTER_TEMPLATE.to_string()
}

impl DirectoryConfig {
    /// Create a new directory configuration with required parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if validation fails.
    pub fn new(
        domain_controllers: Vec<String>,
        base_dn: impl Into<String>,
        target_group_dn: impl Into<String>,
    ) -> Result<Self> {
        let config = Self {
            domain_controllers,
            base_dn: base_dn.into(),
            target_group_dn: target_group_dn.into(),
            protected_group_names: BTreeSet::new(),
            user_filter_template: default_user_filter_template(),
            connection: ConnectionConfig::default(),
        };

        config
            .validate()
            .map_err(|e| Error::ConfigError(format!("Invalid directory configuration: {e}")))?;

        Ok(config)
    }

    /// Replace the protected group names.
    #[must_use]
    pub fn with_protected_groups<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected_group_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Override the user search filter template.
    ///
    /// The template must contain `{query}`.
    #[must_use]
    pub fn with_user_filter_template(mut self, template: impl Into<String>) -> Self {
        self.user_filter_template = template.into();
        self
    }

    /// Override the connection settings.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// First configured controller, used when the caller does not pick one.
    #[must_use]
    pub fn default_controller(&self) -> Option<&str> {
        self.domain_controllers.first().map(String::as_str)
    }
}

fn validate_controllers(controllers: &[String]) -> std::result::Result<(), ValidationError> {
    if controllers.iter().any(|c| c.trim().is_empty()) {
        return Err(ValidationError::new("empty_domain_controller"));
    }
    Ok(())
}

fn validate_dn_syntax(value: &str) -> std::result::Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() || !value.contains('=') {
        return Err(ValidationError::new("distinguished_name"));
    }
    Ok(())
}

fn validate_filter_template(value: &str) -> std::result::Result<(), ValidationError> {
    if !value.contains(QUERY_PLACEHOLDER) {
        return Err(ValidationError::new("missing_query_placeholder"));
    }
    Ok(())
}

/// Protocol connection settings for the directory adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ConnectionConfig {
    /// Use LDAPS instead of plain LDAP when the controller is a bare host name
    #[serde(default)]
    pub use_tls: bool,

    /// Port override (defaults to 389 / 636)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub port: Option<u16>,

    /// Whether to verify TLS certificates
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,

    /// Optional path to a custom CA certificate
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tls_ca_cert: Option<PathBuf>,

    /// Connection timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Per-operation timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_connection_timeout_secs() -> u64 {
    10
}

const fn default_operation_timeout_secs() -> u64 {
    15
}

impl ConnectionConfig {
    /// Create connection settings with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            use_tls: false,
            port: None,
            tls_verify: default_tls_verify(),
            tls_ca_cert: None,
            connection_timeout_secs: default_connection_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }

    /// Enable or disable LDAPS.
    #[must_use]
    pub const fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Set an explicit port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set whether to verify TLS certificates.
    #[must_use]
    pub const fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Set custom CA certificate path.
    #[must_use]
    pub fn with_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Set connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Set operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Connection timeout as a Duration.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Operation timeout as a Duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Activity log settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Append-only JSON lines activity log
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Console log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs").join("activity.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            level: default_log_level(),
        }
    }
}

/// Top-level application configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// Directory settings
    #[validate(nested)]
    pub ad_settings: DirectoryConfig,

    /// Activity log settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Parse and validate configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the JSON is malformed or validation fails.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            Error::ConfigError(format!(
                "failed to read configuration {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }
}

#[derive(Debug, Deserialize)]
struct ProtectedGroupsFile {
    #[serde(default)]
    protected_groups: Vec<String>,
}

/// Loads protected group names from a `{"protected_groups": [...]}` JSON file.
///
/// A missing file yields an empty set (no group is protected) and logs a warning.
///
/// # Errors
///
/// Returns [`Error::ConfigError`] when the file exists but cannot be read or parsed; a broken
/// file must not silently disable the safeguard.
pub fn load_protected_groups(path: impl AsRef<Path>) -> Result<BTreeSet<String>> {
    let path = path.as_ref();
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                path = %path.display(),
                "Protected groups file not found, no groups will be protected"
            );
            return Ok(BTreeSet::new());
        }
        Err(err) => {
            return Err(Error::ConfigError(format!(
                "failed to read protected groups {}: {err}",
                path.display()
            )))
        }
    };

    let parsed: ProtectedGroupsFile = serde_json::from_str(&raw).map_err(|err| {
        Error::ConfigError(format!(
            "invalid protected groups file {}: {err}",
            path.display()
        ))
    })?;

    Ok(parsed
        .protected_groups
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}
