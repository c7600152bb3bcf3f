//! Provisioning configuration.
//!
//! The configuration is split into one section per collaborator. Each section
//! is handed to its component's constructor and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::federation::AttributeProtocol;

/// Root configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [federation]
/// protocol = "shibboleth"
///
/// [directory]
/// url = "ldap://ldap.example.org:389"
/// bind_dn = "cn=admin,dc=example,dc=org"
/// user_base_dn = "ou=People,dc=example,dc=org"
/// gid_number = 10000
///
/// [home]
/// agent_url = "http://127.0.0.1:8700"
/// timeout = "10s"
///
/// [redirect]
/// default_target = "https://portal.example.org/"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ShibgateConfig {
    /// Which federation vocabulary incoming assertions use.
    pub federation: FederationConfig,

    /// Local account settings.
    pub account: AccountConfig,

    /// External directory (LDAP) settings.
    pub directory: DirectoryConfig,

    /// Home directory and storage mount provisioning.
    pub home: HomeConfig,

    /// Post-provisioning redirect.
    pub redirect: RedirectConfig,

    /// Account record storage.
    pub storage: StorageConfig,

    /// Logging.
    pub logging: LoggingConfig,
}

/// Federation settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Attribute vocabulary used by the upstream identity provider.
    pub protocol: AttributeProtocol,
}

/// Local account settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Number of random bytes in a generated credential.
    /// The credential is hex encoded, so its length is twice this.
    pub credential_bytes: usize,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            credential_bytes: 16,
        }
    }
}

/// Directory service settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// LDAP server URL (`ldap://` or `ldaps://`).
    pub url: String,

    /// DN used for the administrative bind.
    pub bind_dn: String,

    /// Password for the administrative bind.
    #[serde(skip_serializing)]
    pub bind_password: String,

    /// Upgrade plain connections with StartTLS.
    pub starttls: bool,

    /// Base DN under which user entries live.
    pub user_base_dn: String,

    /// Group id assigned to every created account.
    pub gid_number: u32,

    /// Prefix for home directories; the account's mail is appended.
    pub home_prefix: String,

    /// Login shell for created accounts.
    pub login_shell: String,

    /// Lowest uid number handed out.
    pub uid_floor: u32,

    /// Connect and operation timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: "ldap://localhost:389".to_string(),
            bind_dn: String::new(),
            bind_password: String::new(),
            starttls: false,
            user_base_dn: "ou=People,dc=example,dc=org".to_string(),
            gid_number: 10000,
            home_prefix: "/home".to_string(),
            login_shell: "/bin/bash".to_string(),
            uid_floor: 2000,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Home provisioning agent settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HomeConfig {
    /// Whether home directory and mount provisioning runs at all.
    /// When disabled both steps succeed without contacting the agent.
    pub enabled: bool,

    /// Base URL of the provisioning agent.
    pub agent_url: String,

    /// Request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            agent_url: "http://127.0.0.1:8700".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Redirect settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Destination when the caller supplies no return path.
    pub default_target: String,

    /// Hosts a return path may point to.
    /// Empty means any return path is accepted.
    pub allowed_hosts: Vec<String>,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            default_target: "http://localhost/".to_string(),
            allowed_hosts: Vec::new(),
        }
    }
}

/// Account record storage settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// PostgreSQL connection URL. When unset an in-memory store is used.
    #[serde(skip_serializing)]
    pub postgres_url: Option<String>,

    /// Maximum pool connections.
    pub pool_size: u32,

    /// Pool acquire timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            pool_size: 5,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl ShibgateConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a URL does not parse, a required DN is empty,
    /// or a numeric limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.credential_bytes < 8 {
            return Err(ConfigError::InvalidValue(
                "account.credential_bytes must be >= 8".to_string(),
            ));
        }

        let ldap_url = url::Url::parse(&self.directory.url).map_err(|e| {
            ConfigError::InvalidValue(format!("directory.url '{}': {e}", self.directory.url))
        })?;
        if !matches!(ldap_url.scheme(), "ldap" | "ldaps") {
            return Err(ConfigError::InvalidValue(format!(
                "directory.url must use ldap:// or ldaps://, got '{}'",
                ldap_url.scheme()
            )));
        }

        if self.directory.user_base_dn.is_empty() {
            return Err(ConfigError::Missing("directory.user_base_dn".to_string()));
        }

        if self.directory.timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "directory.timeout must be > 0".to_string(),
            ));
        }

        if self.home.enabled {
            url::Url::parse(&self.home.agent_url).map_err(|e| {
                ConfigError::InvalidValue(format!("home.agent_url '{}': {e}", self.home.agent_url))
            })?;
        }

        if self.redirect.default_target.is_empty() {
            return Err(ConfigError::Missing("redirect.default_target".to_string()));
        }

        if self.storage.pool_size == 0 {
            return Err(ConfigError::InvalidValue(
                "storage.pool_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShibgateConfig::default();
        assert_eq!(config.federation.protocol, AttributeProtocol::Shibboleth);
        assert_eq!(config.account.credential_bytes, 16);
        assert_eq!(config.directory.uid_floor, 2000);
        assert_eq!(config.directory.login_shell, "/bin/bash");
        assert!(config.redirect.allowed_hosts.is_empty());
        assert!(config.storage.postgres_url.is_none());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(ShibgateConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_ldap_scheme_fails_validation() {
        let mut config = ShibgateConfig::default();
        config.directory.url = "http://ldap.example.org".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
        assert!(err.to_string().contains("ldap://"));
    }

    #[test]
    fn test_empty_base_dn_fails_validation() {
        let mut config = ShibgateConfig::default();
        config.directory.user_base_dn = String::new();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_disabled_home_skips_url_check() {
        let mut config = ShibgateConfig::default();
        config.home.agent_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.home.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let toml = r#"
            [federation]
            protocol = "rapid-connect"

            [directory]
            url = "ldaps://ldap.example.org"
            timeout = "3s"
            gid_number = 500

            [redirect]
            default_target = "https://portal/"
            allowed_hosts = ["portal", "docs.example.org"]
        "#;

        let config: ShibgateConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.federation.protocol, AttributeProtocol::RapidConnect);
        assert_eq!(config.directory.timeout, Duration::from_secs(3));
        assert_eq!(config.directory.gid_number, 500);
        assert_eq!(config.directory.uid_floor, 2000);
        assert_eq!(config.redirect.allowed_hosts.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = ShibgateConfig::default();
        config.directory.bind_password = "hunter2".to_string();
        config.storage.postgres_url = Some("postgres://u:p@db/x".to_string());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("u:p@db"));
    }
}
