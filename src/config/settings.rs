//! # Configuration Settings
//!
//! Defines the configuration structure for the certplane authority.

use crate::errors::{CertplaneError, Result};
use crate::provisioner::ProvisionerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server configuration
    #[validate(nested)]
    pub server: ServerConfig,

    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Certificate authority configuration
    #[validate(nested)]
    pub authority: AuthorityConfig,

    /// ACME state machine configuration
    #[validate(nested)]
    pub acme: AcmeConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,

    /// Provisioners loaded into the registry at startup
    pub provisioners: Vec<ProvisionerConfig>,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(CertplaneError::from)?;
        self.validate_custom()?;
        Ok(())
    }

    fn validate_custom(&self) -> Result<()> {
        if self.database.backend == StorageBackend::Sqlite && !self.database.is_sqlite() {
            return Err(CertplaneError::validation_field(
                "SQLite backend requires a URL starting with 'sqlite:'",
                "database.url",
            ));
        }

        if self.observability.enable_metrics
            && self.observability.metrics_port != 0
            && self.observability.metrics_port == self.server.port
        {
            return Err(CertplaneError::validation("Server and metrics ports cannot be the same"));
        }

        if self.authority.sign_audience == self.authority.revoke_audience {
            return Err(CertplaneError::validation(
                "Sign and revoke audiences must be distinct",
            ));
        }

        self.authority.validate_custom()?;

        if let Some(tls) = &self.server.tls {
            if tls.client_auth != ClientAuthMode::None && tls.client_ca_path.is_none() {
                return Err(CertplaneError::validation_field(
                    "Client certificate authentication requires client_ca_path",
                    "server.tls.client_ca_path",
                ));
            }
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    #[validate(length(min = 1, message = "Host cannot be empty"))]
    pub host: String,

    /// Server port
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Request timeout in seconds
    #[validate(range(min = 1, max = 300, message = "Timeout must be between 1 and 300 seconds"))]
    pub timeout_seconds: u64,

    /// Optional TLS listener settings
    pub tls: Option<ServerTlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 9000, timeout_seconds: 30, tls: None }
    }
}

impl ServerConfig {
    /// Get the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// How the TLS listener treats client certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMode {
    /// Never request a client certificate.
    #[default]
    None,
    /// Request a certificate and verify it when one is presented.
    VerifyClientCertIfGiven,
    /// Reject connections without a verified client certificate.
    RequireAndVerifyClientCert,
}

/// TLS listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    #[serde(default)]
    pub chain_path: Option<PathBuf>,
    /// PEM bundle of roots trusted for client certificates
    #[serde(default)]
    pub client_ca_path: Option<PathBuf>,
    #[serde(default)]
    pub client_auth: ClientAuthMode,
}

/// Which key-value backend the authority database runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local map, lost on restart
    #[default]
    Memory,
    /// SQLite through the sqlx pool
    Sqlite,
    /// Token replay protection only; revocation and CRL are unavailable
    Simple,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Storage backend
    pub backend: StorageBackend,

    /// Database connection URL (SQLite backend only)
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(min = 0, max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            url: "sqlite://./data/certplane.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    /// Check if this is a SQLite configuration
    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }
}

/// Certificate authority configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Root certificate PEM handed to clients
    pub root_cert_path: Option<PathBuf>,

    /// Intermediate (issuing) certificate PEM
    pub intermediate_cert_path: Option<PathBuf>,

    /// Intermediate private key PEM
    pub intermediate_key_path: Option<PathBuf>,

    /// Generate an ephemeral root and intermediate when no paths are set
    pub dev_mode: bool,

    /// Common name used for generated CA material
    #[validate(length(min = 1, message = "CA name cannot be empty"))]
    pub ca_name: String,

    /// Audience expected in signing tokens
    #[validate(length(min = 1, message = "Sign audience cannot be empty"))]
    pub sign_audience: String,

    /// Audience expected in revocation tokens
    #[validate(length(min = 1, message = "Revoke audience cannot be empty"))]
    pub revoke_audience: String,

    /// Clock skew tolerated when validating token times
    #[validate(range(max = 600, message = "Token leeway must be at most 600 seconds"))]
    pub token_leeway_seconds: u64,

    /// Certificate revocation list settings
    #[validate(nested)]
    pub crl: CrlConfig,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            root_cert_path: None,
            intermediate_cert_path: None,
            intermediate_key_path: None,
            dev_mode: true,
            ca_name: "certplane".to_string(),
            sign_audience: "certplane/sign".to_string(),
            revoke_audience: "certplane/revoke".to_string(),
            token_leeway_seconds: 60,
            crl: CrlConfig::default(),
        }
    }
}

impl AuthorityConfig {
    /// True when the issuing certificate and key come from disk.
    pub fn has_ca_files(&self) -> bool {
        self.intermediate_cert_path.is_some() && self.intermediate_key_path.is_some()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.intermediate_cert_path.is_some() != self.intermediate_key_path.is_some() {
            return Err(CertplaneError::validation_field(
                "intermediate_cert_path and intermediate_key_path must be set together",
                "authority.intermediate_key_path",
            ));
        }
        if !self.has_ca_files() && !self.dev_mode {
            return Err(CertplaneError::validation(
                "No CA material configured and dev_mode is disabled",
            ));
        }
        if self.crl.renew_period_seconds >= self.crl.validity_seconds {
            return Err(CertplaneError::validation_field(
                "CRL renew period must be shorter than its validity",
                "authority.crl.renew_period_seconds",
            ));
        }
        Ok(())
    }

    pub fn token_leeway(&self) -> u64 {
        self.token_leeway_seconds
    }
}

/// CRL generation settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CrlConfig {
    pub enabled: bool,

    /// How long a generated CRL is valid (nextUpdate - thisUpdate)
    #[validate(range(min = 60, message = "CRL validity must be at least 60 seconds"))]
    pub validity_seconds: u64,

    /// Regenerate this long before the current CRL expires
    pub renew_period_seconds: u64,
}

impl Default for CrlConfig {
    fn default() -> Self {
        Self { enabled: true, validity_seconds: 24 * 3600, renew_period_seconds: 6 * 3600 }
    }
}

impl CrlConfig {
    pub fn validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.validity_seconds as i64)
    }

    pub fn renew_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.renew_period_seconds as i64)
    }
}

/// ACME state machine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AcmeConfig {
    /// Name of the ACME provisioner that signs finalized orders
    #[validate(length(min = 1, message = "ACME provisioner name cannot be empty"))]
    pub provisioner: String,

    /// Lifetime of a new order
    #[validate(range(min = 60, message = "Order lifetime must be at least 60 seconds"))]
    pub order_lifetime_seconds: u64,

    /// Lifetime of a new authorization
    #[validate(range(min = 60, message = "Authorization lifetime must be at least 60 seconds"))]
    pub authorization_lifetime_seconds: u64,

    /// Upper bound on a single challenge validation attempt
    #[validate(range(
        min = 1,
        max = 300,
        message = "Challenge timeout must be between 1 and 300 seconds"
    ))]
    pub challenge_timeout_seconds: u64,

    /// Failed attempts allowed before a challenge becomes invalid
    #[validate(range(min = 1, max = 10, message = "Max retries must be between 1 and 10"))]
    pub max_retries: u32,

    /// Refuse to finalize with a key that already backs an ACME certificate
    pub reject_key_reuse: bool,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            provisioner: "acme".to_string(),
            order_lifetime_seconds: 24 * 3600,
            authorization_lifetime_seconds: 24 * 3600,
            challenge_timeout_seconds: 30,
            max_retries: 3,
            reject_key_reuse: true,
        }
    }
}

impl AcmeConfig {
    pub fn order_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.order_lifetime_seconds as i64)
    }

    pub fn authorization_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.authorization_lifetime_seconds as i64)
    }

    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(self.challenge_timeout_seconds)
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to metrics
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error) or an EnvFilter directive
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: 9091,
            service_name: "certplane".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_config_bind_address() {
        let config = ServerConfig { host: "0.0.0.0".to_string(), port: 8443, ..Default::default() };
        assert_eq!(config.bind_address(), "0.0.0.0:8443");
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_database_config_timeouts() {
        let config = DatabaseConfig {
            connect_timeout_seconds: 15,
            idle_timeout_seconds: 300,
            ..Default::default()
        };
        assert_eq!(config.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));

        let config_no_idle = DatabaseConfig { idle_timeout_seconds: 0, ..Default::default() };
        assert_eq!(config_no_idle.idle_timeout(), None);
    }

    #[test]
    fn test_sqlite_backend_requires_sqlite_url() {
        let mut config = AppConfig::default();
        config.database.backend = StorageBackend::Sqlite;
        config.database.url = "postgresql://localhost/ca".to_string();
        assert!(config.validate().is_err());

        config.database.url = "sqlite::memory:".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_authority_requires_material_or_dev_mode() {
        let mut config = AppConfig::default();
        config.authority.dev_mode = false;
        assert!(config.validate().is_err());

        config.authority.intermediate_cert_path = Some(PathBuf::from("/etc/ca/int.pem"));
        assert!(config.validate().is_err());

        config.authority.intermediate_key_path = Some(PathBuf::from("/etc/ca/int.key"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_crl_renew_period_must_fit_validity() {
        let mut config = AppConfig::default();
        config.authority.crl.validity_seconds = 3600;
        config.authority.crl.renew_period_seconds = 3600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_auth_requires_roots() {
        let mut config = AppConfig::default();
        config.server.tls = Some(ServerTlsConfig {
            cert_path: PathBuf::from("cert.pem"),
            key_path: PathBuf::from("key.pem"),
            chain_path: None,
            client_ca_path: None,
            client_auth: ClientAuthMode::RequireAndVerifyClientCert,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_ranges() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.acme.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_observability_config_metrics_address() {
        let config = ObservabilityConfig { metrics_port: 9091, ..Default::default() };
        assert_eq!(config.metrics_bind_address(), Some("0.0.0.0:9091".to_string()));

        let disabled = ObservabilityConfig { metrics_port: 0, ..Default::default() };
        assert_eq!(disabled.metrics_bind_address(), None);
    }
}
