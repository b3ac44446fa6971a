//! # Configuration Management
//!
//! Configuration is layered with the `config` crate: built-in defaults, then an
//! optional file named by `CERTPLANE_CONFIG` (YAML, TOML or JSON by extension),
//! then `CERTPLANE__*` environment variables (`CERTPLANE__SERVER__PORT=9443`).

pub mod settings;
pub mod tls;

pub use settings::{
    AcmeConfig, AppConfig, AuthorityConfig, ClientAuthMode, CrlConfig, DatabaseConfig,
    ObservabilityConfig, ServerConfig, ServerTlsConfig, StorageBackend,
};
pub use tls::build_server_config;

use crate::errors::{CertplaneError, Result};
use config::{Config, Environment, File};
use std::path::Path;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "CERTPLANE_CONFIG";

const ENV_PREFIX: &str = "CERTPLANE";

impl AppConfig {
    /// Load configuration from the file named by `CERTPLANE_CONFIG` (if any)
    /// and the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().filter(|p| !p.trim().is_empty());
        Self::load_from(path.as_deref().map(Path::new))
    }

    /// Load configuration from an explicit file plus the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default()).map_err(|e| {
            CertplaneError::config_with_source("Failed to seed default configuration", Box::new(e))
        })?;

        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(CertplaneError::config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = settings.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }
}
