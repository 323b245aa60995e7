//! Layered configuration
//!
//! Precedence, lowest first: built-in defaults, an optional TOML file,
//! then `ROCRATE_SYNC_*` environment variables with `__` between nested
//! keys (`ROCRATE_SYNC_LOGGING__LEVEL=debug`).

use std::path::Path;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::export::ExportOptions;
use crate::id::{IdentityScheme, DEFAULT_IDENTITY_BASE};
use crate::logging::LoggingConfig;
use crate::vocab::ROCRATE_CONTEXT;

pub const ENV_PREFIX: &str = "ROCRATE_SYNC";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base of generated entity ids
    #[serde(default = "default_identity_base")]
    pub identity_base: String,

    /// `@context` of newly created crates
    #[serde(default = "default_context_url")]
    pub context_url: String,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_identity_base() -> String {
    DEFAULT_IDENTITY_BASE.to_string()
}

fn default_context_url() -> String {
    ROCRATE_CONTEXT.to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            identity_base: default_identity_base(),
            context_url: default_context_url(),
            logging: LoggingConfig::default(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, SyncError> {
    let defaults = SyncConfig::default();
    let builder = Config::builder()
        .set_default("identity_base", defaults.identity_base)?
        .set_default("context_url", defaults.context_url)?
        .set_default("logging.level", defaults.logging.level)?
        .set_default("logging.format", "text")?;
    Ok(builder)
}

fn load_with(path: Option<&Path>, env: Environment) -> Result<SyncConfig, SyncError> {
    let mut builder = builder_with_defaults()?;
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    let config = builder.add_source(env).build()?;
    Ok(config.try_deserialize()?)
}

impl SyncConfig {
    /// Defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
        load_with(path, environment())
    }

    pub fn scheme(&self) -> IdentityScheme {
        IdentityScheme::new(self.identity_base.clone())
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            scheme: self.scheme(),
            context_url: self.context_url.clone(),
        }
    }
}
