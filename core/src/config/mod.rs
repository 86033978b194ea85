// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Layered configuration loading.
//!
//! Precedence, highest to lowest:
//! 1. CLI arguments (applied by callers after `load()`)
//! 2. Environment variables (`FOGMESH_` prefix)
//! 3. Config file (`~/.config/fogmesh/config.toml`)
//! 4. Defaults (`Config::default()`)
//!
//! # Examples
//!
//! ```no_run
//! use fogmesh_core::config::ConfigLoader;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().load()?;
//! let config = ConfigLoader::new().with_file("/path/to/config.toml").load()?;
//! # Ok(())
//! # }
//! ```

pub mod models;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde_valid::Validate;
use std::path::{Path, PathBuf};

pub use models::{Config, CoordinatorConfig, WorkerConfig};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "fogmesh";

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "FOGMESH";

/// Environment variable separator for nested configuration, e.g.
/// `FOGMESH_COORDINATOR__BIND_ADDRESS`.
const ENV_SEPARATOR: &str = "__";

/// Configuration loader with a builder API.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    custom_file: Option<PathBuf>,
    skip_default_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    /// A loader with default settings (file + env enabled, no custom file).
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this file instead of the default config file location.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.custom_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skip the default config file lookup. Useful for tests.
    pub fn skip_default_file(mut self) -> Self {
        self.skip_default_file = true;
        self
    }

    /// Skip reading environment variables. Useful for tests.
    pub fn skip_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load and validate configuration from every enabled source.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file fails to parse, an environment
    /// variable has the wrong shape, or the merged configuration fails
    /// `serde_valid` validation.
    pub fn load(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::builder();

        let defaults = Config::default();
        let defaults_map = config_to_map(&defaults)?;
        builder = builder.add_source(config::Config::try_from(&defaults_map)?);

        if !self.skip_default_file {
            if let Some(config_path) = self.find_config_file() {
                tracing::debug!(path = %config_path.display(), "loading config file");
                builder = builder.add_source(File::from(config_path).required(false).format(config::FileFormat::Toml));
            } else {
                tracing::debug!("no default config file found");
            }
        }

        if let Some(ref custom_path) = self.custom_file {
            tracing::info!(path = %custom_path.display(), "loading custom config file");
            builder = builder.add_source(File::from(custom_path.as_ref()).required(true).format(config::FileFormat::Toml));
        }

        if !self.skip_env {
            tracing::debug!("loading config from environment variables");
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .with_list_parse_key("worker.installed_models")
                    .list_separator(","),
            );
        }

        let config_result = builder.build().context("failed to build configuration")?;
        let config: Config = config_result.try_deserialize().context("failed to deserialize configuration")?;

        config.validate().map_err(|e| anyhow::anyhow!("configuration validation failed: {e}"))?;

        tracing::info!("configuration loaded successfully");
        Ok(config)
    }

    /// Search the platform config directory, then the current directory.
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Some(config_path);
            }
        }

        let local_config = PathBuf::from(CONFIG_FILE_NAME);
        if local_config.exists() {
            return Some(local_config);
        }

        None
    }

    /// The platform-specific config directory (not guaranteed to exist).
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME))
    }

    /// The full path where the default config file is expected.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }
}

fn config_to_map(config: &Config) -> Result<serde_json::Value, ConfigError> {
    serde_json::to_value(config).map_err(|e| ConfigError::Foreign(Box::new(e)))
}

/// Write a default configuration file at the standard location. Refuses to
/// overwrite an existing file.
pub fn init_config_file() -> Result<PathBuf> {
    let config_dir = ConfigLoader::default_config_dir().context("could not determine config directory")?;

    std::fs::create_dir_all(&config_dir).context("failed to create config directory")?;

    let config_path = config_dir.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        anyhow::bail!("config file already exists at: {}", config_path.display());
    }

    let default_config = Config::default();
    let toml_content = toml::to_string_pretty(&default_config).context("failed to serialize default config")?;

    std::fs::write(&config_path, toml_content).context("failed to write config file")?;

    Ok(config_path)
}
