//! Layered configuration: built-in defaults, then `Mintbatch.toml`, then
//! `MINTBATCH_` environment variables. Command-line flags are applied last by
//! the caller.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use mintbatch_deploy::{BatchOptions, OperationClass, ResilientExecutor, RetryProfile};
use serde::{Deserialize, Serialize};

/// Default name of the configuration file.
pub const CONFIG_FILENAME: &str = "Mintbatch.toml";

/// Prefix of the environment variables read into the configuration.
/// Nested keys are separated by a double underscore, as in
/// `MINTBATCH_BATCH__RETRIES=4`.
pub const ENV_PREFIX: &str = "MINTBATCH_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults for every batch run.
    pub batch: BatchOptions,

    /// Endpoint probed by `check` when no URL is given on the command line.
    pub rpc_url: Option<String>,

    /// Per-class overrides of the executor retry profiles.
    pub profiles: HashMap<OperationClass, RetryProfile>,
}

impl Config {
    /// Load the configuration, reading `path` only if it exists.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            tracing::debug!(path = %path.display(), "Reading configuration file...");
        } else {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
        }

        let config: Self = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context(format!("Failed to load configuration from {}", path.display()))?;

        Ok(config)
    }

    /// Render the configuration in the format of the configuration file.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    /// Build an executor with the configured profile overrides applied.
    pub fn executor(&self) -> ResilientExecutor {
        self.profiles
            .iter()
            .fold(ResilientExecutor::new(), |executor, (class, profile)| {
                tracing::debug!(%class, max_retries = profile.max_retries, "Overriding retry profile");
                executor.with_profile(*class, profile.clone())
            })
    }
}
