use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::handle::RuntimeConfig;

macro_rules! from_environment {
    ($config:expr, $($key:expr, $name:tt),*$(,)?) => {{
        $(
            {
                if let Ok(value) = env::var($key) {
                    if let Ok(value) = value.parse() {
                        $config.$name = value;
                    }
                }
            }
        )*
    }};
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub loglevel: LevelFilter,
    /// Journal database. The engine runs purely in memory when unset.
    pub database: Option<PathBuf>,
    pub runtime: RuntimeConfig,
}

impl Config {
    pub fn from_file<P>(path: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
    {
        let buf = fs::read_to_string(path)?;
        Self::from_toml_str(&buf)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Overrides fields with `VB_*` environment variables that are set and parse.
    pub fn with_environment(mut self) -> Self {
        from_environment!(self, "VB_LOGLEVEL", loglevel);
        from_environment!(
            self.runtime,
            "VB_BATCH_MAX_OPS",
            batch_max_ops,
            "VB_SNAPSHOT_EVERY_OPS",
            snapshot_every_ops,
        );

        if let Ok(path) = env::var("VB_DATABASE") {
            self.database = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loglevel: LevelFilter::Info,
            database: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
