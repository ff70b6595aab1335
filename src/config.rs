// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Runtime configuration.
//!
//! Settings come from an optional TOML file; `MUFFI_BIND` overrides the
//! listen address. Every field has a default, so an empty file is valid:
//!
//! ```toml
//! bind = "0.0.0.0:8080"
//!
//! [ledger]
//! signup_credits = 20
//! link_bonus = 25
//! ```

use crate::base::Credits;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const CONFIG_PATH_ENV: &str = "MUFFI_CONFIG";
pub const BIND_ENV: &str = "MUFFI_BIND";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Amounts and limits used by the ledger flows.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Welcome bonus posted when an account is created.
    pub signup_credits: Credits,
    /// Bonus posted to each side when two accounts get linked.
    pub link_bonus: Credits,
    pub history_default_limit: usize,
    pub history_max_limit: usize,
    pub min_access_key_len: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            signup_credits: 20,
            link_bonus: 25,
            history_default_limit: 20,
            history_max_limit: 100,
            min_access_key_len: 6,
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signup_credits < 0 || self.link_bonus < 0 {
            return Err(ConfigError::Invalid(
                "bonus amounts must not be negative".into(),
            ));
        }
        if self.history_default_limit == 0 || self.history_max_limit == 0 {
            return Err(ConfigError::Invalid("history limits must be positive".into()));
        }
        if self.history_default_limit > self.history_max_limit {
            return Err(ConfigError::Invalid(
                "history_default_limit exceeds history_max_limit".into(),
            ));
        }
        if self.min_access_key_len == 0 {
            return Err(ConfigError::Invalid(
                "min_access_key_len must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub ledger: LedgerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            ledger: LedgerConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(contents)?;
        config.ledger.validate()?;
        Ok(config)
    }

    /// Loads the file at `path` (or `MUFFI_CONFIG`), then applies
    /// environment overrides. Without a file the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                debug!("Loading configuration from {:?}", path);
                let contents = std::fs::read_to_string(&path).map_err(|source| {
                    ConfigError::Io {
                        path: path.clone(),
                        source,
                    }
                })?;
                Self::from_toml_str(&contents)?
            }
            None => {
                info!("No configuration file given, using defaults");
                Self::default()
            }
        };

        if let Ok(value) = std::env::var(BIND_ENV) {
            config.bind = value.parse().map_err(|_| ConfigError::InvalidEnv {
                key: BIND_ENV,
                value: value.clone(),
            })?;
        }
        Ok(config)
    }
}
