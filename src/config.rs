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

//! Service configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional file,
//! then `LEDGER__`-prefixed environment variables
//! (`LEDGER__SERVER__PORT=8080`).

use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub service: ServiceConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Values the request surface needs; handed to the router at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub application_id: String,
    /// Expected `accept-version` header value.
    pub accept_version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            application_id: "78234".to_string(),
            accept_version: "1_0".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub lock_timeout_ms: u64,
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`.
    pub filter: String,
    pub json: bool,
}

impl Config {
    /// Loads defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("service.application_id", "78234")?
            .set_default("service.accept_version", "1_0")?
            .set_default("store.lock_timeout_ms", 5000)?
            .set_default("log.filter", "info")?
            .set_default("log.json", false)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix("LEDGER").separator("__"));

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server port cannot be 0".to_string());
        }
        if self.service.application_id.is_empty() {
            return Err("service application_id is required".to_string());
        }
        if self.service.accept_version.is_empty() {
            return Err("service accept_version is required".to_string());
        }
        if self.store.lock_timeout_ms == 0 {
            return Err("store lock_timeout_ms must be positive".to_string());
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
