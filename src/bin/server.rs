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

use account_ledger::{Config, Engine, MemoryStore, api};
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Account Ledger - journal and running balance service
///
/// Serves the ledger's JSON endpoints over HTTP. Settings come from the
/// built-in defaults, an optional config file and `LEDGER__*` environment
/// variables; the flags below override all of them.
#[derive(Parser, Debug)]
#[command(name = "ledger-server")]
#[command(about = "Account ledger HTTP service", long_about = None)]
struct Args {
    /// Path to a TOML/YAML/JSON config file
    #[arg(long, env = "LEDGER_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    init_tracing(&config);
    info!(
        application_id = %config.service.application_id,
        accept_version = %config.service.accept_version,
        "starting account ledger"
    );

    let store = MemoryStore::with_lock_timeout(config.store.lock_timeout());
    let engine = Arc::new(Engine::new(store));
    let app = api::router(engine, config.service.clone());

    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("account ledger stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
