// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `kvrelay` process entry point: CLI parsing, logging setup, config
//! precedence, and graceful shutdown (SPEC_FULL.md §A).

use clap::Parser;
use kvrelay::config::RelayConfig;
use kvrelay::server::Server;
use tracing_subscriber::EnvFilter;

/// In-memory key/value relay speaking a memcached-flavored text protocol.
#[derive(Debug, Parser)]
#[command(name = "kvrelay", version, about)]
struct Args {
    /// Path to a YAML configuration file; overrides the flag defaults below.
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long = "max-routines")]
    max_routines: Option<usize>,

    #[arg(long = "lru-size")]
    lru_size: Option<usize>,

    #[arg(long = "min-expiration")]
    min_expiration: Option<i64>,

    /// trace, debug, info, warn, error
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

impl Args {
    /// Apply CLI overrides onto a loaded (or default) configuration.
    /// `--config` wins for the fields it sets; flags fill in the rest,
    /// the same precedence order the teacher's `main` uses between its
    /// `Args` and `ServerConfig::from_file`.
    fn apply_to(&self, mut config: RelayConfig) -> RelayConfig {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_routines) = self.max_routines {
            config.max_routines = max_routines;
        }
        if let Some(lru_size) = self.lru_size {
            config.lru_size = lru_size;
        }
        if let Some(min_expiration) = self.min_expiration {
            config.min_expiration = min_expiration;
        }
        config
    }
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .init();
}

fn log_banner(config: &RelayConfig) {
    let ceiling = config
        .max_storage_bytes()
        .map(|b| b.to_string())
        .unwrap_or_else(|_| config.max_storage.clone());
    tracing::info!(
        "+---------------------------------------------------------+"
    );
    tracing::info!("  kvrelay starting");
    tracing::info!("  bind           : {}:{}", config.host, config.port);
    tracing::info!("  max-routines   : {}", config.max_routines);
    tracing::info!("  lru-size       : {}", config.lru_size);
    tracing::info!("  max-storage    : {} ({} bytes)", config.max_storage, ceiling);
    tracing::info!(
        "+---------------------------------------------------------+"
    );
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    let base_config = match &args.config {
        Some(path) => match RelayConfig::from_file(path) {
            Ok(c) => c,
            Err(err) => {
                tracing::error!(error = %err, path, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => RelayConfig::default(),
    };

    let config = args.apply_to(base_config);
    if let Err(err) = config.validate() {
        tracing::error!(error = %err, "invalid configuration");
        std::process::exit(1);
    }

    log_banner(&config);

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(error = %err, "failed to construct server");
            std::process::exit(1);
        }
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = server.run(shutdown).await {
        tracing::error!(error = %err, "server exited with error");
        std::process::exit(1);
    }
}
