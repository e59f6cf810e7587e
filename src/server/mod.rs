// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The connection-dispatch machinery: accept loop → [`dispatcher::Dispatcher`]
//! → pooled [`handler::Handler`]s (spec.md §2 C8-C9), plus the 60s
//! round-robin expirer task (spec.md §4.5, §5).

pub mod connection;
pub mod dispatcher;
pub mod handler;

use crate::config::RelayConfig;
use crate::storage::Engine;
use connection::ServConn;
use dispatcher::Dispatcher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;

const EXPIRER_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("accept failed: {0}")]
    Accept(std::io::Error),
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Owns the listening socket and the [`Dispatcher`] (spec.md C9).
pub struct Server {
    config: RelayConfig,
    dispatcher: Arc<Dispatcher>,
    engine: Arc<Engine>,
}

impl Server {
    pub fn new(config: RelayConfig) -> Result<Self, ServerError> {
        let engine = Arc::new(Engine::new(&config)?);
        let dispatcher = Dispatcher::new(config.max_routines, engine.clone(), config.min_expiration);
        Ok(Self { config, dispatcher, engine })
    }

    /// Accept connections until `shutdown` resolves, driving the
    /// dispatcher loop concurrently. Returns once both have stopped.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) -> Result<(), ServerError> {
        let bind_host = if self.config.host.is_empty() {
            "0.0.0.0"
        } else {
            self.config.host.as_str()
        };
        let addr = format!("{}:{}", bind_host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind(addr.clone(), e))?;
        tracing::info!(addr, max_routines = self.config.max_routines, "relay listening");

        let dispatcher = self.dispatcher.clone();
        let dispatcher_task = tokio::spawn(dispatcher.clone().run());

        let expirer_engine = self.engine.clone();
        let expirer_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + EXPIRER_INTERVAL,
                EXPIRER_INTERVAL,
            );
            loop {
                ticker.tick().await;
                let reclaimed = expirer_engine.index.expire_tick(Instant::now());
                tracing::info!(reclaimed, "expirer tick reclaimed entries");
            }
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let seq = dispatcher.next_seq();
                            tracing::debug!(seq, %peer, "accepted connection");
                            let conn = ServConn::new(stream, seq);
                            dispatcher.handle(conn);
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "accept failed");
                        }
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("shutdown signal received");
                    break;
                }
            }
        }

        dispatcher.stop().await;
        let _ = dispatcher_task.await;
        expirer_task.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn server_construction_succeeds_for_default_config() {
        let config = RelayConfig {
            host: "127.0.0.1".to_string(),
            ..Default::default()
        };
        assert!(Server::new(config).is_ok());
    }

    #[tokio::test]
    async fn server_binds_accepts_and_shuts_down_cleanly() {
        let config = RelayConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // ephemeral port
            ..Default::default()
        };
        let server = Server::new(config).unwrap();
        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        server.run(shutdown).await.unwrap();
    }
}
