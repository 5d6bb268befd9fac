// SPDX-License-Identifier: Apache-2.0
//
// Server bootstrap: the listener set, the accept loops, and the janitor.

use std::sync::Arc;
use std::time::Duration;

use platen_core::{PlatenError, Result, ServerConfig};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use crate::client;
use crate::discovery;
use crate::job;
use crate::printer::{Printer, PrinterRegistry};
use crate::tls;

/// Janitor sweep interval.
const CLEAN_INTERVAL: Duration = Duration::from_secs(10);

/// Process-wide server state, passed by handle to every component.
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: PrinterRegistry,
    pub tls: Option<TlsAcceptor>,
    pub hostname: String,
}

impl ServerContext {
    /// Assemble a context: printer, registry, and optional TLS acceptor.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
        let mut registry = PrinterRegistry::new();
        registry.add(Printer::create(&config, &hostname))?;

        let tls = match (&config.tls_certificate, &config.tls_key) {
            (Some(certificate), Some(key)) => Some(tls::acceptor(certificate, key)?),
            _ => None,
        };

        Ok(Self {
            config,
            registry,
            tls,
            hostname,
        })
    }

    /// A context without TLS or validation side effects, for unit tests.
    #[doc(hidden)]
    pub fn for_tests(config: ServerConfig, hostname: &str) -> Self {
        let mut registry = PrinterRegistry::new();
        registry
            .add(Printer::create(&config, hostname))
            .expect("single printer");
        Self {
            config,
            registry,
            tls: None,
            hostname: hostname.to_string(),
        }
    }
}

/// Run the server until interrupted.
pub async fn run(config: ServerConfig) -> Result<()> {
    let ctx = Arc::new(ServerContext::new(config)?);

    // One listening socket per configured address.
    let mut listeners = Vec::new();
    for address in &ctx.config.listen {
        let bind = format!("{address}:{}", ctx.config.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| PlatenError::Listener(format!("bind {bind}: {e}")))?;
        info!(address = %bind, "listening");
        listeners.push(listener);
    }

    // Advertise every printer over DNS-SD.
    let mut advertisements = Vec::new();
    for printer in ctx.registry.iter() {
        match discovery::register(printer).await {
            Ok(advertisement) => advertisements.push(advertisement),
            Err(e) => warn!(error = %e, "service advertisement unavailable"),
        }
    }

    // The janitor reaps completed jobs and expired subscriptions.
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEAN_INTERVAL);
            loop {
                ticker.tick().await;
                for printer in ctx.registry.iter() {
                    job::clean_jobs(printer).await;
                }
            }
        });
    }

    // Accept loops, one per listener.
    let mut accept_tasks = Vec::new();
    for listener in listeners {
        let ctx = ctx.clone();
        accept_tasks.push(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            client::process_client(ctx, socket, peer).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                }
            }
        }));
    }

    info!("server running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| PlatenError::Listener(format!("signal handler: {e}")))?;
    info!("shutting down");

    for task in accept_tasks {
        task.abort();
    }
    for advertisement in advertisements {
        advertisement.shutdown();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_creates_printer_and_spool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ServerConfig {
            printer_name: "p1".into(),
            spool_directory: dir.path().join("spool"),
            ..Default::default()
        };
        let ctx = ServerContext::new(config).expect("context");
        assert!(ctx.registry.find("/ipp/print").is_some());
        assert!(ctx.config.spool_directory.is_dir());
        assert!(ctx.tls.is_none());
    }

    #[tokio::test]
    async fn context_rejects_half_configured_tls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ServerConfig {
            spool_directory: dir.path().to_path_buf(),
            tls_certificate: Some(dir.path().join("cert.pem")),
            ..Default::default()
        };
        assert!(ServerContext::new(config).is_err());
    }
}
