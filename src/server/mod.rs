//! HTTP listener for relay requests.
//!
//! One tokio task per accepted connection. Connections share nothing but
//! the read-only `ServerContext`.

mod handler;
mod request;

pub use handler::{handle_connection, ServerContext};
pub use request::{
    find_header_end, read_request_head, text_response, RequestHead, MAX_HEAD_SIZE, PREAMBLE,
};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::net::TcpListener;

use crate::config::RelayConfig;
use crate::error::Result;
use crate::relay::session::{MulticastOpener, SessionOpener, SessionOptions};

/// How often the accept loop checks the running flag
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Relay HTTP server
pub struct RelayServer<O = MulticastOpener> {
    listen: SocketAddr,
    context: Arc<ServerContext<O>>,
    running: Arc<AtomicBool>,
}

impl RelayServer<MulticastOpener> {
    /// Server that joins real multicast groups
    pub fn new(config: &RelayConfig) -> Self {
        let opener = MulticastOpener::new(SessionOptions::from(config));
        Self::with_opener(config, opener)
    }
}

impl<O: SessionOpener + 'static> RelayServer<O> {
    pub fn with_opener(config: &RelayConfig, opener: O) -> Self {
        Self {
            listen: config.listen,
            context: Arc::new(ServerContext::new(config, opener)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting connections. Streams already running continue until
    /// their clients disconnect.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Bind the configured address and serve until stopped.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until stopped.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        let allow = &self.context.allow_list;
        info!(
            "Starting on {} (allow list: {} entries, {} match; source lock: {})",
            listener.local_addr()?,
            allow.len(),
            allow.policy(),
            self.context.settings.lock_policy
        );

        while self.running.load(Ordering::SeqCst) {
            // Use timeout to allow checking running flag
            let accepted = match tokio::time::timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(result) => result,
                Err(_) => continue,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay failed for {}: {}", peer, e);
                    }
                    let context = self.context.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, context).await {
                            debug!("connection {} error: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {}", e);
                }
            }
        }

        info!("Stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let config = RelayConfig::default();
        let server = RelayServer::new(&config);
        assert!(!server.is_running());
        assert_eq!(server.listen.port(), 8080);
    }
}
