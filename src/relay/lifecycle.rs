//! Client liveness tracking for a streaming response.
//!
//! The watcher owns the read half of the client connection. Nothing is
//! expected from the client once streaming starts, so any EOF or read error
//! means the client has gone and the relay should stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt};

/// One-way stop flag shared by the relay loop and the watcher.
///
/// Set at most once; the relay checks it at the top of every iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns true only for the call that actually set it.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Drain the client side until it closes, then fire `cancel`.
pub async fn watch_client<R>(mut reader: R, cancel: CancelSignal)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                debug!("ignoring {} bytes from streaming client", n);
            }
            Err(e) => {
                debug!("client read error: {}", e);
                break;
            }
        }
    }

    if cancel.cancel() {
        info!("client closed connection");
    }
}
