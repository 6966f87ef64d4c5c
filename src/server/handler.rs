//! Per-connection request handling.
//!
//! Validates the request, opens the session, then hijacks the connection:
//! the status line is written by hand and the relay streams raw bytes until
//! either side gives up.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::request::{read_request_head, text_response, RequestHead, PREAMBLE};
use crate::access::AllowList;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::relay::address::resolve_segment;
use crate::relay::lifecycle::{watch_client, CancelSignal};
use crate::relay::session::SessionOpener;
use crate::relay::stream::{RelayExit, RelayLoop, RelaySettings};

/// Shared, read-only state for all connections
pub struct ServerContext<O> {
    pub allow_list: AllowList,
    pub settings: RelaySettings,
    pub trust_forwarded: bool,
    pub opener: O,
}

impl<O: SessionOpener> ServerContext<O> {
    pub fn new(config: &RelayConfig, opener: O) -> Self {
        Self {
            allow_list: config.allow_list(),
            settings: RelaySettings::from(config),
            trust_forwarded: config.trust_forwarded,
            opener,
        }
    }
}

/// Serve one client connection to completion.
///
/// Errors are only returned when the connection broke before a response
/// could be written; every refusal is answered on the connection itself.
pub async fn handle_connection<S, O>(
    stream: S,
    peer: SocketAddr,
    ctx: Arc<ServerContext<O>>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    O: SessionOpener,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let head = match read_request_head(&mut reader).await {
        Ok(head) => head,
        Err(e @ RelayError::BadRequest(_)) => {
            debug!("bad request from {}: {}", peer, e);
            return respond(&mut writer, e.status(), &e.to_string()).await;
        }
        Err(e) => return Err(e),
    };

    let address = match route(&head) {
        Ok(address) => address,
        Err((status, body)) => return respond(&mut writer, status, body).await,
    };

    let client = head.client_ip(peer, ctx.trust_forwarded);
    info!("client {} requesting {}", client, address);

    if !ctx.allow_list.is_allowed(&client) {
        warn!("refusing {}: not in allow list", client);
        let e = RelayError::Forbidden;
        return respond(&mut writer, e.status(), &e.to_string()).await;
    }

    let endpoint = match resolve_segment(&address) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!("refusing {}: {}", client, e);
            return respond(&mut writer, e.status(), &e.to_string()).await;
        }
    };

    info!("listening on {}", endpoint);
    let source = match ctx.opener.open(&endpoint) {
        Ok(source) => source,
        Err(e) => {
            warn!("join: {}", e);
            return respond(&mut writer, e.status(), &e.to_string()).await;
        }
    };

    // From here on the session is owned by this scope or by the relay loop,
    // and dropping either releases the group membership.
    if let Err(e) = send_preamble(&mut writer).await {
        debug!("client {} gone before streaming: {}", client, e);
        return Ok(());
    }

    let cancel = CancelSignal::new();
    let watcher = tokio::spawn(watch_client(reader, cancel.clone()));

    let relay = RelayLoop::new(source, endpoint, ctx.settings.clone(), cancel);
    let report = relay.run(&mut writer).await;

    watcher.abort();
    let _ = writer.shutdown().await;

    let stats = report.stats;
    match report.exit {
        RelayExit::Cancelled => {
            info!("stream {} to {} ended: client disconnected", endpoint, client)
        }
        RelayExit::ReadFailed(e) => {
            warn!("stream {} to {} ended: read error: {}", endpoint, client, e)
        }
        RelayExit::WriteFailed(e) => {
            info!("stream {} to {} ended: write error: {}", endpoint, client, e)
        }
    }
    info!(
        "stream {} stats: {} datagrams / {} bytes forwarded, \
         dropped {} (destination) {} (source), {} read timeouts",
        endpoint,
        stats.datagrams_forwarded,
        stats.bytes_forwarded,
        stats.dropped_destination,
        stats.dropped_source,
        stats.timeouts
    );

    Ok(())
}

/// Map the request to the address segment of `GET /{address}`.
fn route(head: &RequestHead) -> std::result::Result<String, (u16, &'static str)> {
    if head.method != "GET" {
        return Err((405, "Method Not Allowed"));
    }
    let address = head.path.strip_prefix('/').unwrap_or(&head.path);
    if address.is_empty() || address.contains('/') {
        return Err((404, "Not Found"));
    }
    Ok(address.to_string())
}

async fn send_preamble<W: AsyncWrite + Unpin>(writer: &mut W) -> std::io::Result<()> {
    writer.write_all(PREAMBLE).await?;
    writer.flush().await
}

async fn respond<W: AsyncWrite + Unpin>(writer: &mut W, status: u16, body: &str) -> Result<()> {
    writer.write_all(&text_response(status, body)).await?;
    writer.flush().await?;
    let _ = writer.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(raw: &str) -> RequestHead {
        RequestHead::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn test_route() {
        assert_eq!(route(&head("GET /239.1.1.1:5000 HTTP/1.1\r\n\r\n")).unwrap(), "239.1.1.1:5000");
        assert_eq!(route(&head("POST /239.1.1.1:5000 HTTP/1.1\r\n\r\n")).unwrap_err().0, 405);
        assert_eq!(route(&head("GET / HTTP/1.1\r\n\r\n")).unwrap_err().0, 404);
        assert_eq!(route(&head("GET /a/b HTTP/1.1\r\n\r\n")).unwrap_err().0, 404);
    }
}
