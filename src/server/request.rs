//! Minimal HTTP/1.x request head handling.
//!
//! The relay takes over the raw connection for streaming, so it reads the
//! request head itself instead of going through a full HTTP stack.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{RelayError, Result};

/// Largest request head accepted
pub const MAX_HEAD_SIZE: usize = 8 * 1024;

/// Status line sent before the relayed stream. No headers, no framing:
/// the body runs until the connection closes.
pub const PREAMBLE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// Parsed request line and headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Request target without the query string
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse everything up to (and including) the blank line.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| RelayError::BadRequest("request head is not UTF-8".to_string()))?;
        let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));

        let request_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| RelayError::BadRequest("empty request".to_string()))?;

        let mut parts = request_line.split_whitespace();
        let fields = (parts.next(), parts.next(), parts.next(), parts.next());
        let (method, target, version) = match fields {
            (Some(m), Some(t), Some(v), None) => (m, t, v),
            _ => {
                return Err(RelayError::BadRequest(format!(
                    "malformed request line '{}'",
                    request_line
                )))
            }
        };

        if !version.starts_with("HTTP/1.") {
            return Err(RelayError::BadRequest(format!("unsupported version '{}'", version)));
        }

        let path = match target.find('?') {
            Some(pos) => &target[..pos],
            None => target,
        };

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| RelayError::BadRequest(format!("malformed header '{}'", line)))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// First header with `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Client address for access control. Forwarding headers are only
    /// honoured when the relay sits behind a trusted proxy.
    pub fn client_ip(&self, peer: SocketAddr, trust_forwarded: bool) -> IpAddr {
        if trust_forwarded {
            let forwarded = self
                .header("X-Forwarded-For")
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse::<IpAddr>().ok());
            if let Some(ip) = forwarded {
                return ip.to_canonical();
            }
            let real_ip = self
                .header("X-Real-IP")
                .and_then(|v| v.trim().parse::<IpAddr>().ok());
            if let Some(ip) = real_ip {
                return ip.to_canonical();
            }
        }
        peer.ip().to_canonical()
    }
}

/// Find the end of HTTP headers (position after \r\n\r\n or \n\n)
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    let crlf = data.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    let lf = data.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Read from `reader` until a complete request head is buffered.
/// Bytes after the head are discarded; relay requests carry no body.
pub async fn read_request_head<R>(reader: &mut R) -> Result<RequestHead>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(RelayError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed before request head",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_header_end(&buf) {
            return RequestHead::parse(&buf[..end]);
        }
        if buf.len() >= MAX_HEAD_SIZE {
            return Err(RelayError::BadRequest("request head too large".to_string()));
        }
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

/// Complete plain-text response for refusals and errors.
pub fn text_response(status: u16, body: &str) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n",
        status,
        reason_phrase(status),
        body.len()
    );
    if status == 405 {
        response.push_str("Allow: GET\r\n");
    }
    response.push_str("\r\n");
    response.push_str(body);
    response.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\n"), Some(18));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\n\nrest"), Some(16));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\nHost: x\r\n"), None);
    }

    #[test]
    fn test_parse_request() {
        let head = RequestHead::parse(
            b"GET /239.1.1.1:5000?x=1 HTTP/1.1\r\nHost: relay\r\nX-Real-IP: 10.0.0.9\r\n\r\n",
        )
        .unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/239.1.1.1:5000");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.header("host"), Some("relay"));
        assert_eq!(head.header("x-real-ip"), Some("10.0.0.9"));
        assert_eq!(head.header("missing"), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RequestHead::parse(b"\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET /\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET / SPDY/3\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET / HTTP/1.1\r\nbroken header\r\n\r\n").is_err());
    }

    #[test]
    fn test_client_ip() {
        let head = RequestHead::parse(
            b"GET / HTTP/1.1\r\n\
              X-Forwarded-For: 10.1.1.1, 172.16.0.1\r\n\
              X-Real-IP: 10.2.2.2\r\n\r\n",
        )
        .unwrap();
        let peer: SocketAddr = "[::ffff:192.168.0.4]:5555".parse().unwrap();
        assert_eq!(head.client_ip(peer, false).to_string(), "192.168.0.4");
        assert_eq!(head.client_ip(peer, true).to_string(), "10.1.1.1");

        let head = RequestHead::parse(b"GET / HTTP/1.1\r\nX-Real-IP: 10.2.2.2\r\n\r\n").unwrap();
        assert_eq!(head.client_ip(peer, true).to_string(), "10.2.2.2");
    }

    #[test]
    fn test_text_response() {
        let r = String::from_utf8(text_response(403, "Forbidden source IP")).unwrap();
        assert!(r.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(r.contains("Content-Length: 19\r\n"));
        assert!(r.ends_with("\r\n\r\nForbidden source IP"));
    }

    #[tokio::test]
    async fn test_read_head_in_pieces() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"GET /239.1.1.1:5000 HT").await.unwrap();
            client.write_all(b"TP/1.1\r\nHost: a\r\n\r\n").await.unwrap();
            client
        });
        let head = read_request_head(&mut server).await.unwrap();
        assert_eq!(head.path, "/239.1.1.1:5000");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_head_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let err = read_request_head(&mut server).await.unwrap_err();
        assert!(matches!(err, RelayError::Io(_)));
    }
}
