//! Multicast to HTTP relay
//!
//! A client asks for `GET /{group}:{port}` and the relay joins that UDP
//! multicast group and streams the datagram payloads back as the response
//! body until the client disconnects or the socket fails.
//!
//! Stream handling notes:
//! - Each request gets its own socket and group membership
//! - One sender is relayed at a time; the lock moves after 3s of silence
//! - Datagrams shaped like RTP-wrapped MPEG-TS lose their 12-byte RTP header
//! - No framing on the response: bytes are written as they arrive

pub mod access;
pub mod config;
pub mod error;
pub mod relay;
pub mod server;

pub use access::{AllowList, MatchPolicy};
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use relay::{LockPolicy, MulticastEndpoint};
pub use server::RelayServer;
