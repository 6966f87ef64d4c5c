//! Multicast relay worker.
//! Joins a group, pins one sender, and streams its datagrams to a client.

pub mod address;
pub mod lifecycle;
pub mod payload;
pub mod session;
pub mod source_lock;
pub mod stream;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod pktinfo;

pub use address::{resolve, resolve_segment, MulticastEndpoint};
pub use lifecycle::{watch_client, CancelSignal};
pub use payload::strip_rtp_header;
pub use session::{
    Datagram, DatagramSource, MulticastOpener, MulticastSession, ReadOutcome, SessionOpener,
    SessionOptions,
};
pub use source_lock::{Admission, LockPolicy, SourceLock};
pub use stream::{RelayExit, RelayLoop, RelayReport, RelaySettings, RelayStats};
