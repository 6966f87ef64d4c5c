//! Per-request relay loop.
//!
//! Reads one datagram at a time from the session, filters it by destination
//! and source, strips an RTP header when the length says so, and writes it
//! straight to the client. There is no buffering beyond the single datagram,
//! so a slow client stalls the next read and the kernel drops the overflow.

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use super::address::MulticastEndpoint;
use super::lifecycle::CancelSignal;
use super::payload::strip_rtp_header;
use super::session::{DatagramSource, ReadOutcome, MAX_DATAGRAM_SIZE};
use super::source_lock::{Admission, LockPolicy, SourceLock, DEFAULT_IDLE_WINDOW};
use crate::config::RelayConfig;

/// Default bound on a single UDP read, also the worst-case cancel latency
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Tunables for one relay loop
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub read_timeout: Duration,
    pub source_timeout: Duration,
    pub lock_policy: LockPolicy,
    pub max_datagram: usize,
    pub strip_rtp: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            source_timeout: DEFAULT_IDLE_WINDOW,
            lock_policy: LockPolicy::default(),
            max_datagram: MAX_DATAGRAM_SIZE,
            strip_rtp: true,
        }
    }
}

impl From<&RelayConfig> for RelaySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            source_timeout: config.source_timeout(),
            lock_policy: config.lock_policy,
            max_datagram: config.max_datagram_size,
            strip_rtp: config.strip_rtp,
        }
    }
}

/// Why the loop stopped
#[derive(Debug)]
pub enum RelayExit {
    /// Client went away (lifecycle signal)
    Cancelled,
    /// Socket read failed with something other than a timeout
    ReadFailed(io::Error),
    /// Client write failed
    WriteFailed(io::Error),
}

/// Counters for one relay, logged when it ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub datagrams_forwarded: u64,
    pub bytes_forwarded: u64,
    pub dropped_destination: u64,
    pub dropped_source: u64,
    pub timeouts: u64,
}

#[derive(Debug)]
pub struct RelayReport {
    pub exit: RelayExit,
    pub stats: RelayStats,
}

/// Relay worker for one client
pub struct RelayLoop<S> {
    source: S,
    endpoint: MulticastEndpoint,
    settings: RelaySettings,
    cancel: CancelSignal,
    lock: SourceLock,
    stats: RelayStats,
}

impl<S: DatagramSource> RelayLoop<S> {
    pub fn new(
        source: S,
        endpoint: MulticastEndpoint,
        settings: RelaySettings,
        cancel: CancelSignal,
    ) -> Self {
        let lock = SourceLock::new(settings.lock_policy, settings.source_timeout);
        Self {
            source,
            endpoint,
            settings,
            cancel,
            lock,
            stats: RelayStats::default(),
        }
    }

    /// Run until cancelled or a read/write fails. The source is dropped
    /// (and with it the multicast membership) before this returns.
    pub async fn run<W>(self, mut writer: W) -> RelayReport
    where
        W: AsyncWrite + Unpin,
    {
        let Self {
            mut source,
            endpoint,
            settings,
            cancel,
            mut lock,
            mut stats,
        } = self;

        let filter_destination = source.has_metadata();
        let mut buf = vec![0u8; settings.max_datagram];

        let exit = loop {
            if cancel.is_cancelled() {
                break RelayExit::Cancelled;
            }

            let datagram = match source.recv(&mut buf, settings.read_timeout).await {
                Ok(ReadOutcome::Datagram(d)) => d,
                Ok(ReadOutcome::Timeout) => {
                    // Silent source: accept whoever speaks next
                    debug!("no data from {} for {:?}", endpoint, settings.read_timeout);
                    stats.timeouts += 1;
                    lock.reset();
                    continue;
                }
                Err(e) => {
                    warn!("stream reader failed: {}", e);
                    break RelayExit::ReadFailed(e);
                }
            };

            if filter_destination && !destination_matches(datagram.destination, endpoint.group) {
                stats.dropped_destination += 1;
                continue;
            }

            match lock.admit(datagram.source, Instant::now()) {
                Admission::Locked => info!("locked to source {}", datagram.source),
                Admission::Accepted => {}
                Admission::Rejected => {
                    stats.dropped_source += 1;
                    continue;
                }
            }

            let len = datagram.len.min(buf.len());
            let payload = if settings.strip_rtp {
                strip_rtp_header(&buf[..len])
            } else {
                &buf[..len]
            };
            let chunk = Bytes::copy_from_slice(payload);

            if let Err(e) = write_chunk(&mut writer, &chunk).await {
                if !cancel.is_cancelled() {
                    warn!("stream writer failed: {}", e);
                }
                break RelayExit::WriteFailed(e);
            }

            stats.datagrams_forwarded += 1;
            stats.bytes_forwarded += chunk.len() as u64;
        };

        drop(source);
        RelayReport { exit, stats }
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(writer: &mut W, chunk: &Bytes) -> io::Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }
    writer.write_all(chunk).await?;
    writer.flush().await
}

/// A datagram is kept when the platform did not report a destination, or
/// when the reported destination is the joined group.
fn destination_matches(destination: Option<IpAddr>, group: IpAddr) -> bool {
    match destination {
        Some(dst) => dst.to_canonical() == group.to_canonical(),
        None => true,
    }
}
