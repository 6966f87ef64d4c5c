//! RTP header stripping for MPEG-TS over RTP.
//!
//! This is a length heuristic, not an RTP parser. A datagram whose length is
//! 12 more than a whole number of 188-byte TS packets is assumed to carry a
//! fixed 12-byte RTP header (no CSRCs, no extension), which is removed.
//! Plain UDP TS passes through untouched. A non-RTP payload that happens to
//! have such a length will lose its first 12 bytes.

/// MPEG transport stream packet size
pub const TS_PACKET_SIZE: usize = 188;

/// Fixed RTP header size (RFC 3550, no CSRC list)
pub const RTP_HEADER_SIZE: usize = 12;

/// True if a datagram of `len` bytes looks like RTP-wrapped MPEG-TS.
pub fn looks_like_rtp_ts(len: usize) -> bool {
    len % TS_PACKET_SIZE == RTP_HEADER_SIZE
}

/// Remove the assumed RTP header, or return the payload unchanged.
pub fn strip_rtp_header(data: &[u8]) -> &[u8] {
    if looks_like_rtp_ts(data.len()) {
        &data[RTP_HEADER_SIZE..]
    } else {
        data
    }
}
