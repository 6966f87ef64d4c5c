//! Sender pinning for a multicast relay.
//!
//! Several senders may publish into the same group. The relay locks onto the
//! first source it sees and drops everyone else until that source has been
//! quiet for longer than the idle window, after which the next datagram's
//! source wins the lock.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

/// Default idle window after which a lock expires
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(3);

/// Which part of the sender address identifies a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockPolicy {
    /// IP and port must both match
    #[default]
    Address,
    /// Only the IP must match (senders that rotate source ports)
    Ip,
}

impl LockPolicy {
    fn same_source(&self, locked: &SocketAddr, candidate: &SocketAddr) -> bool {
        match self {
            LockPolicy::Address => locked == candidate,
            LockPolicy::Ip => locked.ip() == candidate.ip(),
        }
    }
}

impl FromStr for LockPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "address" | "addr" => Ok(LockPolicy::Address),
            "ip" => Ok(LockPolicy::Ip),
            other => Err(format!("unknown lock policy '{}' (expected address or ip)", other)),
        }
    }
}

impl fmt::Display for LockPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockPolicy::Address => write!(f, "address"),
            LockPolicy::Ip => write!(f, "ip"),
        }
    }
}

/// Result of offering a datagram to the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Lock was free or expired; this source now holds it
    Locked,
    /// Source matches the current lock
    Accepted,
    /// Another source holds an active lock
    Rejected,
}

#[derive(Debug, Clone, Copy)]
struct Lock {
    source: SocketAddr,
    last_seen: Instant,
}

/// Two-state lock: unlocked, or locked to one source with a last-seen time
#[derive(Debug, Clone)]
pub struct SourceLock {
    policy: LockPolicy,
    idle_window: Duration,
    lock: Option<Lock>,
}

impl SourceLock {
    pub fn new(policy: LockPolicy, idle_window: Duration) -> Self {
        Self {
            policy,
            idle_window,
            lock: None,
        }
    }

    /// Offer a datagram from `source` received at `now`.
    pub fn admit(&mut self, source: SocketAddr, now: Instant) -> Admission {
        match self.lock {
            Some(ref mut lock)
                if now.saturating_duration_since(lock.last_seen) <= self.idle_window =>
            {
                if self.policy.same_source(&lock.source, &source) {
                    lock.last_seen = now;
                    Admission::Accepted
                } else {
                    Admission::Rejected
                }
            }
            _ => {
                self.lock = Some(Lock {
                    source,
                    last_seen: now,
                });
                Admission::Locked
            }
        }
    }

    /// Drop the current lock so the next datagram re-arms it.
    pub fn reset(&mut self) {
        self.lock = None;
    }

    pub fn locked_source(&self) -> Option<SocketAddr> {
        self.lock.map(|l| l.source)
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn lock(policy: LockPolicy) -> SourceLock {
        SourceLock::new(policy, DEFAULT_IDLE_WINDOW)
    }

    #[test]
    fn test_first_datagram_locks() {
        let mut sl = lock(LockPolicy::Address);
        let t0 = Instant::now();
        assert_eq!(sl.admit(addr("10.0.0.1:4000"), t0), Admission::Locked);
        assert_eq!(sl.locked_source(), Some(addr("10.0.0.1:4000")));
    }

    #[test]
    fn test_same_source_within_window_accepted() {
        let mut sl = lock(LockPolicy::Address);
        let t0 = Instant::now();
        sl.admit(addr("10.0.0.1:4000"), t0);
        // Each gap is under the window, so the lock keeps refreshing
        for i in 1..10 {
            let t = t0 + Duration::from_millis(2900 * i);
            assert_eq!(sl.admit(addr("10.0.0.1:4000"), t), Admission::Accepted);
        }
    }

    #[test]
    fn test_other_source_rejected_while_locked() {
        let mut sl = lock(LockPolicy::Address);
        let t0 = Instant::now();
        sl.admit(addr("10.0.0.1:4000"), t0);
        let t1 = t0 + Duration::from_secs(1);
        assert_eq!(sl.admit(addr("10.0.0.2:4000"), t1), Admission::Rejected);
        assert_eq!(sl.locked_source(), Some(addr("10.0.0.1:4000")));
        // Rejection does not refresh the lock
        let t2 = t0 + Duration::from_millis(3100);
        assert_eq!(sl.admit(addr("10.0.0.2:4000"), t2), Admission::Locked);
    }

    #[test]
    fn test_lock_expires_after_idle_window() {
        let mut sl = lock(LockPolicy::Address);
        let t0 = Instant::now();
        sl.admit(addr("10.0.0.1:4000"), t0);
        let later = t0 + Duration::from_millis(3001);
        assert_eq!(sl.admit(addr("10.0.0.2:4000"), later), Admission::Locked);
        assert_eq!(sl.locked_source(), Some(addr("10.0.0.2:4000")));
        assert_eq!(
            sl.admit(addr("10.0.0.1:4000"), later + Duration::from_millis(10)),
            Admission::Rejected
        );
    }

    #[test]
    fn test_exactly_idle_window_still_locked() {
        let mut sl = lock(LockPolicy::Address);
        let t0 = Instant::now();
        sl.admit(addr("10.0.0.1:4000"), t0);
        let t1 = t0 + DEFAULT_IDLE_WINDOW;
        assert_eq!(sl.admit(addr("10.0.0.2:4000"), t1), Admission::Rejected);
    }

    #[test]
    fn test_reset_unlocks() {
        let mut sl = lock(LockPolicy::Address);
        let t0 = Instant::now();
        sl.admit(addr("10.0.0.1:4000"), t0);
        sl.reset();
        assert_eq!(sl.locked_source(), None);
        assert_eq!(sl.admit(addr("10.0.0.2:4000"), t0), Admission::Locked);
    }

    #[test]
    fn test_address_policy_distinguishes_ports() {
        let mut sl = lock(LockPolicy::Address);
        let t0 = Instant::now();
        sl.admit(addr("10.0.0.1:4000"), t0);
        assert_eq!(sl.admit(addr("10.0.0.1:4001"), t0), Admission::Rejected);
    }

    #[test]
    fn test_ip_policy_ignores_ports() {
        let mut sl = lock(LockPolicy::Ip);
        let t0 = Instant::now();
        sl.admit(addr("10.0.0.1:4000"), t0);
        assert_eq!(sl.admit(addr("10.0.0.1:4001"), t0), Admission::Accepted);
        assert_eq!(sl.admit(addr("10.0.0.9:4000"), t0), Admission::Rejected);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("IP".parse::<LockPolicy>().unwrap(), LockPolicy::Ip);
        assert_eq!("address".parse::<LockPolicy>().unwrap(), LockPolicy::Address);
        assert!("port".parse::<LockPolicy>().is_err());
    }
}
