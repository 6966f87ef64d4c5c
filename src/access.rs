//! Client IP allow-list.
//!
//! The list is built once at startup and only read afterwards, so it is
//! shared between connection tasks behind an `Arc` without locking.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::Deserialize;

/// How a client IP is compared against allow-list entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Entry is a textual prefix of the client IP ("10.1." allows 10.1.x.x)
    #[default]
    Prefix,
    /// Entry must equal the client IP
    Exact,
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prefix" => Ok(MatchPolicy::Prefix),
            "exact" => Ok(MatchPolicy::Exact),
            other => Err(format!("unknown match policy '{}' (expected prefix or exact)", other)),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::Prefix => write!(f, "prefix"),
            MatchPolicy::Exact => write!(f, "exact"),
        }
    }
}

/// Set of permitted client IPs. Empty means everyone is allowed.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: Vec<String>,
    policy: MatchPolicy,
}

impl AllowList {
    /// Build from individual entries. Blank entries are dropped: under prefix
    /// matching an empty string would match every client.
    pub fn new<I, S>(entries: I, policy: MatchPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|e| e.as_ref().trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        Self { entries, policy }
    }

    /// Build from a comma-separated list such as `ALLOWED_IPS`.
    pub fn from_csv(csv: &str, policy: MatchPolicy) -> Self {
        Self::new(csv.split(','), policy)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Check whether a client may open a relay.
    pub fn is_allowed(&self, client: &IpAddr) -> bool {
        if self.entries.is_empty() {
            return true;
        }

        let client = client.to_canonical().to_string();
        self.entries.iter().any(|entry| match self.policy {
            MatchPolicy::Prefix => client.starts_with(entry.as_str()),
            MatchPolicy::Exact => client == *entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_list_allows_all() {
        let list = AllowList::from_csv("", MatchPolicy::Prefix);
        assert!(list.is_empty());
        assert!(list.is_allowed(&ip("8.8.8.8")));
        assert!(list.is_allowed(&ip("::1")));
    }

    #[test]
    fn test_prefix_match() {
        let list = AllowList::from_csv("10.1.,192.168.0.5", MatchPolicy::Prefix);
        assert_eq!(list.len(), 2);
        assert!(list.is_allowed(&ip("10.1.2.3")));
        assert!(list.is_allowed(&ip("192.168.0.50"))); // textual prefix
        assert!(!list.is_allowed(&ip("10.2.0.1")));
    }

    #[test]
    fn test_exact_match() {
        let list = AllowList::from_csv("10.1.,192.168.0.5", MatchPolicy::Exact);
        assert!(list.is_allowed(&ip("192.168.0.5")));
        assert!(!list.is_allowed(&ip("192.168.0.50")));
        assert!(!list.is_allowed(&ip("10.1.2.3")));
    }

    #[test]
    fn test_blank_entries_ignored() {
        // A trailing comma must not turn into an allow-everything prefix
        let list = AllowList::from_csv("10.0.0.1, ,", MatchPolicy::Prefix);
        assert_eq!(list.entries(), &["10.0.0.1".to_string()]);
        assert!(!list.is_allowed(&ip("172.16.0.1")));
    }

    #[test]
    fn test_mapped_ipv6_client() {
        let list = AllowList::from_csv("127.0.0.1", MatchPolicy::Exact);
        assert!(list.is_allowed(&ip("::ffff:127.0.0.1")));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("Prefix".parse::<MatchPolicy>().unwrap(), MatchPolicy::Prefix);
        assert_eq!("exact".parse::<MatchPolicy>().unwrap(), MatchPolicy::Exact);
        assert!("fuzzy".parse::<MatchPolicy>().is_err());
    }
}
