//! Relay configuration.
//!
//! Defaults, optionally overlaid by a JSON file, then by environment
//! variables. `ALLOWED_IPS` keeps the comma-separated format of the
//! original deployment scripts.

use std::fmt::Display;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::access::{AllowList, MatchPolicy};
use crate::error::{RelayError, Result};
use crate::relay::session::MAX_DATAGRAM_SIZE;
use crate::relay::source_lock::LockPolicy;

// Default configuration values
const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 3000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 3000;

/// Environment variable holding the config file path
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG";

/// Process-wide relay settings, read-only once the server starts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// HTTP listen address
    pub listen: SocketAddr,
    /// Permitted client IPs (empty = everyone)
    pub allowed_ips: Vec<String>,
    /// How `allowed_ips` entries are compared
    pub match_policy: MatchPolicy,
    /// How the source lock compares senders
    pub lock_policy: LockPolicy,
    /// Idle time after which the source lock is released
    pub source_timeout_ms: u64,
    /// Bound on each UDP read
    pub read_timeout_ms: u64,
    /// Receive buffer per datagram
    pub max_datagram_size: usize,
    /// IPv4 interface for group joins (None = system default)
    pub interface: Option<Ipv4Addr>,
    /// Allow several relays on the same group:port
    pub reuse_address: bool,
    /// Take the client IP from X-Forwarded-For / X-Real-IP
    pub trust_forwarded: bool,
    /// Strip RTP headers from TS-sized datagrams
    pub strip_rtp: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            allowed_ips: Vec::new(),
            match_policy: MatchPolicy::default(),
            lock_policy: LockPolicy::default(),
            source_timeout_ms: DEFAULT_SOURCE_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            interface: None,
            reuse_address: false,
            trust_forwarded: false,
            strip_rtp: true,
        }
    }
}

impl RelayConfig {
    /// Defaults, then the optional JSON file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| RelayError::Config(format!("invalid config file: {}", e)))
    }

    /// Overlay environment variables fetched through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(csv) = lookup("ALLOWED_IPS") {
            let list = AllowList::from_csv(&csv, self.match_policy);
            // Unset or empty allows everyone; a value with no usable entry is a typo
            if !csv.is_empty() && list.is_empty() {
                return Err(RelayError::Config(format!(
                    "ALLOWED_IPS '{}' contains no addresses",
                    csv
                )));
            }
            self.allowed_ips = list.entries().to_vec();
        }
        if let Some(v) = parse_env(&lookup, "RELAY_LISTEN")? {
            self.listen = v;
        }
        if let Some(v) = parse_env(&lookup, "RELAY_MATCH_POLICY")? {
            self.match_policy = v;
        }
        if let Some(v) = parse_env(&lookup, "RELAY_LOCK_POLICY")? {
            self.lock_policy = v;
        }
        if let Some(v) = parse_env(&lookup, "RELAY_SOURCE_TIMEOUT_MS")? {
            self.source_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "RELAY_READ_TIMEOUT_MS")? {
            self.read_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "RELAY_MAX_DATAGRAM")? {
            self.max_datagram_size = v;
        }
        if let Some(v) = lookup("RELAY_INTERFACE") {
            self.interface = if v.trim().is_empty() {
                None
            } else {
                Some(parse_value("RELAY_INTERFACE", &v)?)
            };
        }
        if let Some(v) = parse_env_bool(&lookup, "RELAY_REUSE_ADDRESS")? {
            self.reuse_address = v;
        }
        if let Some(v) = parse_env_bool(&lookup, "RELAY_TRUST_FORWARDED")? {
            self.trust_forwarded = v;
        }
        if let Some(v) = parse_env_bool(&lookup, "RELAY_STRIP_RTP")? {
            self.strip_rtp = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_timeout_ms == 0 {
            return Err(RelayError::Config(
                "read_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.source_timeout_ms == 0 {
            return Err(RelayError::Config(
                "source_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !self.allowed_ips.is_empty() && self.allow_list().is_empty() {
            return Err(RelayError::Config(
                "allowed_ips contains only blank entries".to_string(),
            ));
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > 65_535 {
            return Err(RelayError::Config(format!(
                "max_datagram_size {} out of range (1-65535)",
                self.max_datagram_size
            )));
        }
        Ok(())
    }

    pub fn allow_list(&self) -> AllowList {
        AllowList::new(&self.allowed_ips, self.match_policy)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RelayError::Config(format!("invalid {} '{}': {}", key, value, e)))
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| parse_value(key, &v)).transpose()
}

fn parse_env_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(RelayError::Config(format!(
            "invalid {} '{}': expected true or false",
            key, value
        ))),
    }
}
