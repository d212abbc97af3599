//! Configuration module for mdsctl.
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! an optional JSON file, then command-line flags and their `MDSCTL_*`
//! environment variables (collected by the CLI into [`ConfigOverrides`]).

use crate::error::{CmdError, Result};
use crate::rpc::{DispatchMode, RpcCallSpec};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// RPC addresses of the MDS cluster.
    pub mds_addrs: Vec<String>,
    /// Per-call timeout, also used for dialing and status probes.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retries per address after the first attempt.
    pub retry_times: u32,
    /// Pause between retries.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Upper bound on concurrent subtree expansions during walks.
    pub max_concurrency: usize,
    /// Log retries and per-address failures at info level.
    pub show_diagnostics: bool,
    /// Log level (overridden by `RUST_LOG`).
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mds_addrs: vec!["127.0.0.1:6700".to_string()],
            timeout: Duration::from_secs(3),
            retry_times: 3,
            retry_delay: Duration::from_millis(100),
            max_concurrency: 16,
            show_diagnostics: false,
            log_level: "warn".to_string(),
            json_logs: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CmdError::internal(format!("failed to read config file {}: {}", path.display(), e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            CmdError::internal(format!("failed to parse config {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults, the file if given, then the overrides.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(addrs) = overrides.mds_addrs {
            self.mds_addrs = addrs;
        }
        if let Some(timeout) = overrides.timeout {
            self.timeout = timeout;
        }
        if let Some(retry_times) = overrides.retry_times {
            self.retry_times = retry_times;
        }
        if let Some(retry_delay) = overrides.retry_delay {
            self.retry_delay = retry_delay;
        }
        if let Some(max_concurrency) = overrides.max_concurrency {
            self.max_concurrency = max_concurrency;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
        self.show_diagnostics |= overrides.show_diagnostics;
        self.json_logs |= overrides.json_logs;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.mds_addrs.is_empty() {
            return Err(invalid("mds_addrs", "at least one address is required"));
        }
        if let Some(bad) = self.mds_addrs.iter().find(|a| !is_host_port(a)) {
            return Err(invalid("mds_addrs", &format!("'{}' is not host:port", bad)));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout", "must be non-zero"));
        }
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency", "must be at least 1"));
        }
        Ok(())
    }

    /// Call parameters for cluster-level calls against `mds_addrs`.
    pub fn call_spec(&self, method: &'static str) -> RpcCallSpec {
        RpcCallSpec::new(method, self.mds_addrs.clone())
            .with_timeout(self.timeout)
            .with_retries(self.retry_times, self.retry_delay)
            .with_diagnostics(self.show_diagnostics)
            .with_mode(DispatchMode::LeaderFirst)
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mds_addrs: Option<Vec<String>>,
    pub timeout: Option<Duration>,
    pub retry_times: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub max_concurrency: Option<usize>,
    pub log_level: Option<String>,
    pub show_diagnostics: bool,
    pub json_logs: bool,
}

fn invalid(field: &str, reason: &str) -> CmdError {
    CmdError::internal(format!("invalid config {}: {}", field, reason))
}

fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Serde helper for Duration using humantime format.
///
/// Accepts `"250ms"`, `"3s"`, `"1m"`, `"1h"`; a bare number is milliseconds.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse a duration string. Also used for command-line flags.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        const UNITS: [(&str, u64); 4] = [("ms", 1), ("s", 1_000), ("m", 60_000), ("h", 3_600_000)];

        let s = s.trim();
        let (digits, millis_per_unit) = UNITS
            .iter()
            .find_map(|(suffix, factor)| s.strip_suffix(suffix).map(|d| (d, *factor)))
            .unwrap_or((s, 1));

        let value = digits
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid duration '{}': {}", s, e))?;
        value
            .checked_mul(millis_per_unit)
            .map(Duration::from_millis)
            .ok_or_else(|| format!("duration '{}' overflows", s))
    }
}
