//! Configuration loading and validation.
//!
//! The file is deserialized into raw string-typed structs first, then
//! validated into [`Config`]. Nothing downstream ever sees an unvalidated
//! value: a redirect rule without a usable address cannot be represented.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::dns::filter::{Action, FilterRule, FilterType, MatchType};
use crate::error::{ConfigError, Result, ValidationError};

/// Validated configuration for the dnsgate proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the client-facing socket binds to.
    pub listen: SocketAddr,

    /// Upstream resolver receiving unfiltered queries.
    pub upstream: SocketAddr,

    /// Bound on the wait for an upstream reply. `None` waits forever.
    pub upstream_timeout: Option<Duration>,

    /// Bound on each wait for the listening socket to become readable.
    pub read_timeout: Duration,

    /// Filter rules, in evaluation order.
    pub filters: Vec<FilterRule>,

    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,
}

/// Metrics exporter settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Start the Prometheus HTTP listener.
    #[serde(default)]
    pub enabled: bool,

    /// Address the `/metrics` endpoint listens on.
    #[serde(
        default = "default_metrics_listen",
        deserialize_with = "deserialize_socket_addr"
    )]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    address: String,
    port: u16,
    forwarder: RawForwarder,
    #[serde(default = "default_read_timeout_ms")]
    read_timeout_ms: u64,
    #[serde(default)]
    filters: Vec<RawFilter>,
    #[serde(default)]
    metrics: MetricsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawForwarder {
    address: String,
    port: u16,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFilter {
    host: String,
    #[serde(rename = "type")]
    filter_type: String,
    matching: String,
    action: String,
    #[serde(default)]
    redirect_addr: Option<String>,
}

const fn default_read_timeout_ms() -> u64 {
    20
}

const fn default_metrics_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9153)
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Files with a `.json` extension are read as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::parse_json(&content)
        } else {
            Self::parse(&content)
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        Ok(raw.validate().map_err(ConfigError::Validation)?)
    }

    /// Parse configuration from a JSON string.
    pub fn parse_json(content: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(content).map_err(ConfigError::ParseJson)?;
        Ok(raw.validate().map_err(ConfigError::Validation)?)
    }
}

impl RawConfig {
    fn validate(self) -> std::result::Result<Config, ValidationError> {
        let listen = socket_addr("address", &self.address, "port", self.port)?;
        let upstream = socket_addr(
            "forwarder.address",
            &self.forwarder.address,
            "forwarder.port",
            self.forwarder.port,
        )?;
        let upstream_timeout = self
            .forwarder
            .timeout_ms
            .map(|ms| non_zero_millis("forwarder.timeout_ms", ms))
            .transpose()?;
        let read_timeout = non_zero_millis("read_timeout_ms", self.read_timeout_ms)?;

        let filters = self
            .filters
            .into_iter()
            .enumerate()
            .map(|(index, filter)| filter.validate(index))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Config {
            listen,
            upstream,
            upstream_timeout,
            read_timeout,
            filters,
            metrics: self.metrics,
        })
    }
}

impl RawFilter {
    fn validate(self, index: usize) -> std::result::Result<FilterRule, ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::EmptyHost { index });
        }

        let filter_type = FilterType::from_str(&self.filter_type).map_err(|err| {
            ValidationError::UnknownFilterType {
                index,
                value: err.0,
            }
        })?;
        let match_type =
            MatchType::from_str(&self.matching).map_err(|err| ValidationError::UnknownMatchType {
                index,
                value: err.0,
            })?;

        // redirect_addr on a non-redirect rule is ignored
        let action = if self.action.eq_ignore_ascii_case("discard") {
            Action::NotFound
        } else if self.action.eq_ignore_ascii_case("refuse") {
            Action::Refuse
        } else if self.action.eq_ignore_ascii_case("redirect") {
            let value = self
                .redirect_addr
                .ok_or(ValidationError::MissingRedirectAddress { index })?;
            match value.trim().parse::<IpAddr>() {
                Ok(address) => Action::Redirect(address),
                Err(_) => return Err(ValidationError::InvalidRedirectAddress { index, value }),
            }
        } else {
            return Err(ValidationError::UnknownAction {
                index,
                value: self.action,
            });
        };

        Ok(FilterRule::new(self.host.trim(), filter_type, match_type, action))
    }
}

fn socket_addr(
    address_field: &'static str,
    address: &str,
    port_field: &'static str,
    port: u16,
) -> std::result::Result<SocketAddr, ValidationError> {
    let ip = address
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| ValidationError::InvalidAddress {
            field: address_field,
            value: address.to_string(),
        })?;
    if port == 0 {
        return Err(ValidationError::ZeroPort { field: port_field });
    }
    Ok(SocketAddr::new(ip, port))
}

fn non_zero_millis(field: &'static str, ms: u64) -> std::result::Result<Duration, ValidationError> {
    if ms == 0 {
        return Err(ValidationError::ZeroTimeout { field });
    }
    Ok(Duration::from_millis(ms))
}
