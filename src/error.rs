//! Error types for the dnsgate proxy.

use std::io;
use std::net::IpAddr;

use thiserror::Error;

/// Main error type for dnsgate operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("DNS wire format error: {0}")]
    Wire(#[from] WireError),

    #[error("decision error: {0}")]
    Decision(#[from] DecisionError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Coarse classification of failures, used for process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad arguments or unparsable input.
    InvalidInput,
    /// Unrecoverable I/O setup failure.
    Aborted,
    /// A required resource (such as the config file) is missing.
    NotFound,
    /// Wire data or config content violates the data model.
    DataMalformed,
}

impl ErrorKind {
    /// Numeric code, stable across releases.
    pub const fn code(self) -> u8 {
        match self {
            Self::InvalidInput => 1,
            Self::Aborted => 2,
            Self::NotFound => 3,
            Self::DataMalformed => 4,
        }
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(ConfigError::ReadFile(err)) if err.kind() == io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            Self::Config(ConfigError::ReadFile(_)) => ErrorKind::Aborted,
            Self::Config(ConfigError::Parse(_) | ConfigError::ParseJson(_)) => {
                ErrorKind::InvalidInput
            }
            Self::Config(ConfigError::Validation(_)) => ErrorKind::DataMalformed,
            Self::Wire(_) | Self::Decision(_) => ErrorKind::DataMalformed,
            Self::Network(_) | Self::Io(_) | Self::Metrics(_) => ErrorKind::Aborted,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("failed to parse JSON config: {0}")]
    ParseJson(#[source] serde_json::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid {field} {value:?}: expected an IPv4 or IPv6 address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than 0")]
    ZeroPort { field: &'static str },

    #[error("{field} must be greater than 0")]
    ZeroTimeout { field: &'static str },

    #[error("filter #{index} has an empty host")]
    EmptyHost { index: usize },

    #[error("filter #{index} has unknown type {value:?} (expected A, AAAA or ALL)")]
    UnknownFilterType { index: usize, value: String },

    #[error("filter #{index} has unknown matching {value:?} (expected exact or contains)")]
    UnknownMatchType { index: usize, value: String },

    #[error("filter #{index} has unknown action {value:?} (expected discard, refuse or redirect)")]
    UnknownAction { index: usize, value: String },

    #[error("filter #{index} uses the redirect action but redirect_addr is not provided")]
    MissingRedirectAddress { index: usize },

    #[error("filter #{index} has invalid redirect_addr {value:?}")]
    InvalidRedirectAddress { index: usize, value: String },
}

/// Network-related errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to upstream {addr}: {source}")]
    Connect {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("upstream did not answer within {0:?}")]
    UpstreamTimeout(std::time::Duration),
}

/// DNS wire format violations, raised while decoding or encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated: needed {needed} bytes at offset {offset}, {remaining} left")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("empty name at offset {offset}")]
    EmptyName { offset: usize },

    #[error("empty label in name {name:?}")]
    EmptyLabel { name: String },

    #[error("invalid byte 0x{byte:02x} in name at offset {offset}")]
    InvalidCharacter { offset: usize, byte: u8 },

    #[error("label of {len} bytes exceeds the 63 byte limit")]
    LabelTooLong { len: usize },

    #[error("name of {len} encoded bytes exceeds the 255 byte limit")]
    NameTooLong { len: usize },

    #[error("compression pointer not allowed in question name at offset {offset}")]
    UnexpectedPointer { offset: usize },

    #[error("compression pointer offset {0} does not fit in 14 bits")]
    PointerOutOfRange(usize),

    #[error("record data of {0} bytes does not fit in a 16-bit length")]
    RdataTooLong(usize),

    #[error("encoded message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge { len: usize, max: usize },
}

/// Errors raised by the decision engine for a single query.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecisionError {
    #[error("redirect address {address} cannot answer a query of type {qtype}")]
    AddressFamilyMismatch { qtype: u16, address: IpAddr },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("synthesized response does not encode: {0}")]
    Encode(#[source] WireError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
