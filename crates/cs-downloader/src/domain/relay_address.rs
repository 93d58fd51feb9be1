use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const PROTOCOL_WS: &str = "ws://";
const PROTOCOL_WSS: &str = "wss://";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayAddressError {
    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("address contains only the protocol: {0}")]
    JustProtocol(String),
}

/// Validated `ws://` or `wss://` relay URL, used as the connection pool key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayAddress(String);

impl RelayAddress {
    pub fn new(value: impl Into<String>) -> Result<Self, RelayAddressError> {
        let value = value.into().trim().to_string();
        if !value.starts_with(PROTOCOL_WS) && !value.starts_with(PROTOCOL_WSS) {
            return Err(RelayAddressError::InvalidProtocol(value));
        }
        if value == PROTOCOL_WS || value == PROTOCOL_WSS {
            return Err(RelayAddressError::JustProtocol(value));
        }
        Ok(Self(value))
    }

    /// Drops a trailing slash so `wss://a/` and `wss://a` share a connection.
    pub fn normalize(&self) -> Result<Self, RelayAddressError> {
        Self::new(self.0.trim_end_matches('/'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RelayAddress {
    type Err = RelayAddressError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
