mod event;
mod public_key;
mod relay_address;

pub use event::{Event, EventError, EventKind, EventOrEndOfStoredEvents};
pub use public_key::{PublicKey, PublicKeyError};
pub use relay_address::{RelayAddress, RelayAddressError};

/// State of a single relay connection as seen by its own run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Initializing,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 3] = [
        ConnectionState::Initializing,
        ConnectionState::Connected,
        ConnectionState::Disconnected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
