//! Relay subscription and event download engine.
//!
//! Four layers, leaf first:
//! - [`RelayConnection`]: one WebSocket per relay multiplexing many logical
//!   subscriptions, reconciled against wire subscriptions on a fixed tick
//! - [`ConnectionPool`]: at most one connection per relay address
//! - [`KeyRelayTracker`]: one download task per relay for a single public key
//! - [`Downloader`]: one tracker per public key reported by a [`PublicKeySource`]

mod config;
mod connection;
mod directory;
mod domain;
mod downloader;
mod key_relays;
mod key_source;
mod message;
mod metrics;
mod pool;
mod ports;
mod pubsub;
mod reconcile;
mod relay_source;

#[cfg(test)]
mod test_support;

pub use config::{load_config, DownloaderConfig};
pub use connection::{ConnectionConfig, ConnectionError, RelayConnection};
pub use directory::{CachedDirectory, Directory, DirectoryError};
pub use domain::{
    ConnectionState, Event, EventError, EventKind, EventOrEndOfStoredEvents, PublicKey,
    PublicKeyError, RelayAddress, RelayAddressError,
};
pub use downloader::{Cancelled, Downloader, DownloaderState};
pub use key_relays::KeyRelayTracker;
pub use key_source::StaticPublicKeySource;
pub use metrics::PrometheusMetrics;
pub use pool::ConnectionPool;
pub use ports::{Metrics, PublicKeySource, ReceivedEventPublisher, RelaySource};
pub use pubsub::{ReceivedEvent, ReceivedEventPubSub};
pub use reconcile::{plan, Plan};
pub use relay_source::DefaultRelaySource;

pub const SERVICE_NAME: &str = "cs-downloader";
