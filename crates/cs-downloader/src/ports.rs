use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use crate::directory::DirectoryError;
use crate::domain::{ConnectionState, Event, PublicKey, RelayAddress};

/// The set of public keys whose events should be downloaded.
#[async_trait]
pub trait PublicKeySource: Send + Sync {
    async fn list(&self) -> Result<HashSet<PublicKey>>;
}

/// Where a given public key publishes. Order and duplicates are irrelevant.
#[async_trait]
pub trait RelaySource: Send + Sync {
    async fn get_relays(&self, public_key: PublicKey) -> Result<Vec<RelayAddress>>;
}

pub trait ReceivedEventPublisher: Send + Sync {
    fn publish(&self, relay: &RelayAddress, event: Event);
}

pub trait Metrics: Send + Sync {
    fn report_number_of_public_key_downloaders(&self, count: usize);
    fn report_number_of_public_key_downloader_relays(&self, public_key: &PublicKey, count: usize);
    /// Called once a public key downloader has stopped.
    fn remove_public_key_downloader(&self, public_key: &PublicKey);
    fn report_relay_connection_states(&self, states: &HashMap<RelayAddress, ConnectionState>);
    fn report_directory_lookup(&self, directory: &RelayAddress, result: Result<(), &DirectoryError>);
    fn report_received_event(&self);
}
