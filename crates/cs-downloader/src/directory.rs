use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::connection::{lock, ConnectionConfig, RelayConnection};
use crate::domain::{Event, EventKind, EventOrEndOfStoredEvents, PublicKey, RelayAddress};
use crate::ports::Metrics;

/// Upper bound for how long a directory query waits before its REQ goes out.
const DIRECTORY_MANAGE_SUBSCRIPTIONS_EVERY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("relay list not found in the directory")]
    NotFound,

    #[error("directory lookup failed: {0}")]
    Lookup(String),
}

enum LookupError {
    FoundNoEvents,
    Failed(String),
}

/// A relay that indexes relay lists and contact lists for many keys.
///
/// Uses a dedicated connection rather than the shared pool. Lookups for the
/// same directory run one at a time as directories throttle clients that
/// open many concurrent requests.
pub struct Directory {
    connection: Arc<RelayConnection>,
    lookup_timeout: Duration,
    lookups: tokio::sync::Mutex<()>,
    metrics: Arc<dyn Metrics>,
}

impl Directory {
    /// Starts dialing `address` right away; the connection runs until `token`
    /// is cancelled.
    pub fn new(
        address: RelayAddress,
        connection_config: &ConnectionConfig,
        lookup_timeout: Duration,
        metrics: Arc<dyn Metrics>,
        token: CancellationToken,
    ) -> Self {
        let config = ConnectionConfig {
            manage_subscriptions_every: connection_config
                .manage_subscriptions_every
                .min(DIRECTORY_MANAGE_SUBSCRIPTIONS_EVERY),
            ..connection_config.clone()
        };
        let connection = Arc::new(RelayConnection::new(address, config));
        tokio::spawn(Arc::clone(&connection).run(token));

        Self {
            connection,
            lookup_timeout,
            lookups: tokio::sync::Mutex::new(()),
            metrics,
        }
    }

    pub fn address(&self) -> &RelayAddress {
        self.connection.address()
    }

    pub async fn get_relays(&self, public_key: PublicKey) -> Result<Vec<RelayAddress>, DirectoryError> {
        let result = self.lookup(public_key).await;
        self.metrics
            .report_directory_lookup(self.address(), result.as_ref().map(|_| ()));
        result
    }

    async fn lookup(&self, public_key: PublicKey) -> Result<Vec<RelayAddress>, DirectoryError> {
        let _serialized = self.lookups.lock().await;

        let (relay_list, contacts) = tokio::join!(
            self.query(public_key, EventKind::RELAY_LIST_METADATA, relays_from_relay_list),
            self.query(public_key, EventKind::CONTACTS, relays_from_contacts),
        );

        let mut addresses = BTreeSet::new();
        let mut found_no_events = 0;
        for result in [relay_list, contacts] {
            match result {
                Ok(found) => addresses.extend(found),
                Err(LookupError::FoundNoEvents) => found_no_events += 1,
                Err(LookupError::Failed(message)) => return Err(DirectoryError::Lookup(message)),
            }
        }

        if found_no_events == 2 {
            return Err(DirectoryError::NotFound);
        }
        Ok(addresses.into_iter().collect())
    }

    /// Only the first value matters: an event, or EOSE meaning the directory
    /// has nothing for this key.
    async fn query(
        &self,
        public_key: PublicKey,
        kind: EventKind,
        extract: fn(&Event) -> Result<Vec<RelayAddress>, LookupError>,
    ) -> Result<Vec<RelayAddress>, LookupError> {
        let token = CancellationToken::new();
        let _cancel_on_return = token.clone().drop_guard();
        let mut events = self.connection.subscribe(token, public_key, &[kind], None);

        match timeout(self.lookup_timeout, events.recv()).await {
            Err(_) => Err(LookupError::Failed(format!(
                "timeout waiting for events of kind {kind}"
            ))),
            Ok(None) => Err(LookupError::Failed("subscription closed".to_string())),
            Ok(Some(EventOrEndOfStoredEvents::EndOfStoredEvents)) => Err(LookupError::FoundNoEvents),
            Ok(Some(EventOrEndOfStoredEvents::Event(event))) => {
                if event.kind() != kind {
                    return Err(LookupError::Failed(format!(
                        "unexpected event kind {}",
                        event.kind()
                    )));
                }
                extract(&event)
            }
        }
    }
}

fn relays_from_relay_list(event: &Event) -> Result<Vec<RelayAddress>, LookupError> {
    event
        .tag_values("r")
        .into_iter()
        .map(|value| {
            RelayAddress::new(value).map_err(|err| {
                LookupError::Failed(format!("error creating a relay address: {err}"))
            })
        })
        .collect()
}

/// Older clients keep relays as the keys of the contact list's JSON content.
fn relays_from_contacts(event: &Event) -> Result<Vec<RelayAddress>, LookupError> {
    let content: serde_json::Map<String, serde_json::Value> =
        match serde_json::from_str(event.content()) {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!(
                    error = %err,
                    content = event.content(),
                    "error extracting relays from contacts event"
                );
                return Err(LookupError::FoundNoEvents);
            }
        };

    let mut addresses = BTreeSet::new();
    for key in content.keys() {
        match RelayAddress::new(key.as_str()) {
            Ok(address) => {
                addresses.insert(address);
            }
            Err(err) => tracing::debug!(address = %key, error = %err, "error creating an address"),
        }
    }
    Ok(addresses.into_iter().collect())
}

struct CacheEntry {
    fetched_at: Instant,
    addresses: Vec<RelayAddress>,
}

/// Caches directory answers per key. A key the directory knows nothing about
/// is cached as an empty list.
pub struct CachedDirectory {
    directory: Directory,
    refresh_after: Duration,
    cache: Mutex<HashMap<PublicKey, CacheEntry>>,
}

impl CachedDirectory {
    pub fn new(directory: Directory, refresh_after: Duration) -> Self {
        Self {
            directory,
            refresh_after,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn address(&self) -> &RelayAddress {
        self.directory.address()
    }

    pub async fn get_relays(&self, public_key: PublicKey) -> Result<Vec<RelayAddress>, DirectoryError> {
        if let Some(entry) = lock(&self.cache).get(&public_key) {
            if entry.fetched_at.elapsed() < self.refresh_after {
                return Ok(entry.addresses.clone());
            }
        }

        let addresses = match self.directory.get_relays(public_key).await {
            Ok(addresses) => addresses,
            Err(DirectoryError::NotFound) => {
                tracing::debug!(
                    directory = %self.address(),
                    public_key = %public_key,
                    "relay list not found in the directory"
                );
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        lock(&self.cache).insert(
            public_key,
            CacheEntry {
                fetched_at: Instant::now(),
                addresses: addresses.clone(),
            },
        );
        Ok(addresses)
    }
}
