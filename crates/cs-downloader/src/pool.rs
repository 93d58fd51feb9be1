use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connection::{lock, ConnectionConfig, RelayConnection};
use crate::domain::{ConnectionState, EventKind, EventOrEndOfStoredEvents, PublicKey, RelayAddress};
use crate::ports::Metrics;

/// Keeps at most one [`RelayConnection`] per relay address.
///
/// Connections are created on first use and run under the pool's token for
/// the rest of the pool's life. Idle connections are not evicted.
pub struct ConnectionPool {
    config: ConnectionConfig,
    token: CancellationToken,
    connections: Mutex<HashMap<RelayAddress, Arc<RelayConnection>>>,
}

impl ConnectionPool {
    pub fn new(config: ConnectionConfig, token: CancellationToken) -> Self {
        Self {
            config,
            token,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to events authored by `public_key` on `relay`, dialing the
    /// relay first if nobody has asked for it yet.
    pub fn get_events(
        &self,
        token: CancellationToken,
        public_key: PublicKey,
        relay: &RelayAddress,
        kinds: &[EventKind],
        max_age: Option<Duration>,
    ) -> mpsc::Receiver<EventOrEndOfStoredEvents> {
        self.get_connection(relay)
            .subscribe(token, public_key, kinds, max_age)
    }

    fn get_connection(&self, relay: &RelayAddress) -> Arc<RelayConnection> {
        let (connection, created) = {
            let mut connections = lock(&self.connections);
            match connections.get(relay) {
                Some(connection) => (Arc::clone(connection), false),
                None => {
                    let connection = Arc::new(RelayConnection::new(
                        relay.clone(),
                        self.config.clone(),
                    ));
                    connections.insert(relay.clone(), Arc::clone(&connection));
                    (connection, true)
                }
            }
        };

        if created {
            tracing::debug!(relay = %relay, "creating a relay connection");
            tokio::spawn(Arc::clone(&connection).run(self.token.child_token()));
        }
        connection
    }

    pub fn states(&self) -> HashMap<RelayAddress, ConnectionState> {
        lock(&self.connections)
            .iter()
            .map(|(relay, connection)| (relay.clone(), connection.state()))
            .collect()
    }

    pub fn relays(&self) -> Vec<RelayAddress> {
        let mut relays: Vec<RelayAddress> = lock(&self.connections).keys().cloned().collect();
        relays.sort();
        relays
    }

    pub fn connection(&self, relay: &RelayAddress) -> Option<Arc<RelayConnection>> {
        lock(&self.connections).get(relay).cloned()
    }

    /// Reports connection states every `every` until `token` is cancelled.
    pub async fn report_metrics(
        &self,
        token: &CancellationToken,
        metrics: &dyn Metrics,
        every: Duration,
    ) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => metrics.report_relay_connection_states(&self.states()),
            }
        }
    }
}
