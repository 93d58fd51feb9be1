use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::connection::lock;
use crate::domain::{EventKind, EventOrEndOfStoredEvents, PublicKey, RelayAddress};
use crate::downloader::DownloaderState;
use crate::reconcile;

/// Downloads the events of a single public key from every relay the relay
/// source currently reports for it, one download task per relay.
pub struct KeyRelayTracker {
    public_key: PublicKey,
    state: DownloaderState,
    relays: Mutex<HashMap<RelayAddress, CancellationToken>>,
}

impl KeyRelayTracker {
    pub fn new(public_key: PublicKey, state: DownloaderState) -> Self {
        Self {
            public_key,
            state,
            relays: Mutex::new(HashMap::new()),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn relays(&self) -> Vec<RelayAddress> {
        let mut relays: Vec<RelayAddress> = lock(&self.relays).keys().cloned().collect();
        relays.sort();
        relays
    }

    /// Runs until `token` is cancelled. Download tasks hang off child tokens
    /// so they stop together with the tracker.
    pub async fn run(&self, token: CancellationToken) {
        tokio::join!(self.refresh_loop(&token), self.metrics_loop(&token));
        self.state.metrics.remove_public_key_downloader(&self.public_key);
        tracing::debug!(public_key = %self.public_key, "public key downloader stopped");
    }

    async fn refresh_loop(&self, token: &CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                result = self.refresh_relays(token) => {
                    if let Err(err) = result {
                        tracing::error!(
                            public_key = %self.public_key,
                            error = ?err,
                            "error refreshing relays"
                        );
                    }
                }
            }

            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(self.state.config.refresh_relays_every) => {}
            }
        }
    }

    async fn metrics_loop(&self, token: &CancellationToken) {
        loop {
            self.state
                .metrics
                .report_number_of_public_key_downloader_relays(&self.public_key, lock(&self.relays).len());

            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(self.state.config.store_metrics_every) => {}
            }
        }
    }

    /// A failing relay source leaves the running downloads untouched.
    async fn refresh_relays(&self, token: &CancellationToken) -> Result<()> {
        let relays = self
            .state
            .relay_source
            .get_relays(self.public_key)
            .await
            .context("error getting relays")?;
        let desired: HashSet<RelayAddress> = relays.into_iter().collect();

        let mut running = lock(&self.relays);
        let plan = reconcile::plan(&desired, running.keys());

        for relay in plan.to_stop {
            if let Some(relay_token) = running.remove(&relay) {
                tracing::debug!(public_key = %self.public_key, relay = %relay, "stopping relay download");
                relay_token.cancel();
            }
        }

        for relay in plan.to_start {
            tracing::debug!(public_key = %self.public_key, relay = %relay, "starting relay download");
            let relay_token = token.child_token();
            running.insert(relay.clone(), relay_token.clone());
            tokio::spawn(download(
                self.state.clone(),
                self.public_key,
                relay,
                relay_token,
            ));
        }

        Ok(())
    }
}

/// Forwards events for one (public key, relay) pair. End of stored events
/// markers are not forwarded.
async fn download(
    state: DownloaderState,
    public_key: PublicKey,
    relay: RelayAddress,
    token: CancellationToken,
) {
    let mut events = state.pool.get_events(
        token.clone(),
        public_key,
        &relay,
        EventKind::to_download(),
        Some(state.config.look_back),
    );

    loop {
        let value = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            value = events.recv() => match value {
                Some(value) => value,
                None => break,
            },
        };
        if let EventOrEndOfStoredEvents::Event(event) = value {
            state.metrics.report_received_event();
            state.publisher.publish(&relay, event);
        }
    }

    tracing::trace!(public_key = %public_key, relay = %relay, "relay download finished");
}
