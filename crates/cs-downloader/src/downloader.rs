use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::DownloaderConfig;
use crate::connection::lock;
use crate::domain::PublicKey;
use crate::key_relays::KeyRelayTracker;
use crate::pool::ConnectionPool;
use crate::ports::{Metrics, PublicKeySource, ReceivedEventPublisher, RelaySource};
use crate::reconcile;

/// Returned by [`Downloader::run`] once its token is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("downloader cancelled")]
pub struct Cancelled;

/// Collaborators shared by the downloader and every tracker it starts.
#[derive(Clone)]
pub struct DownloaderState {
    pub pool: Arc<ConnectionPool>,
    pub relay_source: Arc<dyn RelaySource>,
    pub publisher: Arc<dyn ReceivedEventPublisher>,
    pub metrics: Arc<dyn Metrics>,
    pub config: Arc<DownloaderConfig>,
}

/// Keeps one [`KeyRelayTracker`] running for every public key the public key
/// source reports.
pub struct Downloader {
    public_key_source: Arc<dyn PublicKeySource>,
    state: DownloaderState,
    trackers: Mutex<HashMap<PublicKey, CancellationToken>>,
}

impl Downloader {
    pub fn new(public_key_source: Arc<dyn PublicKeySource>, state: DownloaderState) -> Self {
        Self {
            public_key_source,
            state,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    pub fn public_keys(&self) -> HashSet<PublicKey> {
        lock(&self.trackers).keys().copied().collect()
    }

    /// Runs until `token` is cancelled, then returns [`Cancelled`]. Trackers
    /// run on child tokens and stop with it.
    pub async fn run(&self, token: CancellationToken) -> Result<(), Cancelled> {
        tokio::join!(
            self.refresh_loop(&token),
            self.metrics_loop(&token),
            self.state.pool.report_metrics(
                &token,
                self.state.metrics.as_ref(),
                self.state.config.store_metrics_every,
            ),
        );
        Err(Cancelled)
    }

    async fn refresh_loop(&self, token: &CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                result = self.refresh_public_keys(token) => {
                    if let Err(err) = result {
                        tracing::error!(error = ?err, "error refreshing public keys");
                    }
                }
            }

            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(self.state.config.refresh_public_keys_every) => {}
            }
        }
    }

    async fn metrics_loop(&self, token: &CancellationToken) {
        loop {
            self.state
                .metrics
                .report_number_of_public_key_downloaders(lock(&self.trackers).len());

            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(self.state.config.store_metrics_every) => {}
            }
        }
    }

    async fn refresh_public_keys(&self, token: &CancellationToken) -> Result<()> {
        let desired = self
            .public_key_source
            .list()
            .await
            .context("error getting public keys")?;

        let mut running = lock(&self.trackers);
        let plan = reconcile::plan(&desired, running.keys());

        for public_key in plan.to_stop {
            if let Some(tracker_token) = running.remove(&public_key) {
                tracing::debug!(public_key = %public_key, "stopping public key downloader");
                tracker_token.cancel();
            }
        }

        for public_key in plan.to_start {
            tracing::debug!(public_key = %public_key, "starting public key downloader");
            let tracker_token = token.child_token();
            running.insert(public_key, tracker_token.clone());

            let tracker = KeyRelayTracker::new(public_key, self.state.clone());
            tokio::spawn(async move { tracker.run(tracker_token).await });
        }

        Ok(())
    }
}
