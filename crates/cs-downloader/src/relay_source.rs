use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::directory::CachedDirectory;
use crate::domain::{PublicKey, RelayAddress};
use crate::ports::RelaySource;

/// Hardcoded relays plus whatever every directory knows about the key.
pub struct DefaultRelaySource {
    default_relays: Vec<RelayAddress>,
    directories: Vec<Arc<CachedDirectory>>,
}

impl DefaultRelaySource {
    pub fn new(default_relays: Vec<RelayAddress>, directories: Vec<Arc<CachedDirectory>>) -> Self {
        Self {
            default_relays,
            directories,
        }
    }
}

#[async_trait]
impl RelaySource for DefaultRelaySource {
    async fn get_relays(&self, public_key: PublicKey) -> Result<Vec<RelayAddress>> {
        let mut relays: BTreeSet<RelayAddress> = self.default_relays.iter().cloned().collect();

        for directory in &self.directories {
            let found = directory
                .get_relays(public_key)
                .await
                .with_context(|| format!("error getting relays from '{}'", directory.address()))?;
            for relay in found {
                match relay.normalize() {
                    Ok(relay) => {
                        relays.insert(relay);
                    }
                    Err(err) => tracing::debug!(relay = %relay, error = %err, "skipping relay address"),
                }
            }
        }

        Ok(relays.into_iter().collect())
    }
}
