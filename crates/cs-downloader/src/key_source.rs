use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;

use crate::domain::PublicKey;
use crate::ports::PublicKeySource;

#[derive(Default)]
pub struct StaticPublicKeySource {
    public_keys: RwLock<HashSet<PublicKey>>,
}

impl StaticPublicKeySource {
    pub fn new(public_keys: impl IntoIterator<Item = PublicKey>) -> Self {
        Self {
            public_keys: RwLock::new(public_keys.into_iter().collect()),
        }
    }

    /// Replaces the whole set; the downloader picks it up on its next refresh.
    pub fn set(&self, public_keys: impl IntoIterator<Item = PublicKey>) {
        let mut guard = self
            .public_keys
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = public_keys.into_iter().collect();
    }
}

#[async_trait]
impl PublicKeySource for StaticPublicKeySource {
    async fn list(&self) -> Result<HashSet<PublicKey>> {
        let guard = self
            .public_keys
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(guard.clone())
    }
}
