use anyhow::{anyhow, Context, Result};
use cs_core::config;
use std::time::Duration;

use crate::connection::ConnectionConfig;
use crate::domain::RelayAddress;

pub const DEFAULT_RELAYS: [&str; 3] = [
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.current.fyi",
];

pub const DEFAULT_DIRECTORY_RELAYS: [&str; 1] = ["wss://purplepag.es"];

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub connection: ConnectionConfig,
    pub refresh_relays_every: Duration,
    /// Kept longer than `refresh_relays_every`: the key set changes rarely.
    pub refresh_public_keys_every: Duration,
    pub store_metrics_every: Duration,
    pub look_back: Duration,
    pub default_relays: Vec<RelayAddress>,
    pub directory_relays: Vec<RelayAddress>,
    pub directory_lookup_timeout: Duration,
    pub directory_refresh_after: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            refresh_relays_every: Duration::from_secs(60),
            refresh_public_keys_every: Duration::from_secs(120),
            store_metrics_every: Duration::from_secs(10),
            look_back: Duration::from_secs(24 * 60 * 60),
            default_relays: parse_relays(&DEFAULT_RELAYS).unwrap_or_default(),
            directory_relays: parse_relays(&DEFAULT_DIRECTORY_RELAYS).unwrap_or_default(),
            directory_lookup_timeout: Duration::from_secs(10),
            directory_refresh_after: Duration::from_secs(30 * 60),
        }
    }
}

pub fn load_config() -> Result<DownloaderConfig> {
    let connection = ConnectionConfig {
        reconnect_after: config::duration_from_env("DOWNLOADER_RECONNECT_SECONDS", 60)?,
        manage_subscriptions_every: config::duration_from_env(
            "DOWNLOADER_MANAGE_SUBSCRIPTIONS_SECONDS",
            10,
        )?,
        subscription_buffer: config::usize_from_env("DOWNLOADER_SUBSCRIPTION_BUFFER", 16)?,
    };

    let refresh_relays_every = config::duration_from_env("DOWNLOADER_REFRESH_RELAYS_SECONDS", 60)?;
    let refresh_public_keys_every =
        config::duration_from_env("DOWNLOADER_REFRESH_PUBLIC_KEYS_SECONDS", 120)?;
    if refresh_public_keys_every <= refresh_relays_every {
        return Err(anyhow!(
            "DOWNLOADER_REFRESH_PUBLIC_KEYS_SECONDS must be greater than DOWNLOADER_REFRESH_RELAYS_SECONDS"
        ));
    }

    Ok(DownloaderConfig {
        connection,
        refresh_relays_every,
        refresh_public_keys_every,
        store_metrics_every: config::duration_from_env("DOWNLOADER_STORE_METRICS_SECONDS", 10)?,
        look_back: config::duration_from_env("DOWNLOADER_LOOK_BACK_SECONDS", 24 * 60 * 60)?,
        default_relays: parse_relays(&config::list_from_env(
            "DOWNLOADER_DEFAULT_RELAYS",
            &DEFAULT_RELAYS,
        ))
        .context("invalid DOWNLOADER_DEFAULT_RELAYS")?,
        directory_relays: parse_relays(&config::list_from_env(
            "DOWNLOADER_DIRECTORY_RELAYS",
            &DEFAULT_DIRECTORY_RELAYS,
        ))
        .context("invalid DOWNLOADER_DIRECTORY_RELAYS")?,
        directory_lookup_timeout: config::duration_from_env(
            "DOWNLOADER_DIRECTORY_TIMEOUT_SECONDS",
            10,
        )?,
        directory_refresh_after: config::duration_from_env(
            "DOWNLOADER_DIRECTORY_REFRESH_SECONDS",
            30 * 60,
        )?,
    })
}

fn parse_relays<S: AsRef<str>>(values: &[S]) -> Result<Vec<RelayAddress>> {
    values
        .iter()
        .map(|value| -> Result<RelayAddress> {
            let address = RelayAddress::new(value.as_ref())?;
            Ok(address.normalize()?)
        })
        .collect()
}
