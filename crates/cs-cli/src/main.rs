use anyhow::Result;
use clap::{Parser, Subcommand};
use cs_core::{logging, metrics};
use cs_downloader::{
    CachedDirectory, ConnectionPool, DefaultRelaySource, Directory, Downloader, DownloaderConfig,
    DownloaderState, PrometheusMetrics, PublicKey, ReceivedEvent, ReceivedEventPubSub,
    RelaySource, StaticPublicKeySource, SERVICE_NAME,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const RECEIVED_EVENTS_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "cs", version, about = "Nostr relay event downloader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download events of the given public keys until interrupted
    Run {
        /// Hex or npub encoded public key; repeat or separate with commas
        #[arg(
            long = "public-key",
            env = "CS_PUBLIC_KEYS",
            value_delimiter = ',',
            required = true
        )]
        public_keys: Vec<PublicKey>,
    },
    /// Print the relays a public key is downloaded from
    Relays {
        /// Hex or npub encoded public key
        public_key: PublicKey,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = rustls::crypto::ring::default_provider().install_default();

    match cli.command {
        Commands::Run { public_keys } => run(public_keys).await?,
        Commands::Relays { public_key } => print_relays(public_key).await?,
    }
    Ok(())
}

async fn run(public_keys: Vec<PublicKey>) -> Result<()> {
    logging::init(SERVICE_NAME);
    metrics::init(SERVICE_NAME);
    let config = cs_downloader::load_config()?;

    let token = CancellationToken::new();
    let prometheus = Arc::new(PrometheusMetrics);
    let relay_source = Arc::new(DefaultRelaySource::new(
        config.default_relays.clone(),
        directories(&config, prometheus.clone(), &token),
    ));
    let pubsub = Arc::new(ReceivedEventPubSub::new(RECEIVED_EVENTS_CAPACITY));
    let state = DownloaderState {
        pool: Arc::new(ConnectionPool::new(
            config.connection.clone(),
            token.child_token(),
        )),
        relay_source,
        publisher: pubsub.clone(),
        metrics: prometheus,
        config: Arc::new(config),
    };
    let downloader = Downloader::new(Arc::new(StaticPublicKeySource::new(public_keys)), state);

    tokio::spawn(log_received_events(pubsub.subscribe(), token.clone()));
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
        }
        shutdown.cancel();
    });

    tracing::info!("downloader started");
    if let Err(err) = downloader.run(token.clone()).await {
        tracing::info!(reason = %err, "downloader stopped");
    }
    tracing::debug!(metrics = %metrics::gather_text(), "final metrics");
    Ok(())
}

async fn print_relays(public_key: PublicKey) -> Result<()> {
    logging::init(SERVICE_NAME);
    let config = cs_downloader::load_config()?;

    let token = CancellationToken::new();
    let _stop_directories = token.clone().drop_guard();
    let source = DefaultRelaySource::new(
        config.default_relays.clone(),
        directories(&config, Arc::new(PrometheusMetrics), &token),
    );

    for relay in source.get_relays(public_key).await? {
        println!("{relay}");
    }
    Ok(())
}

fn directories(
    config: &DownloaderConfig,
    metrics: Arc<PrometheusMetrics>,
    token: &CancellationToken,
) -> Vec<Arc<CachedDirectory>> {
    config
        .directory_relays
        .iter()
        .map(|address| {
            let directory = Directory::new(
                address.clone(),
                &config.connection,
                config.directory_lookup_timeout,
                metrics.clone(),
                token.child_token(),
            );
            Arc::new(CachedDirectory::new(
                directory,
                config.directory_refresh_after,
            ))
        })
        .collect()
}

async fn log_received_events(
    mut received: broadcast::Receiver<ReceivedEvent>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            result = received.recv() => match result {
                Ok(event) => tracing::info!(
                    relay = %event.relay(),
                    event_id = event.event().id(),
                    public_key = %event.event().public_key(),
                    kind = %event.event().kind(),
                    "received event"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "received event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}
