use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use nostr_sdk::prelude::{EventBuilder, Keys, Kind, Tag, TagKind};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::config::DownloaderConfig;
use crate::connection::ConnectionConfig;
use crate::directory::DirectoryError;
use crate::domain::{ConnectionState, Event, PublicKey, RelayAddress};
use crate::downloader::DownloaderState;
use crate::pool::ConnectionPool;
use crate::ports::{Metrics, PublicKeySource, ReceivedEventPublisher, RelaySource};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn signed_event_value(keys: &Keys, kind: u16, tags: Vec<Vec<String>>, content: &str) -> Value {
    let mut builder = EventBuilder::new(Kind::Custom(kind), content);
    for tag in tags {
        if tag.is_empty() {
            continue;
        }
        let kind = TagKind::from(tag[0].as_str());
        builder = builder.tag(Tag::custom(kind, tag[1..].to_vec()));
    }
    let signed = builder.sign_with_keys(keys).expect("sign event");
    serde_json::to_value(&signed).expect("event json")
}

pub fn public_key(keys: &Keys) -> PublicKey {
    PublicKey::from(keys.public_key())
}

pub fn test_connection_config() -> ConnectionConfig {
    ConnectionConfig {
        reconnect_after: Duration::from_millis(100),
        manage_subscriptions_every: Duration::from_millis(50),
        subscription_buffer: 16,
    }
}

pub fn test_downloader_config() -> DownloaderConfig {
    DownloaderConfig {
        connection: test_connection_config(),
        refresh_relays_every: Duration::from_millis(50),
        refresh_public_keys_every: Duration::from_millis(50),
        store_metrics_every: Duration::from_millis(20),
        look_back: Duration::from_secs(3600),
        ..DownloaderConfig::default()
    }
}

pub fn test_downloader_state(
    token: CancellationToken,
    relay_source: Arc<dyn RelaySource>,
    publisher: Arc<dyn ReceivedEventPublisher>,
    metrics: Arc<dyn Metrics>,
) -> DownloaderState {
    let config = test_downloader_config();
    DownloaderState {
        pool: Arc::new(ConnectionPool::new(config.connection.clone(), token)),
        relay_source,
        publisher,
        metrics,
        config: Arc::new(config),
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT_TIMEOUT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[derive(Debug, Clone)]
enum Outbound {
    Frame(String),
    Disconnect,
}

/// In-process relay listening on a loopback port. Records every frame a
/// client sends and lets tests push frames back to all connected clients.
pub struct FakeRelay {
    address: RelayAddress,
    connections: Arc<AtomicUsize>,
    stored_events: Arc<Mutex<Vec<Value>>>,
    frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    outbound: broadcast::Sender<Outbound>,
    task: JoinHandle<()>,
}

impl FakeRelay {
    /// Relay that stays silent unless a test pushes frames.
    pub async fn start() -> Self {
        Self::spawn(false).await
    }

    /// Relay that answers every REQ with the matching stored events
    /// followed by EOSE.
    pub async fn start_answering() -> Self {
        Self::spawn(true).await
    }

    async fn spawn(answer_requests: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake relay");
        let local_addr = listener.local_addr().expect("fake relay address");
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));
        let stored_events = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn(accept_loop(
            listener,
            frames_tx,
            outbound.clone(),
            Arc::clone(&connections),
            answer_requests.then(|| Arc::clone(&stored_events)),
        ));

        Self {
            address: RelayAddress::new(format!("ws://{local_addr}")).expect("relay address"),
            connections,
            stored_events,
            frames: tokio::sync::Mutex::new(frames_rx),
            outbound,
            task,
        }
    }

    pub fn address(&self) -> RelayAddress {
        self.address.clone()
    }

    /// Number of completed WebSocket handshakes.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn store_event(&self, event: Value) {
        self.stored_events.lock().unwrap().push(event);
    }

    pub fn send(&self, frame: Value) {
        let _ = self.outbound.send(Outbound::Frame(frame.to_string()));
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.outbound.send(Outbound::Frame(text.to_string()));
    }

    pub fn disconnect_all(&self) {
        let _ = self.outbound.send(Outbound::Disconnect);
    }

    pub async fn next_frame(&self) -> Value {
        timeout(WAIT_TIMEOUT, self.frames.lock().await.recv())
            .await
            .expect("no frame received in time")
            .expect("fake relay stopped")
    }

    pub async fn expect_no_frame(&self, within: Duration) {
        if let Ok(Some(frame)) = timeout(within, self.frames.lock().await.recv()).await {
            panic!("unexpected frame: {frame}");
        }
    }

    /// Collects frames until none arrives for `quiet`.
    pub async fn drain_frames(&self, quiet: Duration) -> Vec<Value> {
        let mut frames = Vec::new();
        let mut rx = self.frames.lock().await;
        while let Ok(Some(frame)) = timeout(quiet, rx.recv()).await {
            frames.push(frame);
        }
        frames
    }

    /// Drains frames until one with the given label shows up.
    pub async fn next_frame_labelled(&self, label: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame[0] == label {
                return frame;
            }
        }
    }
}

impl Drop for FakeRelay {
    fn drop(&mut self) {
        self.task.abort();
        let _ = self.outbound.send(Outbound::Disconnect);
    }
}

async fn accept_loop(
    listener: TcpListener,
    frames_tx: mpsc::UnboundedSender<Value>,
    outbound: broadcast::Sender<Outbound>,
    connections: Arc<AtomicUsize>,
    stored_events: Option<Arc<Mutex<Vec<Value>>>>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        let frames_tx = frames_tx.clone();
        let outbound_rx = outbound.subscribe();
        let connections = Arc::clone(&connections);
        let stored_events = stored_events.clone();
        tokio::spawn(async move {
            serve_connection(stream, frames_tx, outbound_rx, connections, stored_events).await;
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    frames_tx: mpsc::UnboundedSender<Value>,
    mut outbound_rx: broadcast::Receiver<Outbound>,
    connections: Arc<AtomicUsize>,
    stored_events: Option<Arc<Mutex<Vec<Value>>>>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    connections.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            message = stream.next() => {
                let Some(Ok(message)) = message else { return };
                let Message::Text(text) = message else { continue };
                let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else { continue };

                let replies = match &stored_events {
                    Some(stored) if frame[0] == "REQ" => answer(&frame, &stored.lock().unwrap()),
                    _ => Vec::new(),
                };
                let _ = frames_tx.send(frame);
                for reply in replies {
                    if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                        return;
                    }
                }
            }
            outbound = outbound_rx.recv() => match outbound {
                Ok(Outbound::Frame(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(Outbound::Disconnect) => {
                    let _ = sink.close().await;
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

fn answer(req: &Value, stored_events: &[Value]) -> Vec<Value> {
    let subscription_id = req[1].clone();
    let filter = &req[2];
    let mut replies: Vec<Value> = stored_events
        .iter()
        .filter(|event| matches_field(filter, "authors", &event["pubkey"]))
        .filter(|event| matches_field(filter, "kinds", &event["kind"]))
        .map(|event| json!(["EVENT", subscription_id, event]))
        .collect();
    replies.push(json!(["EOSE", subscription_id]));
    replies
}

fn matches_field(filter: &Value, field: &str, value: &Value) -> bool {
    match filter[field].as_array() {
        Some(allowed) => allowed.contains(value),
        None => true,
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    downloaders: Mutex<Vec<usize>>,
    downloader_relays: Mutex<HashMap<PublicKey, usize>>,
    relay_states: Mutex<HashMap<RelayAddress, ConnectionState>>,
    directory_lookups: Mutex<Vec<(RelayAddress, &'static str)>>,
    received_events: AtomicUsize,
}

impl RecordingMetrics {
    pub fn last_downloaders(&self) -> Option<usize> {
        self.downloaders.lock().unwrap().last().copied()
    }

    pub fn downloader_relays(&self, public_key: &PublicKey) -> Option<usize> {
        self.downloader_relays.lock().unwrap().get(public_key).copied()
    }

    pub fn relay_state(&self, relay: &RelayAddress) -> Option<ConnectionState> {
        self.relay_states.lock().unwrap().get(relay).copied()
    }

    pub fn directory_lookups(&self) -> Vec<(RelayAddress, &'static str)> {
        self.directory_lookups.lock().unwrap().clone()
    }

    pub fn received_events(&self) -> usize {
        self.received_events.load(Ordering::SeqCst)
    }
}

impl Metrics for RecordingMetrics {
    fn report_number_of_public_key_downloaders(&self, count: usize) {
        self.downloaders.lock().unwrap().push(count);
    }

    fn report_number_of_public_key_downloader_relays(&self, public_key: &PublicKey, count: usize) {
        self.downloader_relays
            .lock()
            .unwrap()
            .insert(*public_key, count);
    }

    fn remove_public_key_downloader(&self, public_key: &PublicKey) {
        self.downloader_relays.lock().unwrap().remove(public_key);
    }

    fn report_relay_connection_states(&self, states: &HashMap<RelayAddress, ConnectionState>) {
        self.relay_states
            .lock()
            .unwrap()
            .extend(states.iter().map(|(relay, state)| (relay.clone(), *state)));
    }

    fn report_directory_lookup(
        &self,
        directory: &RelayAddress,
        result: Result<(), &DirectoryError>,
    ) {
        let label = match result {
            Ok(()) => "success",
            Err(DirectoryError::NotFound) => "not_found",
            Err(_) => "error",
        };
        self.directory_lookups
            .lock()
            .unwrap()
            .push((directory.clone(), label));
    }

    fn report_received_event(&self) {
        self.received_events.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(RelayAddress, Event)>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<(RelayAddress, Event)> {
        self.events.lock().unwrap().clone()
    }
}

impl ReceivedEventPublisher for RecordingPublisher {
    fn publish(&self, relay: &RelayAddress, event: Event) {
        self.events.lock().unwrap().push((relay.clone(), event));
    }
}

/// Relay source whose answers tests can swap at any time.
#[derive(Default)]
pub struct FakeRelaySource {
    relays: Mutex<HashMap<PublicKey, Vec<RelayAddress>>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeRelaySource {
    pub fn set(&self, public_key: PublicKey, relays: Vec<RelayAddress>) {
        self.relays.lock().unwrap().insert(public_key, relays);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelaySource for FakeRelaySource {
    async fn get_relays(&self, public_key: PublicKey) -> Result<Vec<RelayAddress>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("relay source unavailable"));
        }
        Ok(self
            .relays
            .lock()
            .unwrap()
            .get(&public_key)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakePublicKeySource {
    public_keys: Mutex<HashSet<PublicKey>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakePublicKeySource {
    pub fn set(&self, public_keys: impl IntoIterator<Item = PublicKey>) {
        *self.public_keys.lock().unwrap() = public_keys.into_iter().collect();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublicKeySource for FakePublicKeySource {
    async fn list(&self) -> Result<HashSet<PublicKey>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("public key source unavailable"));
        }
        Ok(self.public_keys.lock().unwrap().clone())
    }
}
