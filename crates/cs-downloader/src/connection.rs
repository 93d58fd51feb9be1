use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use uuid::Uuid;

use crate::domain::{
    ConnectionState, Event, EventKind, EventOrEndOfStoredEvents, PublicKey, RelayAddress,
};
use crate::message::{self, Filter, RelayFrame};
use crate::reconcile;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Fixed delay before dialing again after a session ends.
    pub reconnect_after: Duration,
    /// How often logical subscriptions are reconciled with the wire.
    pub manage_subscriptions_every: Duration,
    /// Capacity of the channel handed to each subscriber and of the mailbox
    /// feeding it. Values arriving while both are full are dropped.
    pub subscription_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_after: Duration::from_secs(60),
            manage_subscriptions_every: Duration::from_secs(10),
            subscription_buffer: 16,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("error dialing the relay: {0}")]
    Dial(#[source] WsError),

    #[error("error reading a message from websocket: {0}")]
    Read(#[source] WsError),

    #[error("websocket closed by the relay")]
    Closed,

    #[error("error writing a message to websocket: {0}")]
    Write(#[source] WsError),
}

impl ConnectionError {
    /// Relays go away all the time; these failures are logged at debug.
    pub fn is_common(&self) -> bool {
        matches!(
            self,
            ConnectionError::Dial(_) | ConnectionError::Read(_) | ConnectionError::Closed
        )
    }

    pub fn log_level(&self) -> Level {
        if self.is_common() {
            Level::DEBUG
        } else {
            Level::ERROR
        }
    }
}

struct Subscription {
    filter: Filter,
    mailbox: mpsc::Sender<EventOrEndOfStoredEvents>,
}

/// One WebSocket to one relay, shared by any number of logical subscriptions.
///
/// Subscribers never touch the socket. [`RelayConnection::subscribe`] only
/// registers a subscription; the session loop sends REQ and CLOSE frames when
/// it next reconciles the registered set against what is live on the wire.
pub struct RelayConnection {
    address: RelayAddress,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl RelayConnection {
    pub fn new(address: RelayAddress, config: ConnectionConfig) -> Self {
        Self {
            address,
            config,
            state: Mutex::new(ConnectionState::Initializing),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn address(&self) -> &RelayAddress {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    /// Registers a subscription for events authored by `public_key`. The
    /// returned channel is closed once `token` is cancelled or the receiver
    /// is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        token: CancellationToken,
        public_key: PublicKey,
        kinds: &[EventKind],
        max_age: Option<Duration>,
    ) -> mpsc::Receiver<EventOrEndOfStoredEvents> {
        let capacity = self.config.subscription_buffer.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (mailbox_tx, mailbox_rx) = mpsc::channel(capacity);
        let subscription_id = Uuid::new_v4().simple().to_string();

        lock(&self.subscriptions).insert(
            subscription_id.clone(),
            Subscription {
                filter: Filter::new(public_key, kinds, max_age),
                mailbox: mailbox_tx,
            },
        );
        tracing::trace!(
            relay = %self.address,
            subscription_id = %subscription_id,
            public_key = %public_key,
            "subscription registered"
        );

        tokio::spawn(forward(
            Arc::clone(self),
            subscription_id,
            mailbox_rx,
            tx,
            token,
        ));
        rx
    }

    /// Dials, serves and redials until `token` is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        loop {
            if let Err(err) = self.run_session(&token).await {
                if err.log_level() == Level::DEBUG {
                    tracing::debug!(relay = %self.address, error = %err, "relay session ended");
                } else {
                    tracing::error!(relay = %self.address, error = %err, "relay session ended");
                }
            }

            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(self.config.reconnect_after) => {}
            }
        }
    }

    async fn run_session(&self, token: &CancellationToken) -> Result<(), ConnectionError> {
        let result = self.serve(token).await;
        self.set_state(ConnectionState::Disconnected);
        result
    }

    async fn serve(&self, token: &CancellationToken) -> Result<(), ConnectionError> {
        tracing::trace!(relay = %self.address, "connecting");
        let (stream, _) = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            result = connect_async(self.address.as_str()) => result.map_err(ConnectionError::Dial)?,
        };
        self.set_state(ConnectionState::Connected);
        tracing::debug!(relay = %self.address, "connected");

        let (sink, stream) = stream.split();
        tokio::select! {
            _ = token.cancelled() => Ok(()),
            result = self.read_loop(stream) => result,
            result = self.manage_subscriptions(sink) => result,
        }
    }

    async fn read_loop(&self, mut stream: SplitStream<WsStream>) -> Result<(), ConnectionError> {
        while let Some(message) = stream.next().await {
            match message.map_err(ConnectionError::Read)? {
                Message::Text(text) => self.handle_message(text.as_str()),
                Message::Binary(_) => tracing::debug!(relay = %self.address, "unexpected binary message"),
                _ => {}
            }
        }
        Err(ConnectionError::Closed)
    }

    async fn manage_subscriptions(
        &self,
        mut sink: SplitSink<WsStream, Message>,
    ) -> Result<(), ConnectionError> {
        let mut active = HashSet::new();
        let mut ticker = interval(self.config.manage_subscriptions_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            for frame in self.update_subscriptions(&mut active) {
                sink.send(Message::Text(frame.into()))
                    .await
                    .map_err(ConnectionError::Write)?;
            }
        }
    }

    /// Returns the frames that bring the wire in line with the registered
    /// subscriptions, marking `active` as if they were already sent.
    fn update_subscriptions(&self, active: &mut HashSet<String>) -> Vec<String> {
        let subscriptions = lock(&self.subscriptions);
        let desired: HashSet<String> = subscriptions.keys().cloned().collect();
        let plan = reconcile::plan(&desired, active.iter());

        let mut frames = Vec::with_capacity(plan.to_stop.len() + plan.to_start.len());
        for subscription_id in plan.to_stop {
            tracing::trace!(relay = %self.address, subscription_id = %subscription_id, "closing subscription");
            frames.push(message::close(&subscription_id));
            active.remove(&subscription_id);
        }
        for subscription_id in plan.to_start {
            if let Some(subscription) = subscriptions.get(&subscription_id) {
                tracing::trace!(relay = %self.address, subscription_id = %subscription_id, "opening subscription");
                frames.push(message::req(&subscription_id, &subscription.filter));
                active.insert(subscription_id);
            }
        }
        frames
    }

    fn handle_message(&self, text: &str) {
        match message::parse(text) {
            Ok(RelayFrame::Event {
                subscription_id,
                event,
            }) => match Event::from_value(&event) {
                Ok(event) => self.deliver(&subscription_id, EventOrEndOfStoredEvents::Event(event)),
                Err(err) => tracing::error!(
                    relay = %self.address,
                    error = %err,
                    message = text,
                    "error decoding an event"
                ),
            },
            Ok(RelayFrame::EndOfStoredEvents { subscription_id }) => {
                self.deliver(&subscription_id, EventOrEndOfStoredEvents::EndOfStoredEvents)
            }
            Ok(RelayFrame::Notice { message }) => {
                tracing::debug!(relay = %self.address, notice = %message, "received a notice")
            }
            Ok(RelayFrame::Other { label }) => {
                tracing::debug!(relay = %self.address, label = %label, "unhandled message")
            }
            Err(err) => tracing::error!(
                relay = %self.address,
                error = %err,
                message = text,
                "error parsing an incoming message"
            ),
        }
    }

    /// Never waits. Values for unknown or removed subscriptions, and values
    /// for subscribers whose mailbox is full, are dropped.
    fn deliver(&self, subscription_id: &str, value: EventOrEndOfStoredEvents) {
        let subscriptions = lock(&self.subscriptions);
        match subscriptions.get(subscription_id) {
            Some(subscription) => match subscription.mailbox.try_send(value) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => tracing::error!(
                    relay = %self.address,
                    subscription_id = %subscription_id,
                    "subscriber is not keeping up, dropping a message"
                ),
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            },
            None => tracing::trace!(
                relay = %self.address,
                subscription_id = %subscription_id,
                "dropping a message for an unknown subscription"
            ),
        }
    }

    fn remove_subscription(&self, subscription_id: &str) {
        lock(&self.subscriptions).remove(subscription_id);
        tracing::trace!(relay = %self.address, subscription_id = %subscription_id, "subscription removed");
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }
}

/// Moves values from the mailbox into the subscriber's channel. Waiting on a
/// slow subscriber happens here, never in the read loop.
async fn forward(
    connection: Arc<RelayConnection>,
    subscription_id: String,
    mut mailbox: mpsc::Receiver<EventOrEndOfStoredEvents>,
    tx: mpsc::Sender<EventOrEndOfStoredEvents>,
    token: CancellationToken,
) {
    loop {
        let value = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tx.closed() => break,
            value = mailbox.recv() => match value {
                Some(value) => value,
                None => break,
            },
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = tx.send(value) => if result.is_err() { break },
        }
    }
    connection.remove_subscription(&subscription_id);
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
