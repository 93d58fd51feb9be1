use tokio::sync::broadcast;

use crate::domain::{Event, RelayAddress};
use crate::ports::ReceivedEventPublisher;

#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    relay: RelayAddress,
    event: Event,
}

impl ReceivedEvent {
    pub fn relay(&self) -> &RelayAddress {
        &self.relay
    }

    pub fn event(&self) -> &Event {
        &self.event
    }
}

/// In-process fan-out of downloaded events. Subscribers that fall behind
/// miss events rather than slowing the downloads down.
pub struct ReceivedEventPubSub {
    sender: broadcast::Sender<ReceivedEvent>,
}

impl ReceivedEventPubSub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReceivedEvent> {
        self.sender.subscribe()
    }
}

impl ReceivedEventPublisher for ReceivedEventPubSub {
    fn publish(&self, relay: &RelayAddress, event: Event) {
        let received = ReceivedEvent {
            relay: relay.clone(),
            event,
        };
        if self.sender.send(received).is_err() {
            tracing::trace!(relay = %relay, "no subscribers for received event");
        }
    }
}
