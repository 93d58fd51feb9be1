use nostr_sdk::prelude::{Event as NostrEvent, JsonUtil};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use super::PublicKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKind(u16);

impl EventKind {
    pub const METADATA: EventKind = EventKind(0);
    pub const NOTE: EventKind = EventKind(1);
    pub const CONTACTS: EventKind = EventKind(3);
    pub const ENCRYPTED_DIRECT_MESSAGE: EventKind = EventKind(4);
    pub const REACTION: EventKind = EventKind(7);
    pub const RELAY_LIST_METADATA: EventKind = EventKind(10002);

    pub const fn new(kind: u16) -> Self {
        Self(kind)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// The only kinds ever requested from relays on behalf of tracked keys.
    pub fn to_download() -> &'static [EventKind] {
        &[EventKind::NOTE]
    }

    pub fn should_download(&self) -> bool {
        Self::to_download().contains(self)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("event verification failed: {0}")]
    Verification(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RawEvent {
    id: String,
    pubkey: String,
    created_at: i64,
    kind: EventKind,
    tags: Vec<Vec<String>>,
    content: String,
    sig: String,
}

/// An event whose id and signature were checked when it was decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    raw: RawEvent,
    public_key: PublicKey,
}

impl Event {
    pub fn from_value(value: &Value) -> Result<Self, EventError> {
        let raw: RawEvent = serde_json::from_value(value.clone())
            .map_err(|err| EventError::Malformed(err.to_string()))?;

        let json = serde_json::to_string(&raw).map_err(|err| EventError::Malformed(err.to_string()))?;
        let event =
            NostrEvent::from_json(json).map_err(|err| EventError::Malformed(err.to_string()))?;
        event
            .verify()
            .map_err(|err| EventError::Verification(err.to_string()))?;

        let public_key =
            PublicKey::from_hex(&raw.pubkey).map_err(|err| EventError::Malformed(err.to_string()))?;

        Ok(Self { raw, public_key })
    }

    pub fn id(&self) -> &str {
        &self.raw.id
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn created_at(&self) -> i64 {
        self.raw.created_at
    }

    pub fn kind(&self) -> EventKind {
        self.raw.kind
    }

    pub fn tags(&self) -> &[Vec<String>] {
        &self.raw.tags
    }

    pub fn content(&self) -> &str {
        &self.raw.content
    }

    pub fn tag_values(&self, name: &str) -> Vec<String> {
        self.raw
            .tags
            .iter()
            .filter_map(|tag| {
                if tag.first().map(|v| v.as_str()) == Some(name) {
                    tag.get(1).cloned()
                } else {
                    None
                }
            })
            .collect()
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

/// Value delivered on a logical subscription channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOrEndOfStoredEvents {
    Event(Event),
    EndOfStoredEvents,
}

impl EventOrEndOfStoredEvents {
    pub fn is_end_of_stored_events(&self) -> bool {
        matches!(self, EventOrEndOfStoredEvents::EndOfStoredEvents)
    }

    pub fn into_event(self) -> Option<Event> {
        match self {
            EventOrEndOfStoredEvents::Event(event) => Some(event),
            EventOrEndOfStoredEvents::EndOfStoredEvents => None,
        }
    }
}
