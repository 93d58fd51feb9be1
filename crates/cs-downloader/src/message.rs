use serde::Serialize;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::domain::{EventKind, PublicKey};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid message: {0}")]
    Invalid(&'static str),
}

/// Filter sent with a REQ: one author, a kind allow-list and an optional
/// lower time bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter {
    authors: Vec<String>,
    kinds: Vec<EventKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<i64>,
}

impl Filter {
    pub fn new(public_key: PublicKey, kinds: &[EventKind], max_age: Option<Duration>) -> Self {
        Self {
            authors: vec![public_key.hex()],
            kinds: kinds.to_vec(),
            since: max_age.map(unix_seconds_ago),
        }
    }
}

pub fn req(subscription_id: &str, filter: &Filter) -> String {
    json!(["REQ", subscription_id, filter]).to_string()
}

pub fn close(subscription_id: &str) -> String {
    json!(["CLOSE", subscription_id]).to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    Event {
        subscription_id: String,
        event: Value,
    },
    EndOfStoredEvents {
        subscription_id: String,
    },
    Notice {
        message: String,
    },
    Other {
        label: String,
    },
}

pub fn parse(text: &str) -> Result<RelayFrame, MessageError> {
    let value: Value = serde_json::from_str(text)?;
    let arr = value
        .as_array()
        .ok_or(MessageError::Invalid("message is not an array"))?;
    let label = arr
        .first()
        .and_then(|v| v.as_str())
        .ok_or(MessageError::Invalid("missing message label"))?;

    match label {
        "EVENT" => {
            let subscription_id = string_at(arr, 1)?;
            let event = arr
                .get(2)
                .cloned()
                .ok_or(MessageError::Invalid("missing event"))?;
            Ok(RelayFrame::Event {
                subscription_id,
                event,
            })
        }
        "EOSE" => Ok(RelayFrame::EndOfStoredEvents {
            subscription_id: string_at(arr, 1)?,
        }),
        "NOTICE" => Ok(RelayFrame::Notice {
            message: string_at(arr, 1).unwrap_or_default(),
        }),
        other => Ok(RelayFrame::Other {
            label: other.to_string(),
        }),
    }
}

fn string_at(arr: &[Value], index: usize) -> Result<String, MessageError> {
    arr.get(index)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or(MessageError::Invalid("missing subscription id"))
}

fn unix_seconds_ago(age: Duration) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.saturating_sub(age).as_secs() as i64
}
