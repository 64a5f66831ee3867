//! Event frame format
//!
//! Every unit exchanged on a socket carries an event name, a payload, an
//! optional correlation id and an optional reply-expected flag.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name carrying the outcome of a request
pub const REPLY_EVENT: &str = "reply";

/// A single event on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Correlation id, scoped to one socket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Event name
    #[serde(rename = "type")]
    pub event: String,

    /// Event payload
    #[serde(default)]
    pub data: Value,

    /// Whether the sender expects a `reply` event for this id
    #[serde(default, skip_serializing_if = "is_false")]
    pub reply: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// Payload of a `reply` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    /// Id of the request being answered
    pub id: u64,

    /// Resolved value or rejection reason
    #[serde(default)]
    pub data: Value,

    /// `true` when the request was rejected
    #[serde(default)]
    pub exception: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Batch {
    Many(Vec<EventFrame>),
    One(EventFrame),
}

impl EventFrame {
    /// Create a fire-and-forget frame
    #[must_use]
    pub fn new(id: u64, event: impl Into<String>, data: Value) -> Self {
        Self {
            id: Some(id),
            event: event.into(),
            data,
            reply: false,
        }
    }

    /// Create a frame that expects a reply
    #[must_use]
    pub fn request(id: u64, event: impl Into<String>, data: Value) -> Self {
        Self {
            reply: true,
            ..Self::new(id, event, data)
        }
    }

    /// Create a `reply` frame answering request `request_id`
    #[must_use]
    pub fn reply_to(id: u64, request_id: u64, data: Value, exception: bool) -> Self {
        let reply = ReplyFrame {
            id: request_id,
            data,
            exception,
        };
        Self::new(id, REPLY_EVENT, serde_json::to_value(reply).unwrap_or_default())
    }

    /// Whether this frame answers an earlier request
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.event == REPLY_EVENT
    }

    /// Decode the payload of a `reply` frame
    pub fn as_reply(&self) -> Result<ReplyFrame, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Decode either one frame or a JSON array of frames
    pub fn decode_batch(json: &str) -> Result<Vec<Self>, serde_json::Error> {
        Ok(match serde_json::from_str(json)? {
            Batch::Many(frames) => frames,
            Batch::One(frame) => vec![frame],
        })
    }
}

impl std::fmt::Display for EventFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventFrame(type={}", self.event)?;
        if let Some(id) = self.id {
            write!(f, ", id={id}")?;
        }
        if self.reply {
            write!(f, ", reply")?;
        }
        write!(f, ")")
    }
}
