//! Handshake parsing
//!
//! A socket's identity and tags travel as query parameters on the URI the
//! client connects to, e.g. `/vibe?id=abc&tags=room-1,admin&transport=ws`.

use crate::error::{Error, Result};
use std::collections::{BTreeSet, HashSet};

/// Longest accepted socket id
const MAX_ID_LEN: usize = 128;

/// Transport requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Full-duplex WebSocket channel
    WebSocket,
    /// HTTP long polling
    LongPoll,
}

impl TransportKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "ws" => Some(Self::WebSocket),
            "longpoll" => Some(Self::LongPoll),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WebSocket => "ws",
            Self::LongPoll => "longpoll",
        }
    }
}

/// Step of the long polling exchange sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongPollPhase {
    /// Establish the socket
    Open,
    /// Wait for outbound frames
    Poll,
    /// Deliver inbound frames
    Send,
    /// Close the socket
    Abort,
}

impl LongPollPhase {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "poll" => Some(Self::Poll),
            "send" => Some(Self::Send),
            "abort" => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Identity and routing parameters parsed from a connect URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Socket id, client supplied or generated
    pub id: String,
    /// `true` when the client did not supply an id
    pub generated: bool,
    /// Initial tag set
    pub tags: BTreeSet<String>,
    /// Requested transport, if stated
    pub transport: Option<TransportKind>,
    /// Long polling step, if stated
    pub when: Option<LongPollPhase>,
}

impl Handshake {
    /// Parse the handshake parameters carried by `uri`
    ///
    /// Unknown parameters are ignored; repeated known parameters are rejected.
    pub fn parse(uri: &str) -> Result<Self> {
        let query = uri
            .split_once('?')
            .map_or("", |(_, query)| query)
            .split('#')
            .next()
            .unwrap_or_default();

        let mut id = None;
        let mut tags = BTreeSet::new();
        let mut transport = None;
        let mut when = None;
        let mut seen = HashSet::new();

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let known = matches!(&*key, "id" | "tags" | "transport" | "when");
            if known && !seen.insert(key.to_string()) {
                return Err(Error::handshake(format!("repeated parameter '{key}'")));
            }

            match &*key {
                "id" => id = Some(validate_id(&value)?),
                "tags" => tags = parse_tags(&value)?,
                "transport" => {
                    transport = Some(TransportKind::parse(&value).ok_or_else(|| {
                        Error::handshake(format!("unknown transport '{value}'"))
                    })?);
                }
                "when" => {
                    when = Some(LongPollPhase::parse(&value).ok_or_else(|| {
                        Error::handshake(format!("unknown long polling step '{value}'"))
                    })?);
                }
                _ => {}
            }
        }

        let generated = id.is_none();
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Self {
            id,
            generated,
            tags,
            transport,
            when,
        })
    }
}

fn validate_id(value: &str) -> Result<String> {
    if value.is_empty() {
        return Err(Error::handshake("empty socket id"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(Error::handshake("socket id too long"));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::handshake("socket id contains whitespace"));
    }
    Ok(value.to_string())
}

fn parse_tags(value: &str) -> Result<BTreeSet<String>> {
    if value.is_empty() {
        return Ok(BTreeSet::new());
    }

    value
        .split(',')
        .map(str::trim)
        .map(|tag| {
            if tag.is_empty() {
                Err(Error::handshake("empty tag"))
            } else {
                Ok(tag.to_string())
            }
        })
        .collect()
}
