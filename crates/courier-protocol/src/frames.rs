//! Inbound control frames and topic kinds.
//!
//! Clients speak the same envelope shape as the server. Only a handful of
//! types carry meaning inbound; everything else decodes to
//! [`ClientFrame::Unknown`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::codec::ProtocolError;

/// Kind half of a topic key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicKind {
    /// A user's personal inbox.
    User,
    /// A direct-message conversation.
    Conversation,
    /// A server channel.
    Channel,
    /// A whole server.
    Server,
}

impl TopicKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKind::User => "user",
            TopicKind::Conversation => "conversation",
            TopicKind::Channel => "channel",
            TopicKind::Server => "server",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TopicKind::User),
            "conversation" => Ok(TopicKind::Conversation),
            "channel" => Ok(TopicKind::Channel),
            "server" => Ok(TopicKind::Server),
            other => Err(ProtocolError::Invalid(format!(
                "unknown subscription type: {other}"
            ))),
        }
    }
}

/// One `{type, id}` entry of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    /// Topic kind.
    #[serde(rename = "type")]
    pub kind: TopicKind,
    /// Target id.
    pub id: String,
}

impl Subscription {
    /// Create a subscription entry.
    #[must_use]
    pub fn new(kind: TopicKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// Payload of `subscribe` and `unsubscribe` frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// Payload of `typing_start` and `typing_stop` frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_display_name: Option<String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Add topics to the connection's subscription set.
    Subscribe {
        request_id: Option<String>,
        subscriptions: Vec<Subscription>,
    },
    /// Remove topics from the connection's subscription set.
    Unsubscribe {
        request_id: Option<String>,
        subscriptions: Vec<Subscription>,
    },
    /// Typing indicator to relay.
    Typing { started: bool, typing: TypingRequest },
    /// Any frame type the server does not act on.
    Unknown(String),
}

/// Raw inbound frame before dispatch on `type`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    request_id: Option<String>,
}

impl ClientFrame {
    /// Decode a frame from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame has no `type`, or if a known type
    /// carries a payload of the wrong shape.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let raw: RawFrame = serde_json::from_value(value)?;

        match raw.kind.as_str() {
            "subscribe" | "unsubscribe" => {
                let data = raw.data.ok_or(ProtocolError::MissingData("subscriptions"))?;
                let request: SubscriptionRequest = serde_json::from_value(data)?;
                if raw.kind == "subscribe" {
                    Ok(ClientFrame::Subscribe {
                        request_id: raw.request_id,
                        subscriptions: request.subscriptions,
                    })
                } else {
                    Ok(ClientFrame::Unsubscribe {
                        request_id: raw.request_id,
                        subscriptions: request.subscriptions,
                    })
                }
            }
            "typing_start" | "typing_stop" => {
                let typing = match raw.data {
                    Some(data) => serde_json::from_value(data)?,
                    None => TypingRequest::default(),
                };
                Ok(ClientFrame::Typing {
                    started: raw.kind == "typing_start",
                    typing,
                })
            }
            _ => Ok(ClientFrame::Unknown(raw.kind)),
        }
    }
}
