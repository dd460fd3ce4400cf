//! The message envelope.
//!
//! Envelopes are the uniform unit of data on the wire. The hub never looks
//! inside `data`; it only routes the serialized bytes.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Event type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Connection lifecycle
    Connected,
    Disconnected,
    Error,

    // Subscriptions
    Subscribe,
    Unsubscribe,
    Subscribed,

    // Presence
    UserOnline,
    UserOffline,
    PresenceSync,

    // Typing
    TypingStart,
    TypingStop,

    // Direct messages
    DmMessage,
    DmMessageEdited,
    DmMessageDeleted,
    DmRead,

    // Channels
    ChannelMessage,
    ChannelMessageEdited,
    ChannelMessageDeleted,

    // Servers
    ServerJoin,
    ServerLeave,
    MemberJoin,
    MemberLeave,

    Notification,

    // Call signalling
    CallIncoming,
    CallAccepted,
    CallRejected,
    CallEnded,
    CallMissed,

    // Voice
    VoiceStateUpdate,
}

impl EventType {
    /// Wire name of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Connected => "connected",
            EventType::Disconnected => "disconnected",
            EventType::Error => "error",
            EventType::Subscribe => "subscribe",
            EventType::Unsubscribe => "unsubscribe",
            EventType::Subscribed => "subscribed",
            EventType::UserOnline => "user_online",
            EventType::UserOffline => "user_offline",
            EventType::PresenceSync => "presence_sync",
            EventType::TypingStart => "typing_start",
            EventType::TypingStop => "typing_stop",
            EventType::DmMessage => "dm_message",
            EventType::DmMessageEdited => "dm_message_edited",
            EventType::DmMessageDeleted => "dm_message_deleted",
            EventType::DmRead => "dm_read",
            EventType::ChannelMessage => "channel_message",
            EventType::ChannelMessageEdited => "channel_message_edited",
            EventType::ChannelMessageDeleted => "channel_message_deleted",
            EventType::ServerJoin => "server_join",
            EventType::ServerLeave => "server_leave",
            EventType::MemberJoin => "member_join",
            EventType::MemberLeave => "member_leave",
            EventType::Notification => "notification",
            EventType::CallIncoming => "call_incoming",
            EventType::CallAccepted => "call_accepted",
            EventType::CallRejected => "call_rejected",
            EventType::CallEnded => "call_ended",
            EventType::CallMissed => "call_missed",
            EventType::VoiceStateUpdate => "voice_state_update",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Event type.
    #[serde(rename = "type")]
    pub event: EventType,
    /// Opaque event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Creation time, serialized as RFC3339.
    pub timestamp: DateTime<Utc>,
    /// Correlation id echoed from the request that caused this envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Envelope {
    /// Create an envelope without payload.
    #[must_use]
    pub fn new(event: EventType) -> Self {
        Self {
            event,
            data: None,
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    /// Create an envelope carrying `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` cannot be represented as JSON.
    pub fn with_data<T: Serialize + ?Sized>(
        event: EventType,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            data: Some(serde_json::to_value(data)?),
            ..Self::new(event)
        })
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Deserialize the payload into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is absent or has the wrong shape.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(self.data.clone().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(
            serde_json::to_value(EventType::DmMessageEdited).unwrap(),
            json!("dm_message_edited")
        );
        assert_eq!(
            serde_json::to_value(EventType::VoiceStateUpdate).unwrap(),
            json!("voice_state_update")
        );

        let parsed: EventType = serde_json::from_value(json!("call_missed")).unwrap();
        assert_eq!(parsed, EventType::CallMissed);
        assert_eq!(parsed.to_string(), "call_missed");
    }

    #[test]
    fn test_as_str_matches_serde() {
        let all = [
            EventType::Connected,
            EventType::Subscribed,
            EventType::UserOffline,
            EventType::PresenceSync,
            EventType::TypingStop,
            EventType::DmRead,
            EventType::ChannelMessageDeleted,
            EventType::MemberLeave,
            EventType::Notification,
            EventType::CallIncoming,
        ];
        for event in all {
            assert_eq!(serde_json::to_value(event).unwrap(), json!(event.as_str()));
        }
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = Envelope::with_data(EventType::Notification, &json!({"title": "hi"}))
            .unwrap()
            .with_request_id("req-1");

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["data"]["title"], "hi");
        assert_eq!(value["requestId"], "req-1");

        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn test_envelope_omits_empty_fields() {
        let value = serde_json::to_value(Envelope::new(EventType::Connected)).unwrap();
        assert!(value.get("data").is_none());
        assert!(value.get("requestId").is_none());
    }
}
