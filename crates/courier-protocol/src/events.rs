//! Payload types carried in the `data` field of outbound envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frames::Subscription;

/// `connected` payload, sent only to the new connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedData {
    pub client_id: String,
    pub user_id: String,
}

/// `subscribed` payload listing the accepted subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribedData {
    pub subscriptions: Vec<Subscription>,
}

/// `user_online` / `user_offline` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEventData {
    pub user_id: String,
    pub is_online: bool,
}

/// `typing_start` / `typing_stop` payload as relayed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub user_handle: String,
    #[serde(default)]
    pub user_display_name: String,
    pub is_typing: bool,
}

/// Direct-message event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmMessageEventData {
    pub conversation_id: String,
    pub message: Value,
}

/// `dm_read` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmReadEventData {
    pub conversation_id: String,
    pub user_id: String,
    pub message_id: String,
}

/// Channel message event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessageEventData {
    pub channel_id: String,
    pub server_id: String,
    pub message: Value,
}

/// Voice/video call signalling payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEventData {
    pub call_id: String,
    pub caller_id: String,
    pub caller_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_avatar: Option<String>,
    pub callee_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee_name: Option<String>,
    /// `"voice"` or `"video"`.
    pub call_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
}

/// `voice_state_update` payload, routed to the owning server's topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStateUpdateEventData {
    pub server_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub user_handle: String,
    pub user_display_name: String,
    pub user_avatar: String,
    /// `"joined"` or `"left"`.
    pub action: String,
}
