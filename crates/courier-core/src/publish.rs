//! Typed publishing helpers.
//!
//! Application code (message handlers, call signalling, voice state) does
//! not speak envelopes directly. These helpers build the payload, encode it
//! once and route it through the hub's broadcast primitives.

use courier_protocol::{
    codec, CallEventData, ChannelMessageEventData, DmMessageEventData, DmReadEventData, EventType,
    ProtocolError, VoiceStateUpdateEventData,
};
use serde::Serialize;
use serde_json::Value;

use crate::hub::Hub;
use crate::topic::TopicKey;

impl Hub {
    /// Publish an event to every subscriber of a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` cannot be serialized.
    pub fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &TopicKey,
        event: EventType,
        data: &T,
    ) -> Result<(), ProtocolError> {
        let payload = codec::encode_event(event, data)?;
        self.broadcast_to_topic(topic, payload);
        Ok(())
    }

    /// Publish an event to every connection of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` cannot be serialized.
    pub fn publish_to_user<T: Serialize + ?Sized>(
        &self,
        user_id: &str,
        event: EventType,
        data: &T,
    ) -> Result<(), ProtocolError> {
        let payload = codec::encode_event(event, data)?;
        self.broadcast_to_user(user_id, payload);
        Ok(())
    }

    /// Publish a direct message event (`dm_message`, `dm_message_edited`,
    /// `dm_message_deleted`) to a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized.
    pub fn publish_dm_event(
        &self,
        conversation_id: &str,
        event: EventType,
        message: Value,
    ) -> Result<(), ProtocolError> {
        let data = DmMessageEventData {
            conversation_id: conversation_id.to_string(),
            message,
        };
        self.publish(&TopicKey::conversation(conversation_id), event, &data)
    }

    /// Publish a read receipt to a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt cannot be serialized.
    pub fn publish_dm_read(
        &self,
        conversation_id: &str,
        user_id: &str,
        message_id: &str,
    ) -> Result<(), ProtocolError> {
        let data = DmReadEventData {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            message_id: message_id.to_string(),
        };
        self.publish(
            &TopicKey::conversation(conversation_id),
            EventType::DmRead,
            &data,
        )
    }

    /// Publish a channel message event to a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized.
    pub fn publish_channel_event(
        &self,
        server_id: &str,
        channel_id: &str,
        event: EventType,
        message: Value,
    ) -> Result<(), ProtocolError> {
        let data = ChannelMessageEventData {
            channel_id: channel_id.to_string(),
            server_id: server_id.to_string(),
            message,
        };
        self.publish(&TopicKey::channel(channel_id), event, &data)
    }

    /// Publish a call signalling event to one user.
    ///
    /// # Errors
    ///
    /// Returns an error if the call payload cannot be serialized.
    pub fn publish_call_event(
        &self,
        user_id: &str,
        event: EventType,
        call: &CallEventData,
    ) -> Result<(), ProtocolError> {
        self.publish_to_user(user_id, event, call)
    }

    /// Publish a voice state change to the server it belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if the update cannot be serialized.
    pub fn publish_voice_state(&self, update: &VoiceStateUpdateEventData) -> Result<(), ProtocolError> {
        self.publish(
            &TopicKey::server(&update.server_id),
            EventType::VoiceStateUpdate,
            update,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, OutboundReceiver};
    use courier_protocol::{Envelope, TopicKind};
    use serde_json::json;

    fn connect(hub: &Hub, user: &str) -> (crate::ConnectionId, OutboundReceiver) {
        let (connection, mut rx) = Connection::with_capacity(user, 16);
        let id = hub.register(connection);
        while rx.try_recv().is_ok() {}
        (id, rx)
    }

    fn next(rx: &mut OutboundReceiver) -> Envelope {
        codec::decode(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn test_publish_dm_event() {
        let hub = Hub::new();
        let (alice, mut rx_alice) = connect(&hub, "alice");
        let (_bob, mut rx_bob) = connect(&hub, "bob");
        hub.subscribe(&alice, TopicKind::Conversation, "c-1");
        while rx_alice.try_recv().is_ok() {}

        hub.publish_dm_event("c-1", EventType::DmMessage, json!({"id": "m-1", "content": "hey"}))
            .unwrap();

        let envelope = next(&mut rx_alice);
        assert_eq!(envelope.event, EventType::DmMessage);
        assert_eq!(
            envelope.data,
            Some(json!({"conversationId": "c-1", "message": {"id": "m-1", "content": "hey"}}))
        );
        assert!(rx_bob.try_recv().is_err());
    }

    #[test]
    fn test_publish_dm_read() {
        let hub = Hub::new();
        let (alice, mut rx) = connect(&hub, "alice");
        hub.subscribe(&alice, TopicKind::Conversation, "c-1");

        hub.publish_dm_read("c-1", "bob", "m-9").unwrap();

        let envelope = next(&mut rx);
        assert_eq!(envelope.event, EventType::DmRead);
        assert_eq!(
            envelope.data,
            Some(json!({"conversationId": "c-1", "userId": "bob", "messageId": "m-9"}))
        );
    }

    #[test]
    fn test_publish_channel_event() {
        let hub = Hub::new();
        let (alice, mut rx) = connect(&hub, "alice");
        hub.subscribe(&alice, TopicKind::Channel, "general");

        hub.publish_channel_event("s-1", "general", EventType::ChannelMessageDeleted, json!({"id": "m-2"}))
            .unwrap();

        let envelope = next(&mut rx);
        assert_eq!(envelope.event, EventType::ChannelMessageDeleted);
        let data = envelope.data.unwrap();
        assert_eq!(data["channelId"], "general");
        assert_eq!(data["serverId"], "s-1");
    }

    #[test]
    fn test_publish_call_event_reaches_every_device() {
        let hub = Hub::new();
        let (_a1, mut rx1) = connect(&hub, "alice");
        let (_a2, mut rx2) = connect(&hub, "alice");
        while rx1.try_recv().is_ok() {}

        let call = CallEventData {
            call_id: "call-1".into(),
            caller_id: "bob".into(),
            caller_name: "Bob".into(),
            caller_avatar: None,
            callee_id: "alice".into(),
            callee_name: Some("Alice".into()),
            call_type: "voice".into(),
            room_name: None,
        };
        hub.publish_call_event("alice", EventType::CallIncoming, &call).unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let envelope = next(rx);
            assert_eq!(envelope.event, EventType::CallIncoming);
            assert_eq!(envelope.data_as::<CallEventData>().unwrap(), call);
        }
    }

    #[test]
    fn test_publish_voice_state_targets_server() {
        let hub = Hub::new();
        let (alice, mut rx_alice) = connect(&hub, "alice");
        let (_bob, mut rx_bob) = connect(&hub, "bob");
        hub.subscribe(&alice, TopicKind::Server, "s-1");

        let update = VoiceStateUpdateEventData {
            server_id: "s-1".into(),
            channel_id: "voice".into(),
            user_id: "carol".into(),
            user_handle: "carol".into(),
            user_display_name: "Carol".into(),
            user_avatar: String::new(),
            action: "join".into(),
        };
        hub.publish_voice_state(&update).unwrap();

        assert_eq!(next(&mut rx_alice).event, EventType::VoiceStateUpdate);
        assert!(rx_bob.try_recv().is_err());
    }
}
