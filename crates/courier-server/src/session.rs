//! Connection sessions.
//!
//! A session owns one authenticated connection from registration to
//! teardown. It runs two pumps:
//!
//! - **Reader** (in the session task) - Decodes inbound control frames and
//!   applies them to the hub. Ends on close, transport error or idle timeout.
//! - **Writer** (spawned) - Drains the outbound queue onto the transport and
//!   sends keepalive pings. Ends when the queue closes or a write fails.
//!
//! Whichever pump ends first ends the session.

use bytes::Bytes;
use courier_core::{ConnectionId, ConnectionState, Hub, OutboundReceiver, TopicKey};
use courier_protocol::{
    codec, ClientFrame, ConnectedData, Envelope, EventType, SubscribedData, Subscription,
    TopicKind, TypingEventData, TypingRequest,
};
use courier_transport::{FrameReceiver, FrameSender, Inbound, TransportError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};

/// Floor for the keepalive period; `tokio::time::interval` panics on zero.
const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(100);

/// Per-session timing.
///
/// Queue sizing belongs to the hub, see [`courier_core::HubConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between keepalive pings.
    pub keepalive_interval: Duration,
    /// Maximum time without inbound traffic.
    pub idle_timeout: Duration,
    /// Bound on a single write, and on the final flush.
    pub write_timeout: Duration,
}

impl SessionConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            keepalive_interval: config.heartbeat.interval(),
            idle_timeout: config.heartbeat.timeout(),
            write_timeout: config.heartbeat.write_timeout(),
        }
    }
}

/// Run a session to completion.
///
/// Registers a connection for `user_id`, greets it with `connected`, pumps
/// frames in both directions and unregisters it when either side stops.
pub async fn run_session<S, R>(
    hub: Arc<Hub>,
    user_id: String,
    sender: S,
    mut receiver: R,
    config: SessionConfig,
) where
    S: FrameSender + 'static,
    R: FrameReceiver,
{
    let _metrics_guard = ConnectionMetricsGuard::new();
    let mut state = ConnectionState::Connecting;

    let (connection_id, outbound) = hub.connect(user_id.clone());
    advance(&mut state, ConnectionState::Registered, &connection_id);

    debug!(connection = %connection_id, user = %user_id, "Session started");

    let greeting = encode_greeting(&connection_id, &user_id);
    let mut writer = tokio::spawn(write_pump(
        sender,
        outbound,
        greeting,
        config.clone(),
        connection_id.clone(),
    ));

    let session = Session {
        hub: &hub,
        connection_id: &connection_id,
        user_id: &user_id,
    };

    let writer_finished = tokio::select! {
        () = read_pump(&mut receiver, &session, config.idle_timeout) => false,
        result = &mut writer => {
            log_writer_exit(&connection_id, result);
            true
        }
    };

    advance(&mut state, ConnectionState::Closing, &connection_id);

    // Closing the queue tells the writer to flush and send a close frame
    hub.unregister(&connection_id);

    if !writer_finished {
        match time::timeout(config.write_timeout, &mut writer).await {
            Ok(result) => log_writer_exit(&connection_id, result),
            Err(_) => {
                warn!(connection = %connection_id, "Writer did not flush in time, aborting");
                writer.abort();
            }
        }
    }

    advance(&mut state, ConnectionState::Closed, &connection_id);
    debug!(connection = %connection_id, user = %user_id, "Session closed");
}

fn advance(state: &mut ConnectionState, next: ConnectionState, connection_id: &ConnectionId) {
    let from = *state;
    let moved = state.transition(next);
    debug_assert!(moved, "invalid session transition {from:?} -> {next:?}");
    if moved {
        trace!(connection = %connection_id, from = ?from, to = ?next, "Session state");
    } else {
        warn!(connection = %connection_id, from = ?from, to = ?next, "Invalid session transition");
    }
}

fn encode_greeting(connection_id: &ConnectionId, user_id: &str) -> Option<Bytes> {
    let data = ConnectedData {
        client_id: connection_id.to_string(),
        user_id: user_id.to_string(),
    };
    match codec::encode_event(EventType::Connected, &data) {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!(connection = %connection_id, error = %e, "Failed to encode connected event");
            None
        }
    }
}

fn log_writer_exit(connection_id: &ConnectionId, result: Result<Result<(), TransportError>, JoinError>) {
    match result {
        Ok(Ok(())) => trace!(connection = %connection_id, "Writer finished"),
        Ok(Err(e)) => {
            debug!(connection = %connection_id, error = %e, "Writer failed");
            metrics::record_error("write");
        }
        Err(e) => error!(connection = %connection_id, error = %e, "Writer task panicked"),
    }
}

async fn timed<F>(limit: Duration, write: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    time::timeout(limit, write)
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// Drain the outbound queue onto the transport.
async fn write_pump<S: FrameSender>(
    mut sender: S,
    mut outbound: OutboundReceiver,
    greeting: Option<Bytes>,
    config: SessionConfig,
    connection_id: ConnectionId,
) -> Result<(), TransportError> {
    if let Some(greeting) = greeting {
        timed(config.write_timeout, sender.send_frame(greeting)).await?;
    }

    let period = config.keepalive_interval.max(MIN_KEEPALIVE_INTERVAL);
    let mut keepalive = time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = outbound.recv() => match item {
                Some(payload) => {
                    metrics::record_message(payload.len(), "outbound");
                    timed(config.write_timeout, sender.send_frame(payload)).await?;
                }
                None => {
                    debug!(connection = %connection_id, "Outbound queue closed");
                    return timed(config.write_timeout, sender.close()).await;
                }
            },
            _ = keepalive.tick() => {
                trace!(connection = %connection_id, "Keepalive ping");
                timed(config.write_timeout, sender.send_ping()).await?;
            }
        }
    }
}

/// Read inbound items until the connection ends.
async fn read_pump<R: FrameReceiver>(receiver: &mut R, session: &Session<'_>, idle_timeout: Duration) {
    loop {
        let item = match time::timeout(idle_timeout, receiver.recv()).await {
            Err(_) => {
                debug!(connection = %session.connection_id, "Idle timeout");
                metrics::record_error("idle_timeout");
                return;
            }
            Ok(Err(e)) => {
                debug!(connection = %session.connection_id, error = %e, "Read failed");
                metrics::record_error("read");
                return;
            }
            Ok(Ok(None)) => {
                debug!(connection = %session.connection_id, "Closed by peer");
                return;
            }
            Ok(Ok(Some(item))) => item,
        };

        match item {
            Inbound::Frame(data) => {
                metrics::record_message(data.len(), "inbound");
                session.handle_frame(&data);
            }
            Inbound::Ping | Inbound::Pong => {
                trace!(connection = %session.connection_id, "Keepalive");
            }
        }
    }
}

/// What the reader needs to apply frames to the hub.
struct Session<'a> {
    hub: &'a Hub,
    connection_id: &'a ConnectionId,
    user_id: &'a str,
}

impl Session<'_> {
    fn handle_frame(&self, data: &[u8]) {
        let frame = match codec::decode_client_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = %self.connection_id, error = %e, "Discarding malformed frame");
                metrics::record_error("protocol");
                return;
            }
        };

        match frame {
            ClientFrame::Subscribe {
                request_id,
                subscriptions,
            } => self.subscribe(request_id, subscriptions),
            ClientFrame::Unsubscribe { subscriptions, .. } => self.unsubscribe(&subscriptions),
            ClientFrame::Typing { started, typing } => self.relay_typing(started, typing),
            ClientFrame::Unknown(kind) => {
                debug!(connection = %self.connection_id, frame_type = %kind, "Ignoring frame");
            }
        }
    }

    /// Apply a `subscribe` frame and reply with the accepted entries.
    ///
    /// Refusing another user's inbox is a policy of this server, not of the
    /// hub: [`Hub::subscribe`] itself accepts any topic.
    fn subscribe(&self, request_id: Option<String>, subscriptions: Vec<Subscription>) {
        let mut accepted = Vec::with_capacity(subscriptions.len());

        for subscription in subscriptions {
            if subscription.kind == TopicKind::User && subscription.id != self.user_id {
                warn!(
                    connection = %self.connection_id,
                    target = %subscription.id,
                    "Refusing subscription to another user's inbox"
                );
                continue;
            }

            match TopicKey::try_new(subscription.kind, subscription.id.clone()) {
                Ok(topic) => {
                    self.hub.subscribe_topic(self.connection_id, topic);
                    accepted.push(subscription);
                }
                Err(e) => {
                    warn!(connection = %self.connection_id, error = %e, "Skipping subscription");
                }
            }
        }

        let envelope = match Envelope::with_data(
            EventType::Subscribed,
            &SubscribedData {
                subscriptions: accepted,
            },
        ) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connection = %self.connection_id, error = %e, "Failed to build reply");
                return;
            }
        };

        match request_id {
            Some(request_id) => self.reply(&envelope.with_request_id(request_id)),
            None => self.reply(&envelope),
        }
    }

    fn unsubscribe(&self, subscriptions: &[Subscription]) {
        for subscription in subscriptions {
            self.hub
                .unsubscribe(self.connection_id, subscription.kind, &subscription.id);
        }
    }

    fn relay_typing(&self, started: bool, typing: TypingRequest) {
        let conversation_id = typing.conversation_id.filter(|id| !id.is_empty());
        let channel_id = typing.channel_id.filter(|id| !id.is_empty());

        // A conversation target takes precedence over a channel
        let topic = match (&conversation_id, &channel_id) {
            (Some(id), _) => TopicKey::conversation(id.as_str()),
            (None, Some(id)) => TopicKey::channel(id.as_str()),
            (None, None) => {
                debug!(connection = %self.connection_id, "Typing frame without target");
                return;
            }
        };

        let event = if started {
            EventType::TypingStart
        } else {
            EventType::TypingStop
        };
        let data = TypingEventData {
            conversation_id,
            channel_id,
            user_id: self.user_id.to_string(),
            user_handle: typing.user_handle.unwrap_or_default(),
            user_display_name: typing.user_display_name.unwrap_or_default(),
            is_typing: started,
        };

        if let Err(e) = self.hub.publish(&topic, event, &data) {
            warn!(connection = %self.connection_id, error = %e, "Failed to relay typing");
        }
    }

    fn reply(&self, envelope: &Envelope) {
        match codec::encode(envelope) {
            Ok(payload) => {
                if !self.hub.send_to_connection(self.connection_id, payload) {
                    debug!(connection = %self.connection_id, "Reply dropped");
                }
            }
            Err(e) => warn!(connection = %self.connection_id, error = %e, "Failed to encode reply"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_transport::memory::{self, MemoryPeer, Outbound};
    use serde_json::json;
    use tokio::task::JoinHandle;

    fn test_config() -> SessionConfig {
        SessionConfig {
            keepalive_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }

    fn start(hub: &Arc<Hub>, user: &str, config: SessionConfig) -> (JoinHandle<()>, MemoryPeer) {
        start_with_buffer(hub, user, config, 64)
    }

    fn start_with_buffer(
        hub: &Arc<Hub>,
        user: &str,
        config: SessionConfig,
        buffer: usize,
    ) -> (JoinHandle<()>, MemoryPeer) {
        let (sender, receiver, peer) = memory::pair(buffer);
        let handle = tokio::spawn(run_session(
            Arc::clone(hub),
            user.to_string(),
            sender,
            receiver,
            config,
        ));
        (handle, peer)
    }

    /// Next envelope, skipping keepalive pings.
    async fn next_envelope(peer: &mut MemoryPeer) -> Envelope {
        loop {
            match peer.recv().await {
                Some(Outbound::Frame(data)) => return codec::decode(&data).unwrap(),
                Some(Outbound::Ping) => continue,
                other => panic!("expected a frame, got {other:?}"),
            }
        }
    }

    /// Next envelope of the given type, skipping everything else.
    async fn next_of(peer: &mut MemoryPeer, event: EventType) -> Envelope {
        loop {
            let envelope = next_envelope(peer).await;
            if envelope.event == event {
                return envelope;
            }
        }
    }

    #[tokio::test]
    async fn test_connected_is_first_frame() {
        let hub = Arc::new(Hub::new());
        let (_handle, mut peer) = start(&hub, "alice", test_config());

        let first = next_envelope(&mut peer).await;
        assert_eq!(first.event, EventType::Connected);
        let data: ConnectedData = first.data_as().unwrap();
        assert_eq!(data.user_id, "alice");
        assert_eq!(
            hub.user_connections("alice"),
            vec![ConnectionId::from(data.client_id)]
        );

        let second = next_envelope(&mut peer).await;
        assert_eq!(second.event, EventType::UserOnline);
        assert_eq!(second.data, Some(json!({"userId": "alice", "isOnline": true})));
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_close() {
        let hub = Arc::new(Hub::new());
        let (_handle, mut peer) = start(&hub, "alice", test_config());
        next_of(&mut peer, EventType::UserOnline).await;

        assert!(peer.send_text("not json").await);
        assert!(peer.send_text(r#"{"type":"subscribe"}"#).await);
        assert!(
            peer.send_text(
                r#"{"type":"subscribe","requestId":"1","data":{"subscriptions":[{"type":"channel","id":"general"}]}}"#
            )
            .await
        );

        let reply = next_of(&mut peer, EventType::Subscribed).await;
        assert_eq!(reply.request_id.as_deref(), Some("1"));
        assert_eq!(
            reply.data,
            Some(json!({"subscriptions": [{"type": "channel", "id": "general"}]}))
        );
        assert_eq!(hub.subscriber_count(&TopicKey::channel("general")), 1);
        assert!(hub.is_user_online("alice"));
    }

    #[tokio::test]
    async fn test_subscribe_filters_entries() {
        let hub = Arc::new(Hub::new());
        let (_handle, mut peer) = start(&hub, "alice", test_config());
        next_of(&mut peer, EventType::UserOnline).await;

        // Unknown kinds fail the whole frame
        assert!(
            peer.send_text(r#"{"type":"subscribe","requestId":"a","data":{"subscriptions":[{"type":"room","id":"x"}]}}"#)
                .await
        );
        assert!(
            peer.send_text(
                r#"{"type":"subscribe","requestId":"b","data":{"subscriptions":[
                    {"type":"user","id":"bob"},
                    {"type":"user","id":"alice"},
                    {"type":"channel","id":""},
                    {"type":"server","id":"s-1"}
                ]}}"#
            )
            .await
        );

        let reply = next_of(&mut peer, EventType::Subscribed).await;
        assert_eq!(reply.request_id.as_deref(), Some("b"));
        let data: SubscribedData = reply.data_as().unwrap();
        assert_eq!(
            data.subscriptions,
            vec![
                Subscription::new(TopicKind::User, "alice"),
                Subscription::new(TopicKind::Server, "s-1"),
            ]
        );
        assert_eq!(hub.subscriber_count(&TopicKey::user("bob")), 0);
        assert_eq!(hub.subscriber_count(&TopicKey::server("s-1")), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_frame() {
        let hub = Arc::new(Hub::new());
        let (_handle, mut peer) = start(&hub, "alice", test_config());
        next_of(&mut peer, EventType::UserOnline).await;

        peer.send_text(
            r#"{"type":"subscribe","data":{"subscriptions":[{"type":"conversation","id":"c-1"}]}}"#,
        )
        .await;
        next_of(&mut peer, EventType::Subscribed).await;
        assert_eq!(hub.subscriber_count(&TopicKey::conversation("c-1")), 1);

        peer.send_text(
            r#"{"type":"unsubscribe","data":{"subscriptions":[{"type":"conversation","id":"c-1"},{"type":"user","id":"alice"}]}}"#,
        )
        .await;
        // Subscribe again to fence the unsubscribe
        peer.send_text(r#"{"type":"subscribe","data":{"subscriptions":[]}}"#).await;
        next_of(&mut peer, EventType::Subscribed).await;

        assert_eq!(hub.subscriber_count(&TopicKey::conversation("c-1")), 0);
        assert_eq!(hub.subscriber_count(&TopicKey::user("alice")), 1);
    }

    #[tokio::test]
    async fn test_typing_is_relayed_as_sender() {
        let hub = Arc::new(Hub::new());
        let (_alice, mut alice) = start(&hub, "alice", test_config());
        let (_bob, mut bob) = start(&hub, "bob", test_config());
        next_of(&mut alice, EventType::Connected).await;

        bob.send_text(
            r#"{"type":"subscribe","data":{"subscriptions":[{"type":"conversation","id":"c-1"}]}}"#,
        )
        .await;
        next_of(&mut bob, EventType::Subscribed).await;

        alice
            .send_text(
                r#"{"type":"typing_start","data":{"conversationId":"c-1","channelId":"general","userId":"mallory","userHandle":"al"}}"#,
            )
            .await;

        let typing = next_of(&mut bob, EventType::TypingStart).await;
        let data: TypingEventData = typing.data_as().unwrap();
        assert_eq!(data.user_id, "alice");
        assert_eq!(data.user_handle, "al");
        assert_eq!(data.conversation_id.as_deref(), Some("c-1"));
        assert!(data.is_typing);

        alice
            .send_text(r#"{"type":"typing_stop","data":{"conversationId":"c-1"}}"#)
            .await;
        let stop = next_of(&mut bob, EventType::TypingStop).await;
        assert!(!stop.data_as::<TypingEventData>().unwrap().is_typing);
    }

    #[tokio::test]
    async fn test_typing_falls_back_to_channel() {
        let hub = Arc::new(Hub::new());
        let (_alice, mut alice) = start(&hub, "alice", test_config());
        let (_bob, mut bob) = start(&hub, "bob", test_config());
        next_of(&mut alice, EventType::Connected).await;

        bob.send_text(
            r#"{"type":"subscribe","data":{"subscriptions":[{"type":"channel","id":"general"}]}}"#,
        )
        .await;
        next_of(&mut bob, EventType::Subscribed).await;

        alice
            .send_text(
                r#"{"type":"typing_start","data":{"conversationId":"","channelId":"general"}}"#,
            )
            .await;

        let typing = next_envelope(&mut bob).await;
        assert_eq!(typing.event, EventType::TypingStart);
        let data: TypingEventData = typing.data_as().unwrap();
        assert_eq!(data.channel_id.as_deref(), Some("general"));
        assert_eq!(data.conversation_id, None);
        assert_eq!(data.user_id, "alice");
    }

    #[tokio::test]
    async fn test_typing_without_target_is_ignored() {
        let hub = Arc::new(Hub::new());
        let (_alice, mut alice) = start(&hub, "alice", test_config());
        let (_bob, mut bob) = start(&hub, "bob", test_config());
        next_of(&mut alice, EventType::Connected).await;

        bob.send_text(
            r#"{"type":"subscribe","data":{"subscriptions":[{"type":"channel","id":"general"}]}}"#,
        )
        .await;
        next_of(&mut bob, EventType::Subscribed).await;
        let delivered = hub.stats().messages_delivered;

        alice.send_text(r#"{"type":"typing_start"}"#).await;
        alice.send_text(r#"{"type":"typing_start","data":{}}"#).await;
        alice
            .send_text(r#"{"type":"typing_start","data":{"conversationId":""}}"#)
            .await;
        alice
            .send_text(r#"{"type":"typing_stop","data":{"channelId":"general"}}"#)
            .await;

        // Only the last frame has a target
        let next = next_envelope(&mut bob).await;
        assert_eq!(next.event, EventType::TypingStop);
        assert_eq!(hub.stats().messages_delivered, delivered + 1);
    }

    #[tokio::test]
    async fn test_transport_close_unregisters() {
        let hub = Arc::new(Hub::new());
        let (handle, mut peer) = start(&hub, "alice", test_config());
        next_of(&mut peer, EventType::UserOnline).await;

        peer.disconnect();
        handle.await.unwrap();

        assert_eq!(hub.connection_count(), 0);
        assert!(!hub.is_user_online("alice"));

        let mut saw_close = false;
        while let Some(item) = peer.try_recv() {
            saw_close |= item == Outbound::Close;
        }
        assert!(saw_close);
    }

    #[tokio::test]
    async fn test_hub_unregister_closes_session() {
        let hub = Arc::new(Hub::new());
        let (handle, mut peer) = start(&hub, "alice", test_config());
        let connected = next_of(&mut peer, EventType::Connected).await;
        let data: ConnectedData = connected.data_as().unwrap();

        assert!(hub.unregister(&ConnectionId::from(data.client_id)));

        loop {
            match peer.recv().await {
                Some(Outbound::Close) => break,
                Some(_) => continue,
                None => panic!("closed without a close frame"),
            }
        }
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_pings_on_interval() {
        let hub = Arc::new(Hub::new());
        let (_handle, mut peer) = start(&hub, "alice", test_config());
        next_of(&mut peer, EventType::UserOnline).await;

        let started = Instant::now();
        assert_eq!(peer.recv().await, Some(Outbound::Ping));
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert!(peer.send_pong().await);

        assert_eq!(peer.recv().await, Some(Outbound::Ping));
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        assert!(hub.is_user_online("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_keepalive_interval_is_clamped() {
        let hub = Arc::new(Hub::new());
        let config = SessionConfig {
            keepalive_interval: Duration::ZERO,
            ..test_config()
        };
        let (handle, mut peer) = start(&hub, "alice", config);
        next_of(&mut peer, EventType::UserOnline).await;

        let started = Instant::now();
        assert_eq!(peer.recv().await, Some(Outbound::Ping));
        assert_eq!(started.elapsed(), MIN_KEEPALIVE_INTERVAL);
        assert!(!handle.is_finished());
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_is_closed() {
        let hub = Arc::new(Hub::new());
        let (handle, _peer) = start(&hub, "alice", test_config());

        let started = Instant::now();
        handle.await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_writer_ends_session() {
        let hub = Arc::new(Hub::new());
        let config = SessionConfig {
            write_timeout: Duration::from_secs(1),
            ..test_config()
        };
        // The peer never reads, so the second frame cannot be written
        let (handle, _peer) = start_with_buffer(&hub, "alice", config, 1);

        let started = Instant::now();
        handle.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(hub.connection_count(), 0);
    }
}
