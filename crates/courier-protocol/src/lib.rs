//! # courier-protocol
//!
//! Wire protocol definitions for the Courier realtime hub.
//!
//! Every message exchanged over a connection is an [`Envelope`] serialized
//! as a JSON text frame:
//!
//! ```json
//! { "type": "channel_message", "data": { ... }, "timestamp": "2024-05-01T12:00:00Z", "requestId": "42" }
//! ```
//!
//! ## Inbound control frames
//!
//! - `subscribe` / `unsubscribe` - Topic membership
//! - `typing_start` / `typing_stop` - Transient typing relay
//!
//! Anything else a client sends is decoded as [`ClientFrame::Unknown`] and
//! ignored by the server.
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, EventType, PresenceEventData};
//!
//! let bytes = codec::encode_event(
//!     EventType::UserOnline,
//!     &PresenceEventData { user_id: "alice".into(), is_online: true },
//! )
//! .unwrap();
//! let envelope = codec::decode(&bytes).unwrap();
//! assert_eq!(envelope.event, EventType::UserOnline);
//! ```

pub mod codec;
pub mod envelope;
pub mod events;
pub mod frames;

pub use codec::{decode, decode_client_frame, encode, encode_event, ProtocolError};
pub use envelope::{Envelope, EventType};
pub use events::{
    CallEventData, ChannelMessageEventData, ConnectedData, DmMessageEventData, DmReadEventData,
    PresenceEventData, SubscribedData, TypingEventData, VoiceStateUpdateEventData,
};
pub use frames::{ClientFrame, Subscription, SubscriptionRequest, TopicKind, TypingRequest};
