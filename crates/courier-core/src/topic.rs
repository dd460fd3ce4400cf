//! Topic keys.
//!
//! A topic is a fan-out destination identified by a kind and a target id,
//! rendered as `<kind>:<id>` (for example `channel:general`).

use courier_protocol::TopicKind;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum target id length.
pub const MAX_TARGET_ID_LENGTH: usize = 256;

/// Topic errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// Invalid target id.
    #[error("Invalid target id: {0}")]
    InvalidTarget(&'static str),

    /// Unknown topic kind.
    #[error("Unknown topic kind: {0}")]
    UnknownKind(String),

    /// Missing `:` separator.
    #[error("Malformed topic key: {0}")]
    Malformed(String),
}

/// Validate a target id.
///
/// # Errors
///
/// Returns an error message if the id is empty, too long or contains
/// control characters.
pub fn validate_target_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Target id cannot be empty");
    }
    if id.len() > MAX_TARGET_ID_LENGTH {
        return Err("Target id too long");
    }
    if id.chars().any(char::is_control) {
        return Err("Target id contains control characters");
    }
    Ok(())
}

/// A subscription key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey {
    kind: TopicKind,
    target: String,
}

impl TopicKey {
    /// Create a topic key without validating the target.
    #[must_use]
    pub fn new(kind: TopicKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }

    /// Create a topic key, validating the target id.
    ///
    /// # Errors
    ///
    /// Returns an error if the target id is invalid.
    pub fn try_new(kind: TopicKind, target: impl Into<String>) -> Result<Self, TopicError> {
        let target = target.into();
        validate_target_id(&target).map_err(TopicError::InvalidTarget)?;
        Ok(Self { kind, target })
    }

    /// The personal inbox topic of a user.
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::new(TopicKind::User, user_id)
    }

    #[must_use]
    pub fn conversation(conversation_id: impl Into<String>) -> Self {
        Self::new(TopicKind::Conversation, conversation_id)
    }

    #[must_use]
    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self::new(TopicKind::Channel, channel_id)
    }

    #[must_use]
    pub fn server(server_id: impl Into<String>) -> Self {
        Self::new(TopicKind::Server, server_id)
    }

    /// Get the topic kind.
    #[must_use]
    pub fn kind(&self) -> TopicKind {
        self.kind
    }

    /// Get the target id.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether this is the personal inbox of `user_id`.
    #[must_use]
    pub fn is_inbox_of(&self, user_id: &str) -> bool {
        self.kind == TopicKind::User && self.target == user_id
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.target)
    }
}

impl FromStr for TopicKey {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, target) = s
            .split_once(':')
            .ok_or_else(|| TopicError::Malformed(s.to_string()))?;
        let kind = kind
            .parse::<TopicKind>()
            .map_err(|_| TopicError::UnknownKind(kind.to_string()))?;
        Self::try_new(kind, target)
    }
}
