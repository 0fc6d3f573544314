use crate::errors::Error;

/// Platform chat id of a channel (numeric for Telegram).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub i64);

/// Message id, unique within its channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// Identity of a source message; runs for the same key are ordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.channel_id.0, self.message_id.0)
    }
}

/// Inbound post as delivered by the platform adapter, before validation.
#[derive(Clone, Debug, Default)]
pub struct InboundPost {
    pub channel_id: Option<ChannelId>,
    pub message_id: Option<MessageId>,
    pub text: Option<String>,
    pub is_edit: bool,
}

/// A validated channel post (new or edited).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostEvent {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub text: Option<String>,
    pub is_edit: bool,
}

impl PostEvent {
    pub fn key(&self) -> MessageKey {
        MessageKey {
            channel_id: self.channel_id,
            message_id: self.message_id,
        }
    }
}

impl TryFrom<InboundPost> for PostEvent {
    type Error = Error;

    fn try_from(raw: InboundPost) -> Result<Self, Self::Error> {
        let Some(channel_id) = raw.channel_id else {
            return Err(Error::MalformedEvent("missing channel_id".to_string()));
        };
        let Some(message_id) = raw.message_id else {
            return Err(Error::MalformedEvent("missing message_id".to_string()));
        };
        Ok(Self {
            channel_id,
            message_id,
            text: raw.text,
            is_edit: raw.is_edit,
        })
    }
}

/// The first numeral found in a text.
///
/// `start..end` is a byte range into the scanned text and always lies on
/// `char` boundaries.
#[derive(Clone, Debug, PartialEq)]
pub struct NumberMatch {
    pub start: usize,
    pub end: usize,
    pub raw: String,
    pub value: f64,
}

/// A composed message on its way to the target channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Source message this was derived from (for reporting).
    pub origin: MessageKey,
    pub channel_id: ChannelId,
    pub text: String,
    /// Transient failures seen so far; rate-limit waits do not count.
    pub retry_count: u32,
}

impl OutboundMessage {
    pub fn new(origin: MessageKey, channel_id: ChannelId, text: String) -> Self {
        Self {
            origin,
            channel_id,
            text,
            retry_count: 0,
        }
    }
}
