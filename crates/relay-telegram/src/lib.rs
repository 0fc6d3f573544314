//! Telegram adapter (teloxide).
//!
//! This crate implements the `relay-core` SendPort over the Telegram Bot API
//! and feeds channel posts into the core listener.

use async_trait::async_trait;

use teloxide::{prelude::*, types::Recipient, ApiError, RequestError};

pub mod router;

use relay_core::{
    config::ChannelRef,
    domain::{ChannelId, MessageId, MessageKey},
    errors::{Error, PlatformError, PlatformErrorKind},
    messaging::port::SendPort,
    Result,
};

#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(channel_id: ChannelId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(channel_id.0)
    }
}

#[async_trait]
impl SendPort for TelegramSender {
    async fn send_text(
        &self,
        channel_id: ChannelId,
        text: &str,
    ) -> std::result::Result<MessageKey, PlatformError> {
        // No parse mode: the composed text must arrive exactly as built.
        let msg = self
            .bot
            .send_message(Self::tg_chat(channel_id), text.to_string())
            .await
            .map_err(|e| map_request_error(&e))?;

        Ok(MessageKey {
            channel_id,
            message_id: MessageId(msg.id.0),
        })
    }
}

/// Translate a teloxide error into the platform-neutral form the classifier reads.
pub fn map_request_error(e: &RequestError) -> PlatformError {
    let kind = match e {
        RequestError::RetryAfter(secs) => PlatformErrorKind::RateLimited {
            retry_after: secs.duration(),
        },
        RequestError::Network(err) if err.is_timeout() => PlatformErrorKind::Timeout,
        RequestError::Network(_) | RequestError::Io(_) => PlatformErrorKind::Network,
        RequestError::InvalidJson { .. } => PlatformErrorKind::Server,
        // The target became a supergroup; the configured id is stale.
        RequestError::MigrateToChatId(_) => PlatformErrorKind::NotFound,
        RequestError::Api(api) => api_error_kind(api),
    };
    PlatformError::new(kind, e.to_string())
}

fn api_error_kind(api: &ApiError) -> PlatformErrorKind {
    match api {
        ApiError::ChatNotFound | ApiError::UserNotFound => PlatformErrorKind::NotFound,
        ApiError::BotBlocked
        | ApiError::BotKicked
        | ApiError::BotKickedFromSupergroup
        | ApiError::UserDeactivated
        | ApiError::NotEnoughRightsToPostMessages => PlatformErrorKind::PermissionDenied,
        ApiError::InvalidToken => PlatformErrorKind::Unauthorized,
        ApiError::MessageNotModified => PlatformErrorKind::NotModified,
        ApiError::MessageTextIsEmpty | ApiError::MessageIsTooLong => PlatformErrorKind::BadRequest,
        ApiError::Unknown(desc) if is_server_side(desc) => PlatformErrorKind::Server,
        _ => PlatformErrorKind::Unknown,
    }
}

/// Telegram reports 5xx responses as free-form descriptions.
fn is_server_side(desc: &str) -> bool {
    const MARKERS: [&str; 4] = [
        "Internal Server Error",
        "Bad Gateway",
        "Service Unavailable",
        "Gateway Timeout",
    ];
    MARKERS.iter().any(|m| desc.contains(m))
}

/// Resolve a configured channel to its chat id.
///
/// Numeric ids are taken as-is; usernames need a `getChat` round-trip.
pub async fn resolve_channel(bot: &Bot, channel: &ChannelRef) -> Result<ChannelId> {
    match channel {
        ChannelRef::Id(id) => Ok(ChannelId(*id)),
        ChannelRef::Username(name) => {
            let chat = bot
                .get_chat(Recipient::ChannelUsername(name.clone()))
                .await
                .map_err(|e| Error::External(format!("cannot resolve channel {name}: {e}")))?;
            Ok(ChannelId(chat.id.0))
        }
    }
}
