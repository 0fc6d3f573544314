use async_trait::async_trait;

use crate::{
    domain::{ChannelId, MessageKey},
    errors::PlatformError,
};

/// Outbound port to the messaging platform.
///
/// Telegram is the only implementation today; errors are reported as
/// `PlatformError` so the Forwarder can classify them without knowing the
/// platform.
#[async_trait]
pub trait SendPort: Send + Sync {
    /// Post `text` verbatim (no markup parsing) and return the new message.
    async fn send_text(&self, channel_id: ChannelId, text: &str)
        -> Result<MessageKey, PlatformError>;
}
