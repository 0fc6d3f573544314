//! Error Classifier: decides how the Forwarder reacts to a platform error.

use std::time::Duration;

use crate::errors::{PlatformError, PlatformErrorKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Mandatory cool-down advised by the platform.
    RateLimited(Duration),
    /// Retry with backoff, counted against the retry budget.
    Transient,
    /// Retrying cannot help without outside intervention.
    Fatal,
    /// Not a failure from the relay's point of view; drop the message.
    Ignorable,
}

pub fn classify(err: &PlatformError) -> Classification {
    match &err.kind {
        PlatformErrorKind::RateLimited { retry_after } => Classification::RateLimited(*retry_after),
        PlatformErrorKind::Network | PlatformErrorKind::Timeout | PlatformErrorKind::Server => {
            Classification::Transient
        }
        PlatformErrorKind::NotModified => Classification::Ignorable,
        // Unknown errors are fatal: a blind retry may post the same text twice.
        PlatformErrorKind::PermissionDenied
        | PlatformErrorKind::NotFound
        | PlatformErrorKind::Unauthorized
        | PlatformErrorKind::BadRequest
        | PlatformErrorKind::Unknown => Classification::Fatal,
    }
}
