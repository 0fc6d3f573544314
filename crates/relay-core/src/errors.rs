use std::time::Duration;

/// Core error type for the relay.
///
/// Adapter crates map their specific errors into `PlatformError` (for sends)
/// or `Error::External` (for everything else) so the pipeline can handle
/// failures consistently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("send failed after {attempts} attempts: {source}")]
    TransientSendFailure {
        attempts: u32,
        #[source]
        source: PlatformError,
    },

    #[error("send failed permanently: {source}")]
    FatalSendFailure {
        #[source]
        source: PlatformError,
    },

    #[error("abandoned during shutdown")]
    Cancelled,

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Category name used when reporting failures to the operator.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "Config",
            Self::MalformedEvent(_) => "MalformedEvent",
            Self::TransientSendFailure { .. } => "TransientSendFailure",
            Self::FatalSendFailure { .. } => "FatalSendFailure",
            Self::Cancelled => "Cancelled",
            Self::External(_) => "External",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong on the platform side of a send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlatformErrorKind {
    /// Flood control; the platform asks us to wait before retrying.
    RateLimited { retry_after: Duration },
    Network,
    Timeout,
    /// 5xx or an unparseable response.
    Server,
    PermissionDenied,
    NotFound,
    Unauthorized,
    BadRequest,
    /// The request would not change anything (e.g. identical edit).
    NotModified,
    Unknown,
}

/// Error returned by the outbound port.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub message: String,
}

impl PlatformError {
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::new(
            PlatformErrorKind::RateLimited { retry_after },
            format!("retry after {}s", retry_after.as_secs()),
        )
    }
}
