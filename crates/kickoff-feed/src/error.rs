use std::time::Duration;

/// Fetching one document from upstream failed. Never retried; the next
/// cadence tick tries again.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Status { .. } => "status",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// A schedule string could not be understood.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CadenceError {
    #[error("empty schedule")]
    Empty,

    #[error("unsupported schedule {0:?}: expected \"@every <duration>\", \"@hourly\", \"@daily\" or \"@midnight\"")]
    Unsupported(String),

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("schedule interval must be positive")]
    ZeroInterval,

    #[error("duration {0:?} exceeds the maximum of 2562047h")]
    TooLong(String),
}
