use serde_json::error::Category;

/// A fetched payload could not be turned into a [`Document`](crate::Document).
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload root is not a JSON object")]
    NotAnObject,

    #[error("\"matches\" is not an array")]
    MatchesNotArray,

    #[error("match at index {index} is not a JSON object")]
    MatchNotObject { index: usize },
}

/// An inbound control frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("invalid control message: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PayloadError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::NotAnObject => "not_an_object",
            Self::MatchesNotArray => "matches_not_array",
            Self::MatchNotObject { .. } => "match_not_object",
        }
    }
}

impl ControlError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Decode(e) => match e.classify() {
                Category::Syntax => "syntax",
                Category::Data => "data",
                Category::Eof => "eof",
                Category::Io => "io",
            },
        }
    }
}
