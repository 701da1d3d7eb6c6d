use thiserror::Error;

/// All errors generated in `chartfeed-data`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("transient fetch failure for {symbol}: {message}")]
    Transport { symbol: String, message: String },

    #[error("no bar data available for the requested window")]
    NoData,

    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("invalid bar-history endpoint url: {0}")]
    Url(String),
}

impl FeedError {
    /// Construct a [`FeedError::Transport`] for one symbol's failed fetch.
    pub fn transport(symbol: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            symbol: symbol.into(),
            message: message.to_string(),
        }
    }

    /// Determine if an error is recoverable by simply waiting for the next poll tick.
    ///
    /// Transient errors are absorbed inside the engine: the failing tick is logged and
    /// treated as "no update", and the subscription keeps ticking on schedule.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transient(&self) -> bool {
        match self {
            FeedError::Transport { .. } => true,
            FeedError::NoData => true,
            _ => false,
        }
    }
}

impl From<url::ParseError> for FeedError {
    fn from(value: url::ParseError) -> Self {
        Self::Url(value.to_string())
    }
}
