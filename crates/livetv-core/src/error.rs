use std::time::Duration;

use thiserror::Error;

use crate::codec::DecodeError;

/// Everything that can go wrong while turning a channel into a playable feed.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Fetch failed for {url}: {reason}")]
    Fetch {
        url: String,
        reason: String,
        timeout: bool,
    },
    #[error("Unsupported content from {url}: {reason}")]
    UnsupportedContent { url: String, reason: String },
    #[error("Content too large from {url}: {length} bytes")]
    ContentTooLarge { url: String, length: u64 },
    #[error("Too many redirections ({hops}) while resolving {url}")]
    RedirectLoopExceeded { url: String, hops: u32 },
    #[error("This channel is not currently live: {0}")]
    NoLiveFeed(String),
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),
    #[error("Parser cooling down, next attempt in {}s", remaining.as_secs())]
    CoolingDown { remaining: Duration },
    #[error("External tool {tool} failed: {reason}")]
    ExternalTool {
        tool: String,
        reason: String,
        output: String,
    },
    #[error("No matching plugin found: {0}")]
    PluginNotFound(String),
    #[error("Malformed token: {0}")]
    Decode(#[from] DecodeError),
    #[error("Channel {0} not found")]
    ChannelNotFound(String),
    #[error("Missing configuration: {0}")]
    MissingConfig(String),
    #[error("Channel store error: {0}")]
    Store(String),
}

impl ResolveError {
    pub fn fetch(url: &str, err: &reqwest::Error) -> Self {
        Self::Fetch {
            url: url.to_string(),
            reason: err.to_string(),
            timeout: err.is_timeout(),
        }
    }

    pub fn invalid_url(url: &str, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported(url: &str, reason: impl Into<String>) -> Self {
        Self::UnsupportedContent {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// Failures worth retrying later without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::CoolingDown { .. } | Self::HealthCheckFailed(_)
        )
    }

    /// Errors that mean "nothing here" to an HTTP caller.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ChannelNotFound(_) | Self::Decode(_) | Self::PluginNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooling_down_is_transient() {
        let err = ResolveError::CoolingDown {
            remaining: Duration::from_secs(4),
        };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Parser cooling down, next attempt in 4s");
    }

    #[test]
    fn decode_errors_read_as_not_found() {
        let err: ResolveError = DecodeError::Empty.into();
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }
}
