use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Configuration shared by the resolver, the cache and the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Per-request timeout for upstream fetches and external tools (default: 10s).
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Upper bound for a whole feed request, reparse included (default: 30s).
    pub feed_deadline: Duration,
    /// Redirect hops followed before giving up (default: 5).
    pub max_redirects: u32,
    /// Largest playlist or page body accepted from upstream (default: 10 MiB).
    pub max_playlist_bytes: u64,
    /// Failures after which an unhealthy feed is no longer reparsed.
    pub max_retry_count: u32,
    pub max_cooldown_multiplier: u32,
    pub max_cooldown: Duration,
    /// Interval of the background refresh sweep (default: 3h).
    pub refresh_interval: Duration,
    pub max_concurrent_refreshes: usize,
    /// Lifetime of a rendered channel playlist (default: 3s).
    pub rendered_cache_ttl: Duration,
    pub user_agent: String,
    pub ytdl_cmd: String,
    /// Argument template for `ytdl_cmd`; `{url}` is replaced by the source URL.
    pub ytdl_args: String,
    pub youtube_api_key: Option<String>,
    /// Public base URL used as proxy prefix and in aggregate listings.
    pub base_url: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            feed_deadline: Duration::from_secs(30),
            max_redirects: 5,
            max_playlist_bytes: 10 * 1024 * 1024,
            max_retry_count: 5,
            max_cooldown_multiplier: 1024,
            max_cooldown: Duration::from_secs(120),
            refresh_interval: Duration::from_secs(3 * 60 * 60),
            max_concurrent_refreshes: 4,
            rendered_cache_ttl: Duration::from_secs(3),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            ytdl_cmd: "yt-dlp".to_string(),
            ytdl_args: "--extractor-args youtube:skip=dash -f b -g {url}".to_string(),
            youtube_api_key: None,
            base_url: "http://127.0.0.1:9000".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_feed_deadline(mut self, deadline: Duration) -> Self {
        self.feed_deadline = deadline;
        self
    }

    pub fn with_max_redirects(mut self, hops: u32) -> Self {
        self.max_redirects = hops;
        self
    }

    pub fn with_max_playlist_bytes(mut self, bytes: u64) -> Self {
        self.max_playlist_bytes = bytes;
        self
    }

    pub fn with_max_retry_count(mut self, count: u32) -> Self {
        self.max_retry_count = count;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_max_concurrent_refreshes(mut self, max: usize) -> Self {
        self.max_concurrent_refreshes = max.max(1);
        self
    }

    pub fn with_rendered_cache_ttl(mut self, ttl: Duration) -> Self {
        self.rendered_cache_ttl = ttl;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_ytdl(mut self, cmd: impl Into<String>, args: impl Into<String>) -> Self {
        self.ytdl_cmd = cmd.into();
        self.ytdl_args = args.into();
        self
    }

    pub fn with_youtube_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.youtube_api_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Cooldown enforced for a given backoff multiplier.
    pub fn cooldown_for(&self, multiplier: u32) -> Duration {
        Duration::from_secs(u64::from(multiplier)).min(self.max_cooldown)
    }
}
