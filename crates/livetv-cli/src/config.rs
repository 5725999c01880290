//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:9000"
//! log_format = "json"
//! base_url = "https://tv.example.com"
//! secret = "change-me"
//!
//! [relay]
//! refresh_interval_secs = 10800
//! youtube_api_key = "AIza..."
//!
//! [[channel]]
//! id = 1
//! name = "News"
//! url = "https://cdn.example.com/news/index.m3u8"
//! parser = "http"
//! proxy = true
//!
//! [[channel]]
//! id = 2
//! name = "Bundle"
//! url = "https://lists.example.com/bundle.m3u"
//! parser = "playlist"
//! headers = { Referer = "https://lists.example.com/" }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use livetv_core::{Channel, ChannelId, ExtraState, PluginRegistry, RelayConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub relay: RelayOverrides,

    #[serde(default)]
    pub channel: Vec<ChannelDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Public URL players reach this server at.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Secret every access token is derived from.
    #[serde(default)]
    pub secret: String,

    #[serde(default)]
    pub disable_protection: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
            base_url: None,
            secret: String::new(),
            disable_protection: false,
        }
    }
}

pub fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}

fn default_log_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayOverrides {
    pub request_timeout_secs: Option<u64>,
    pub feed_deadline_secs: Option<u64>,
    pub max_redirects: Option<u32>,
    pub max_playlist_bytes: Option<u64>,
    pub max_retry_count: Option<u32>,
    pub refresh_interval_secs: Option<u64>,
    pub max_concurrent_refreshes: Option<usize>,
    pub rendered_cache_ttl_ms: Option<u64>,
    pub user_agent: Option<String>,
    pub ytdl_cmd: Option<String>,
    pub ytdl_args: Option<String>,
    pub youtube_api_key: Option<String>,
}

impl RelayOverrides {
    pub fn to_relay_config(&self, base_url: Option<&str>) -> RelayConfig {
        let mut c = RelayConfig::default();
        if let Some(v) = self.request_timeout_secs {
            c = c.with_request_timeout(Duration::from_secs(v));
        }
        if let Some(v) = self.feed_deadline_secs {
            c = c.with_feed_deadline(Duration::from_secs(v));
        }
        if let Some(v) = self.max_redirects {
            c = c.with_max_redirects(v);
        }
        if let Some(v) = self.max_playlist_bytes {
            c = c.with_max_playlist_bytes(v);
        }
        if let Some(v) = self.max_retry_count {
            c = c.with_max_retry_count(v);
        }
        if let Some(v) = self.refresh_interval_secs {
            c = c.with_refresh_interval(Duration::from_secs(v));
        }
        if let Some(v) = self.max_concurrent_refreshes {
            c = c.with_max_concurrent_refreshes(v);
        }
        if let Some(v) = self.rendered_cache_ttl_ms {
            c = c.with_rendered_cache_ttl(Duration::from_millis(v));
        }
        if let Some(ref v) = self.user_agent {
            c = c.with_user_agent(v.clone());
        }
        if self.ytdl_cmd.is_some() || self.ytdl_args.is_some() {
            let cmd = self.ytdl_cmd.clone().unwrap_or_else(|| c.ytdl_cmd.clone());
            let args = self.ytdl_args.clone().unwrap_or_else(|| c.ytdl_args.clone());
            c = c.with_ytdl(cmd, args);
        }
        if let Some(ref v) = self.youtube_api_key {
            c = c.with_youtube_api_key(v.clone());
        }
        if let Some(v) = base_url {
            c = c.with_base_url(v);
        }
        c
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDef {
    pub id: u64,
    pub name: String,
    pub url: String,
    #[serde(default = "default_parser")]
    pub parser: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub proxy: bool,
    pub ts_proxy: Option<String>,
    pub proxy_url: Option<String>,
    pub custom_query: Option<String>,
    /// Headers sent with every upstream request for this channel.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_parser() -> String {
    "auto".into()
}

impl ChannelDef {
    pub fn to_channel(&self) -> Channel {
        let mut channel = Channel::new(ChannelId::root(self.id), &self.name, &self.url)
            .with_parser(&self.parser)
            .with_category(&self.category)
            .with_proxy(self.proxy)
            .with_extra(ExtraState::default().with_headers(self.headers.clone()));
        if let Some(ref v) = self.ts_proxy {
            channel = channel.with_ts_proxy(v);
        }
        if let Some(ref v) = self.proxy_url {
            channel = channel.with_proxy_url(v);
        }
        channel.logo = self.logo.clone();
        channel.custom_query = self.custom_query.clone();
        channel
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn relay_config(&self) -> RelayConfig {
        self.relay.to_relay_config(self.server.base_url.as_deref())
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.channel.iter().map(ChannelDef::to_channel).collect()
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(ref base) = self.server.base_url {
            let parsed = url::Url::parse(base)
                .map_err(|e| format!("Invalid base_url: {} ({})", base, e))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(format!("base_url must use http or https: {}", base));
            }
        }

        let registry = PluginRegistry::with_defaults(None);
        let mut ids = HashSet::new();
        for c in &self.channel {
            if !ids.insert(c.id) {
                return Err(format!("Duplicate channel ID: {}", c.id));
            }
            if c.name.trim().is_empty() {
                return Err(format!("Channel {} has no name", c.id));
            }
            url::Url::parse(c.url.trim())
                .map_err(|e| format!("Invalid URL for channel {}: {} ({})", c.id, c.url, e))?;
            if !registry.contains(&c.parser) {
                return Err(format!("Unknown parser '{}' for channel {}", c.parser, c.id));
            }
            if let Some(ref proxy) = c.proxy_url {
                url::Url::parse(proxy).map_err(|e| {
                    format!("Invalid proxy_url for channel {}: {} ({})", c.id, proxy, e)
                })?;
            }
        }

        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
[[channel]]
id = 1
name = "News"
url = "https://example.com/live.m3u8"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.channel.len(), 1);
        assert_eq!(config.channel[0].parser, "auto");
        assert_eq!(config.server.log_format, "pretty");
        assert_eq!(config.server.listen.port(), 9000);
        assert!(config.server.secret.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[server]
listen = "127.0.0.1:9090"
log_format = "json"
base_url = "https://tv.example.com/"
secret = "s3cret"
disable_protection = true

[relay]
request_timeout_secs = 15
refresh_interval_secs = 600
rendered_cache_ttl_ms = 1500
ytdl_cmd = "/usr/local/bin/yt-dlp"
youtube_api_key = "key"

[[channel]]
id = 1
name = "News"
url = "https://cdn.example.com/news.m3u8"
parser = "http"
category = "News"
proxy = true
ts_proxy = "https://edge.example.com"

[[channel]]
id = 2
name = "Bundle"
url = "https://lists.example.com/bundle.m3u"
parser = "playlist"
proxy_url = "socks5://127.0.0.1:1080"
headers = { Referer = "https://lists.example.com/" }
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen.port(), 9090);
        assert!(config.server.disable_protection);

        let relay = config.relay_config();
        assert_eq!(relay.base_url, "https://tv.example.com");
        assert_eq!(relay.request_timeout, Duration::from_secs(15));
        assert_eq!(relay.refresh_interval, Duration::from_secs(600));
        assert_eq!(relay.rendered_cache_ttl, Duration::from_millis(1500));
        assert_eq!(relay.ytdl_cmd, "/usr/local/bin/yt-dlp");
        assert!(relay.ytdl_args.contains("{url}"));
        assert_eq!(relay.youtube_api_key.as_deref(), Some("key"));
        assert_eq!(relay.max_redirects, 5);

        let channels = config.channels();
        assert_eq!(channels[0].id, ChannelId::root(1));
        assert!(channels[0].proxy);
        assert_eq!(channels[0].ts_proxy.as_deref(), Some("https://edge.example.com"));
        assert_eq!(channels[1].proxy_url.as_deref(), Some("socks5://127.0.0.1:1080"));
        assert_eq!(
            channels[1].extra.headers.get("Referer").map(String::as_str),
            Some("https://lists.example.com/")
        );
    }

    #[test]
    fn validate_rejects_duplicate_channel_ids() {
        let toml = r#"
[[channel]]
id = 1
name = "a"
url = "https://a.com/a.m3u8"

[[channel]]
id = 1
name = "b"
url = "https://b.com/b.m3u8"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate channel ID"), "{}", err);
    }

    #[test]
    fn validate_rejects_unknown_parser() {
        let toml = r#"
[[channel]]
id = 1
name = "a"
url = "https://a.com/a.m3u8"
parser = "magic"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Unknown parser 'magic'"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_url() {
        let toml = r#"
[[channel]]
id = 1
name = "bad"
url = "not-a-url"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid URL for channel 1"), "{}", err);
    }

    #[test]
    fn validate_accepts_non_http_sources() {
        let toml = r#"
[[channel]]
id = 1
name = "cam"
url = "rtmp://cam.example/live/stream"
parser = "rtmp"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let toml = r#"
[server]
log_format = "xml"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log_format"), "{}", err);
    }
}
