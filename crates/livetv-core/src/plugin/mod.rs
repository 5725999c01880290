//! Resolver plugins and the registry that names them.
//!
//! Every plugin resolves; anything else it can do is declared through
//! [`Plugin::capabilities`] and queried by [`Capability`], never by type.

mod auto;
mod http;
mod playlist;
mod registry;
mod repeater;
mod rtmp;
mod streaming;
mod youtube;
mod youtube_search;
mod ytdlp;

use std::collections::BTreeMap;
use std::io;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use tracing::debug;

use crate::codec;
use crate::config::RelayConfig;
use crate::error::ResolveError;
use crate::fetch::{FetchResponse, HttpFetcher, RequestOptions};
use crate::model::{Channel, ExtraState, LiveInfo};
use crate::playlist::resolve_uri;

pub use auto::AutoPlugin;
pub use http::HttpPlugin;
pub use playlist::{PlaylistMode, PlaylistPlugin};
pub use registry::PluginRegistry;
pub use repeater::RepeaterPlugin;
pub use rtmp::RtmpPlugin;
pub use streaming::StreamingPlugin;
pub use youtube::YoutubePlugin;
pub use youtube_search::YoutubeSearchPlugin;
pub use ytdlp::{YtDlpOAuthPlugin, YtDlpPlugin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Resolve,
    Detect,
    EnumerateChildren,
    LookupChild,
    TransformRequest,
    HealthCheck,
    HostFeed,
    ForgePlaylist,
    TransformSegmentLink,
}

/// Everything a plugin may touch while resolving.
#[derive(Clone, Copy)]
pub struct PluginContext<'a> {
    pub fetcher: &'a HttpFetcher,
    pub config: &'a RelayConfig,
    pub registry: &'a PluginRegistry,
}

/// Where hosted feeds send players when they proxy.
#[derive(Debug, Clone, Copy)]
pub struct HostContext<'a> {
    pub live_token: &'a str,
}

pub type ByteStream = BoxStream<'static, io::Result<Vec<u8>>>;

/// A feed served directly instead of as a rewritten playlist.
pub enum HostedFeed {
    Redirect(String),
    Stream {
        content_type: String,
        body: ByteStream,
    },
}

impl std::fmt::Debug for HostedFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redirect(target) => f.debug_tuple("Redirect").field(target).finish(),
            Self::Stream { content_type, .. } => f
                .debug_struct("Stream")
                .field("content_type", content_type)
                .finish_non_exhaustive(),
        }
    }
}

/// A playlist synthesized by a plugin rather than fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct ForgedPlaylist {
    /// URL relative links in `content` resolve against.
    pub base_url: String,
    pub content: String,
}

/// Re-muxes an RTMP source into a chunked FLV body.
#[async_trait]
pub trait FlvRemuxer: Send + Sync {
    async fn open(&self, rtmp_url: &str) -> Result<ByteStream, ResolveError>;
}

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Optional capabilities beyond [`Capability::Resolve`].
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    fn supports(&self, capability: Capability) -> bool {
        capability == Capability::Resolve || self.capabilities().contains(&capability)
    }

    async fn resolve(
        &self,
        ctx: &PluginContext<'_>,
        channel: &Channel,
        previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError>;

    /// Name of the plugin that should resolve `channel`.
    async fn detect(&self, _ctx: &PluginContext<'_>, channel: &Channel) -> Result<String, ResolveError> {
        Err(ResolveError::unsupported(&channel.url, "plugin cannot detect"))
    }

    fn children(&self, _parent: &Channel, _info: &LiveInfo) -> Vec<Channel> {
        Vec::new()
    }

    fn lookup_child(&self, parent: &Channel, info: &LiveInfo, sid: &str) -> Option<Channel> {
        self.children(parent, info)
            .into_iter()
            .find(|child| child.digest() == sid)
    }

    fn transform_request(&self, _info: &LiveInfo, _headers: &mut BTreeMap<String, String>) {}

    fn health_check(&self, _content: &str, _info: &LiveInfo) -> Result<(), ResolveError> {
        Ok(())
    }

    async fn host_feed(
        &self,
        _ctx: &HostContext<'_>,
        channel: &Channel,
        _info: &LiveInfo,
    ) -> Result<HostedFeed, ResolveError> {
        Err(ResolveError::unsupported(&channel.url, "plugin cannot host feeds"))
    }

    fn forge_playlist(&self, info: &LiveInfo) -> Result<ForgedPlaylist, ResolveError> {
        Err(ResolveError::unsupported(&info.live_url, "plugin cannot forge playlists"))
    }

    fn transform_segment_link(&self, _raw: &str, link: String, _info: &LiveInfo) -> String {
        link
    }
}

pub(crate) fn is_http(url: &url::Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

pub(crate) fn parse_url(raw: &str) -> Result<url::Url, ResolveError> {
    url::Url::parse(raw.trim()).map_err(|e| ResolveError::invalid_url(raw, e))
}

/// Redirect target for a hosted feed, optionally through this server's
/// `/proxy` endpoint.
pub(crate) fn hosted_target(ctx: &HostContext<'_>, channel: &Channel, live_url: &str) -> String {
    if !channel.proxy {
        return live_url.to_string();
    }
    let mut target = format!(
        "{}/proxy?token={}&k={}",
        channel.ts_proxy.as_deref().unwrap_or_default(),
        ctx.live_token,
        codec::encode(live_url)
    );
    if let Some(proxy_url) = channel.proxy_url.as_deref().filter(|p| !p.is_empty()) {
        target.push_str("&proxy=");
        target.push_str(&url::form_urlencoded::byte_serialize(proxy_url.as_bytes()).collect::<String>());
    }
    target
}

/// Walks `Location` headers one hop at a time.
///
/// A redirect body that parses as carried state replaces the state for the
/// next hop. Returns the terminal response, its URL and the state that
/// reached it.
pub(crate) async fn follow_location(
    ctx: &PluginContext<'_>,
    channel: &Channel,
    mut extra: ExtraState,
) -> Result<(FetchResponse, String, ExtraState), ResolveError> {
    let mut current = channel.url.trim().to_string();
    loop {
        let options = RequestOptions::new()
            .with_proxy(channel.proxy_url.as_deref())
            .with_headers(&extra.headers);
        let response = ctx.fetcher.get(&current, &options).await?;
        let Some(location) = response.location.clone().filter(|_| response.is_redirect()) else {
            extra.redirect_counter = 0;
            return Ok((response, current, extra));
        };

        if extra.redirect_counter >= ctx.config.max_redirects {
            return Err(ResolveError::RedirectLoopExceeded {
                url: channel.url.clone(),
                hops: extra.redirect_counter + 1,
            });
        }

        let next = resolve_uri(&current, &location);
        let body = response.read_limited(64 * 1024).await.unwrap_or_default();
        let hops = extra.redirect_counter + 1;
        if let Ok(carried) = serde_json::from_str::<ExtraState>(&body) {
            extra = carried;
        }
        extra.redirect_counter = hops;
        debug!(from = %current, to = %next, hops, "Following redirect");
        current = next;
    }
}
