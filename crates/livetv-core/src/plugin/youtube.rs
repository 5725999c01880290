use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{Capability, Plugin, PluginContext};
use crate::error::ResolveError;
use crate::fetch::RequestOptions;
use crate::model::{Channel, ExtraState, LiveInfo};
use crate::playlist::best_variant;

pub const PLAYER_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/player?prettyPrint=false";

const CLIENT_VERSION: &str = "20.10.38";
const CLIENT_USER_AGENT: &str = "com.google.android.youtube/20.10.38 (Linux; U; Android 11) gzip";

static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtu\.be/|youtube(?:-nocookie)?\.com/(?:watch\?(?:.*&)?v=|embed/|live/|shorts/|v/))([\w-]{11})")
        .expect("video id pattern is a valid regex")
});
static META_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+itemprop="identifier"\s+content="(.+?)""#)
        .expect("identifier pattern is a valid regex")
});
static OWNER_THUMBNAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"owner":\{"videoOwnerRenderer":\{"thumbnail":\{"thumbnails":\[\{"url":"([^=]*)"#)
        .expect("thumbnail pattern is a valid regex")
});
static OG_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""og:url"\s*content="(.+?)""#).expect("og:url pattern is a valid regex")
});

/// The 11-character video id embedded in a watch, embed or short link.
pub fn video_id(url: &str) -> Option<&str> {
    VIDEO_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    #[serde(default)]
    streaming_data: StreamingData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    #[serde(default)]
    hls_manifest_url: String,
}

fn player_request(video_id: &str) -> serde_json::Value {
    json!({
        "context": {
            "client": {
                "clientName": "ANDROID",
                "clientVersion": CLIENT_VERSION,
                "userAgent": CLIENT_USER_AGENT,
                "osName": "Android",
                "osVersion": "11",
                "hl": "en",
                "timeZone": "UTC",
                "utcOffsetMinutes": 0
            }
        },
        "videoId": video_id,
        "playbackContext": {
            "contentPlaybackContext": {
                "html5Preference": "HTML5_PREF_WANTS",
                "signatureTimestamp": 20458
            }
        },
        "contentCheckOk": true,
        "racyCheckOk": true
    })
}

/// Fetches an HLS manifest and returns its best variant.
pub(crate) async fn fetch_best_variant(
    ctx: &PluginContext<'_>,
    manifest_url: &str,
    options: &RequestOptions,
) -> Result<String, ResolveError> {
    let page = ctx
        .fetcher
        .get_page(manifest_url, options, ctx.config.max_playlist_bytes)
        .await?;
    if !page.content_type.contains("mpegurl") {
        return Err(ResolveError::unsupported(
            manifest_url,
            format!("{} is unknown", page.content_type),
        ));
    }
    best_variant(&page.final_url, &page.body)
}

/// True when `url` serves a media playlist that is still growing.
pub(crate) async fn is_live(ctx: &PluginContext<'_>, url: &str, options: &RequestOptions) -> bool {
    match ctx
        .fetcher
        .get_page(url, options, ctx.config.max_playlist_bytes)
        .await
    {
        Ok(page) if page.content_type.contains("mpegurl") => !page.body.contains("#EXT-X-ENDLIST"),
        _ => false,
    }
}

/// Scrapes a watch or channel page and asks the player API for its HLS
/// manifest.
#[derive(Debug, Clone)]
pub struct YoutubePlugin {
    player_endpoint: String,
}

impl Default for YoutubePlugin {
    fn default() -> Self {
        Self {
            player_endpoint: PLAYER_ENDPOINT.to_string(),
        }
    }
}

impl YoutubePlugin {
    pub fn with_player_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.player_endpoint = endpoint.into();
        self
    }

    async fn parse_page(
        &self,
        ctx: &PluginContext<'_>,
        page_url: &str,
        proxy: Option<&str>,
    ) -> Result<LiveInfo, ResolveError> {
        let options = RequestOptions::new().with_proxy(proxy);
        let page = ctx
            .fetcher
            .get_page(page_url, &options, ctx.config.max_playlist_bytes)
            .await?;
        if !page.content_type.contains("html") {
            return Err(ResolveError::unsupported(page_url, "invalid url"));
        }

        let video = META_IDENTIFIER
            .captures(&page.body)
            .map(|c| c[1].to_string())
            .ok_or_else(|| ResolveError::NoLiveFeed(page_url.to_string()))?;
        debug!(page_url, video = %video, "Found video id");

        let api_options = options
            .clone()
            .with_header("User-Agent", CLIENT_USER_AGENT)
            .with_header("X-Youtube-Client-Name", "3")
            .with_header("X-Youtube-Client-Version", CLIENT_VERSION);
        let response = ctx
            .fetcher
            .post_json(&self.player_endpoint, &player_request(&video), &api_options)
            .await?;
        let body = response.read_limited(ctx.config.max_playlist_bytes).await?;
        let player: PlayerResponse = serde_json::from_str(&body)
            .map_err(|e| ResolveError::unsupported(&self.player_endpoint, e.to_string()))?;
        let manifest = player.streaming_data.hls_manifest_url;
        if manifest.is_empty() {
            return Err(ResolveError::NoLiveFeed(page_url.to_string()));
        }

        let live_url = fetch_best_variant(ctx, &manifest, &options).await?;
        if !is_live(ctx, &live_url, &options).await {
            return Err(ResolveError::NoLiveFeed(format!("{} is no longer streaming", page_url)));
        }

        let logo = OWNER_THUMBNAIL
            .captures(&page.body)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        let last_url = OG_URL.captures(&page.body).map(|c| c[1].to_string());
        if let Some(last_url) = &last_url {
            info!(page_url, last_url = %last_url, "Found the concrete video url");
        }

        Ok(LiveInfo::new(live_url).with_logo(logo).with_extra(ExtraState {
            last_url,
            ..ExtraState::default()
        }))
    }
}

#[async_trait]
impl Plugin for YoutubePlugin {
    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::HealthCheck]
    }

    async fn resolve(
        &self,
        ctx: &PluginContext<'_>,
        channel: &Channel,
        previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError> {
        let proxy = channel.proxy_url.as_deref();
        let last_url = previous.and_then(|p| p.extra.last_url.as_deref());
        if let (None, Some(last_url)) = (video_id(&channel.url), last_url) {
            match self.parse_page(ctx, last_url, proxy).await {
                Ok(info) => {
                    info!(source_url = %channel.url, last_url, "Reused last video url");
                    return Ok(info);
                }
                Err(e) => debug!(source_url = %channel.url, error = %e, "Last video url is stale"),
            }
        }
        self.parse_page(ctx, channel.url.trim(), proxy).await
    }

    fn health_check(&self, content: &str, _info: &LiveInfo) -> Result<(), ResolveError> {
        if content.contains("EXT-X-ENDLIST") {
            return Err(ResolveError::HealthCheckFailed("live ended".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::fetch::HttpFetcher;
    use crate::model::ChannelId;
    use crate::plugin::PluginRegistry;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LIVE_MEDIA: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:5\n#EXTINF:5.0,\n1.ts\n";

    fn watch_page(server: &MockServer, id: &str) -> String {
        format!(
            r#"<html><head><meta property="og:url" content="{uri}/watch?v={id}">
<meta itemprop="identifier" content="{id}"></head>
<script>var x = {{"owner":{{"videoOwnerRenderer":{{"thumbnail":{{"thumbnails":[{{"url":"https://yt3.example/avatar=s48"}}]}}}}}}}};</script></html>"#,
            uri = server.uri(),
            id = id
        )
    }

    async fn mount_live(server: &MockServer, page_path: &str, id: &str) {
        Mock::given(method("GET"))
            .and(path(page_path.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html; charset=utf-8")
                    .set_body_string(watch_page(server, id)),
            )
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/youtubei/v1/player"))
            .and(header("X-Youtube-Client-Name", "3"))
            .and(body_partial_json(json!({ "videoId": id })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "streamingData": { "hlsManifestUrl": format!("{}/hls/{}/master.m3u8", server.uri(), id) }
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/hls/{}/master.m3u8", id)))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/vnd.apple.mpegurl")
                    .set_body_string("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nlow.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2\nhigh.m3u8\n"),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/hls/{}/high.m3u8", id)))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/vnd.apple.mpegurl")
                    .set_body_string(LIVE_MEDIA),
            )
            .mount(server)
            .await;
    }

    async fn resolve(
        server: &MockServer,
        url: String,
        previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError> {
        let config = RelayConfig::default();
        let fetcher = HttpFetcher::new(&config);
        let registry = PluginRegistry::new();
        let ctx = PluginContext {
            fetcher: &fetcher,
            config: &config,
            registry: &registry,
        };
        let plugin = YoutubePlugin::default()
            .with_player_endpoint(format!("{}/youtubei/v1/player?prettyPrint=false", server.uri()));
        plugin
            .resolve(&ctx, &Channel::new(ChannelId::root(1), "yt", url), previous)
            .await
    }

    #[test]
    fn video_ids_are_extracted() {
        assert_eq!(video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), Some("dQw4w9WgXcQ"));
        assert_eq!(video_id("https://youtu.be/dQw4w9WgXcQ?t=3"), Some("dQw4w9WgXcQ"));
        assert_eq!(
            video_id("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(video_id("https://www.youtube.com/live/jfKfPfyJRdk"), Some("jfKfPfyJRdk"));
        assert_eq!(video_id("https://www.youtube.com/@SomeChannel/live"), None);
    }

    #[tokio::test]
    async fn page_resolves_to_live_variant() {
        let server = MockServer::start().await;
        mount_live(&server, "/@news/live", "abcdefghijk").await;

        let info = resolve(&server, format!("{}/@news/live", server.uri()), None)
            .await
            .unwrap();
        assert_eq!(info.live_url, format!("{}/hls/abcdefghijk/high.m3u8", server.uri()));
        assert_eq!(info.logo, "https://yt3.example/avatar");
        assert_eq!(
            info.extra.last_url,
            Some(format!("{}/watch?v=abcdefghijk", server.uri()))
        );
    }

    #[tokio::test]
    async fn last_url_is_tried_first_for_generic_pages() {
        let server = MockServer::start().await;
        mount_live(&server, "/watch", "lastvideo01").await;
        Mock::given(method("GET"))
            .and(path("/@news/live"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let previous = LiveInfo::new("old").with_extra(ExtraState {
            last_url: Some(format!("{}/watch?v=lastvideo01", server.uri())),
            ..ExtraState::default()
        });
        let info = resolve(&server, format!("{}/@news/live", server.uri()), Some(&previous))
            .await
            .unwrap();
        assert!(info.live_url.contains("/hls/lastvideo01/"));
    }

    #[tokio::test]
    async fn ended_manifest_is_not_live() {
        let server = MockServer::start().await;
        mount_live(&server, "/ended", "endedvideo1").await;
        Mock::given(method("GET"))
            .and(path("/hls/endedvideo1/high.m3u8"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/vnd.apple.mpegurl")
                    .set_body_string(format!("{}#EXT-X-ENDLIST\n", LIVE_MEDIA)),
            )
            .with_priority(1)
            .mount(&server)
            .await;

        let err = resolve(&server, format!("{}/ended", server.uri()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoLiveFeed(_)));
    }

    #[test]
    fn health_check_rejects_ended_lives() {
        let plugin = YoutubePlugin::default();
        let info = LiveInfo::new("x");
        assert!(plugin.health_check(LIVE_MEDIA, &info).is_ok());
        let ended = format!("{}#EXT-X-ENDLIST\n", LIVE_MEDIA);
        assert!(matches!(
            plugin.health_check(&ended, &info),
            Err(ResolveError::HealthCheckFailed(_))
        ));
    }
}
