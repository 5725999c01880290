use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{
    parse_url, Capability, FlvRemuxer, HostContext, HostedFeed, Plugin, PluginContext,
};
use crate::error::ResolveError;
use crate::fetch::RequestOptions;
use crate::model::{Channel, ExtraState, LiveInfo};

/// RTMP sources, given directly or behind one HTTP redirect.
#[derive(Clone, Default)]
pub struct RtmpPlugin {
    remuxer: Option<Arc<dyn FlvRemuxer>>,
}

impl RtmpPlugin {
    pub fn new(remuxer: Option<Arc<dyn FlvRemuxer>>) -> Self {
        Self { remuxer }
    }
}

fn is_rtmp(url: &url::Url) -> bool {
    url.scheme().eq_ignore_ascii_case("rtmp")
}

#[async_trait]
impl Plugin for RtmpPlugin {
    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::HostFeed]
    }

    async fn resolve(
        &self,
        ctx: &PluginContext<'_>,
        channel: &Channel,
        previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError> {
        let mut extra = previous.map(|p| p.extra.clone()).unwrap_or_default();
        if let Ok(url) = parse_url(&channel.url) {
            if is_rtmp(&url) {
                return Ok(LiveInfo::new(url.to_string()).with_extra(extra));
            }
        }

        let options = RequestOptions::new().with_proxy(channel.proxy_url.as_deref());
        let response = ctx.fetcher.get(channel.url.trim(), &options).await?;
        let location = response.location.clone();
        let body = response.read_limited(64 * 1024).await.unwrap_or_default();
        if let Ok(carried) = serde_json::from_str::<ExtraState>(&body) {
            if !carried.headers.is_empty() {
                extra = carried;
            }
        }

        let location = location.ok_or_else(|| ResolveError::NoLiveFeed(channel.url.clone()))?;
        match parse_url(&location) {
            Ok(url) if is_rtmp(&url) => Ok(LiveInfo::new(url.to_string()).with_extra(extra)),
            _ => Err(ResolveError::NoLiveFeed(channel.url.clone())),
        }
    }

    async fn host_feed(
        &self,
        _ctx: &HostContext<'_>,
        channel: &Channel,
        info: &LiveInfo,
    ) -> Result<HostedFeed, ResolveError> {
        let Some(remuxer) = &self.remuxer else {
            return Ok(HostedFeed::Redirect(info.live_url.clone()));
        };
        info!(channel_id = %channel.id, source_url = %info.live_url, "Start remuxing");
        let body = remuxer.open(&info.live_url).await?;
        Ok(HostedFeed::Stream {
            content_type: "video/x-flv".to_string(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::fetch::HttpFetcher;
    use crate::model::ChannelId;
    use crate::plugin::{ByteStream, PluginRegistry};
    use futures::StreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct EchoRemuxer;

    #[async_trait]
    impl FlvRemuxer for EchoRemuxer {
        async fn open(&self, rtmp_url: &str) -> Result<ByteStream, ResolveError> {
            let chunks = vec![Ok(b"FLV".to_vec()), Ok(rtmp_url.as_bytes().to_vec())];
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    async fn resolve(url: String) -> Result<LiveInfo, ResolveError> {
        let config = RelayConfig::default();
        let fetcher = HttpFetcher::new(&config);
        let registry = PluginRegistry::new();
        let ctx = PluginContext {
            fetcher: &fetcher,
            config: &config,
            registry: &registry,
        };
        RtmpPlugin::default()
            .resolve(&ctx, &Channel::new(ChannelId::root(1), "r", url), None)
            .await
    }

    #[tokio::test]
    async fn rtmp_url_resolves_to_itself() {
        let info = resolve("rtmp://live.example/app/key".into()).await.unwrap();
        assert_eq!(info.live_url, "rtmp://live.example/app/key");
    }

    #[tokio::test]
    async fn one_redirect_is_followed_to_rtmp() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/room/1"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", "rtmp://live.example/app/room1")
                    .set_body_string(r#"{"headers":{"Referer":"https://room.example/"}}"#),
            )
            .mount(&server)
            .await;
        let info = resolve(format!("{}/room/1", server.uri())).await.unwrap();
        assert_eq!(info.live_url, "rtmp://live.example/app/room1");
        assert_eq!(info.extra.headers["Referer"], "https://room.example/");
    }

    #[tokio::test]
    async fn http_redirect_is_not_live() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/room/2"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "https://elsewhere/"))
            .mount(&server)
            .await;
        let err = resolve(format!("{}/room/2", server.uri())).await.unwrap_err();
        assert!(matches!(err, ResolveError::NoLiveFeed(_)));
    }

    #[tokio::test]
    async fn remuxer_streams_flv() {
        let plugin = RtmpPlugin::new(Some(Arc::new(EchoRemuxer)));
        let channel = Channel::new(ChannelId::root(1), "r", "rtmp://a/b");
        let feed = plugin
            .host_feed(&HostContext { live_token: "" }, &channel, &LiveInfo::new("rtmp://a/b"))
            .await
            .unwrap();
        let HostedFeed::Stream { content_type, body } = feed else {
            panic!("expected a stream");
        };
        assert_eq!(content_type, "video/x-flv");
        let chunks: Vec<_> = body.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec![b"FLV".to_vec(), b"rtmp://a/b".to_vec()]);
    }

    #[tokio::test]
    async fn without_remuxer_the_player_is_redirected() {
        let channel = Channel::new(ChannelId::root(1), "r", "rtmp://a/b");
        let feed = RtmpPlugin::default()
            .host_feed(&HostContext { live_token: "" }, &channel, &LiveInfo::new("rtmp://a/b"))
            .await
            .unwrap();
        assert!(matches!(feed, HostedFeed::Redirect(url) if url == "rtmp://a/b"));
    }
}
