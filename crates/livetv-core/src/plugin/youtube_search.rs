use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, info};

use super::{parse_url, Plugin, PluginContext};
use crate::error::ResolveError;
use crate::fetch::RequestOptions;
use crate::model::{Channel, LiveInfo};

pub const DATA_API: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchItem {
    #[serde(default)]
    id: ItemId,
    #[serde(default)]
    snippet: Snippet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemId {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Clone, PartialEq)]
enum ChannelRef {
    Id(String),
    Name(String),
}

/// What a `ytb-live-search` source URL asks for.
#[derive(Debug, Clone, PartialEq)]
struct SearchQuery {
    channel: ChannelRef,
    keyword: String,
    parser: String,
}

impl SearchQuery {
    fn from_url(raw: &str) -> Result<Self, ResolveError> {
        let url = parse_url(raw)?;
        let (mut id, mut name, mut keyword) = (None, None, String::new());
        let mut parser = "youtube".to_string();
        for (key, value) in url.query_pairs() {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "id" => id = Some(value),
                "name" => name = Some(value),
                "keyword" => keyword = value,
                "parser" => parser = value,
                _ => {}
            }
        }
        let channel = match (id, name) {
            (Some(id), _) => ChannelRef::Id(id),
            (None, Some(name)) => ChannelRef::Name(name),
            (None, None) => return Err(ResolveError::invalid_url(raw, "missing channel id or name")),
        };
        if keyword.is_empty() {
            return Err(ResolveError::invalid_url(raw, "missing keyword"));
        }
        Ok(Self {
            channel,
            keyword,
            parser,
        })
    }
}

/// Finds a channel's current live video by title keyword and resolves it
/// with another plugin.
#[derive(Debug, Clone)]
pub struct YoutubeSearchPlugin {
    api_base: String,
    channel_ids: Arc<DashMap<String, String>>,
}

impl Default for YoutubeSearchPlugin {
    fn default() -> Self {
        Self {
            api_base: DATA_API.to_string(),
            channel_ids: Arc::new(DashMap::new()),
        }
    }
}

impl YoutubeSearchPlugin {
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn search(
        &self,
        ctx: &PluginContext<'_>,
        params: &[(&str, &str)],
        options: &RequestOptions,
    ) -> Result<SearchResponse, ResolveError> {
        let mut url = parse_url(&format!("{}/search", self.api_base))?;
        url.query_pairs_mut().extend_pairs(params);
        let page = ctx
            .fetcher
            .get_page(url.as_str(), options, ctx.config.max_playlist_bytes)
            .await?;
        if !page.status.is_success() {
            return Err(ResolveError::Fetch {
                url: format!("{}/search", self.api_base),
                reason: format!("Server response: HTTP {}", page.status.as_u16()),
                timeout: false,
            });
        }
        serde_json::from_str(&page.body)
            .map_err(|e| ResolveError::unsupported(&self.api_base, e.to_string()))
    }

    async fn channel_id(
        &self,
        ctx: &PluginContext<'_>,
        name: &str,
        key: &str,
        options: &RequestOptions,
    ) -> Result<String, ResolveError> {
        if let Some(id) = self.channel_ids.get(name) {
            return Ok(id.clone());
        }
        let response = self
            .search(
                ctx,
                &[
                    ("part", "snippet"),
                    ("type", "channel"),
                    ("q", name),
                    ("maxResults", "1"),
                    ("key", key),
                ],
                options,
            )
            .await?;
        let id = response
            .items
            .into_iter()
            .find_map(|item| item.id.channel_id)
            .ok_or_else(|| ResolveError::NoLiveFeed(format!("no channel named {}", name)))?;
        debug!(name, channel_id = %id, "Channel id looked up");
        self.channel_ids.insert(name.to_string(), id.clone());
        Ok(id)
    }
}

#[async_trait]
impl Plugin for YoutubeSearchPlugin {
    async fn resolve(
        &self,
        ctx: &PluginContext<'_>,
        channel: &Channel,
        previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError> {
        let query = SearchQuery::from_url(&channel.url)?;
        let key = ctx
            .config
            .youtube_api_key
            .as_deref()
            .ok_or_else(|| ResolveError::MissingConfig("youtube_api_key".to_string()))?;
        let options = RequestOptions::new().with_proxy(channel.proxy_url.as_deref());

        let channel_id = match &query.channel {
            ChannelRef::Id(id) => id.clone(),
            ChannelRef::Name(name) => self.channel_id(ctx, name, key, &options).await?,
        };

        let response = self
            .search(
                ctx,
                &[
                    ("part", "snippet"),
                    ("channelId", channel_id.as_str()),
                    ("eventType", "live"),
                    ("type", "video"),
                    ("key", key),
                ],
                &options,
            )
            .await?;
        let video_id = response
            .items
            .into_iter()
            .filter(|item| item.id.kind == "youtube#video")
            .find(|item| item.snippet.title.contains(&query.keyword))
            .and_then(|item| item.id.video_id)
            .ok_or_else(|| {
                ResolveError::NoLiveFeed(format!("no live video matching {}", query.keyword))
            })?;
        info!(source_url = %channel.url, video_id = %video_id, parser = %query.parser, "Live video found");

        let delegate = ctx.registry.get(&query.parser)?;
        let mut target = channel.clone();
        target.url = format!("https://www.youtube.com/watch?v={}", video_id);
        target.parser = query.parser;
        delegate.resolve(ctx, &target, previous).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::fetch::HttpFetcher;
    use crate::model::ChannelId;
    use crate::plugin::PluginRegistry;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Answers with the URL it was asked to resolve.
    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        async fn resolve(
            &self,
            _ctx: &PluginContext<'_>,
            channel: &Channel,
            _previous: Option<&LiveInfo>,
        ) -> Result<LiveInfo, ResolveError> {
            Ok(LiveInfo::new(channel.url.clone()))
        }
    }

    async fn resolve_with(
        plugin: &YoutubeSearchPlugin,
        config: RelayConfig,
        url: &str,
    ) -> Result<LiveInfo, ResolveError> {
        let fetcher = HttpFetcher::new(&config);
        let mut registry = PluginRegistry::new();
        registry.register("echo", 0, Arc::new(Echo));
        let ctx = PluginContext {
            fetcher: &fetcher,
            config: &config,
            registry: &registry,
        };
        plugin
            .resolve(&ctx, &Channel::new(ChannelId::root(4), "search", url), None)
            .await
    }

    fn live_results() -> serde_json::Value {
        serde_json::json!({
            "items": [
                {"id": {"kind": "youtube#video", "videoId": "aaaaaaaaaaa"}, "snippet": {"title": "Replay"}},
                {"id": {"kind": "youtube#video", "videoId": "bbbbbbbbbbb"}, "snippet": {"title": "News 24/7 Live"}}
            ]
        })
    }

    #[test]
    fn query_requires_channel_and_keyword() {
        assert!(SearchQuery::from_url("https://yt.search/?keyword=live").is_err());
        assert!(SearchQuery::from_url("https://yt.search/?id=UC1").is_err());
        let query = SearchQuery::from_url("https://yt.search/?name=News&keyword=Live").unwrap();
        assert_eq!(query.channel, ChannelRef::Name("News".to_string()));
        assert_eq!(query.parser, "youtube");
    }

    #[tokio::test]
    async fn missing_api_key_is_reported() {
        let err = resolve_with(
            &YoutubeSearchPlugin::default(),
            RelayConfig::default(),
            "https://yt.search/?id=UC1&keyword=Live",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ResolveError::MissingConfig(_)));
    }

    #[tokio::test]
    async fn name_is_looked_up_once_and_delegated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("type", "channel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": {"kind": "youtube#channel", "channelId": "UCnews"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("channelId", "UCnews"))
            .and(query_param("eventType", "live"))
            .respond_with(ResponseTemplate::new(200).set_body_json(live_results()))
            .mount(&server)
            .await;

        let plugin = YoutubeSearchPlugin::default().with_api_base(server.uri());
        let config = RelayConfig::default().with_youtube_api_key("k");
        let url = "https://yt.search/?name=News&keyword=Live&parser=echo";
        for _ in 0..2 {
            let info = resolve_with(&plugin, config.clone(), url).await.unwrap();
            assert_eq!(info.live_url, "https://www.youtube.com/watch?v=bbbbbbbbbbb");
        }
    }

    #[tokio::test]
    async fn no_matching_title_is_not_live() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(live_results()))
            .mount(&server)
            .await;
        let plugin = YoutubeSearchPlugin::default().with_api_base(server.uri());
        let config = RelayConfig::default().with_youtube_api_key("k");
        let err = resolve_with(&plugin, config, "https://yt.search/?id=UC1&keyword=Sports&parser=echo")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoLiveFeed(_)));
    }
}
