use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{parse_url, Capability, Plugin, PluginContext};
use crate::error::ResolveError;
use crate::fetch::RequestOptions;
use crate::listing;
use crate::model::{Channel, ChannelId, ExtraState, LiveInfo};

/// How enumerated children are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistMode {
    /// Children detect their own plugin.
    Positional,
    /// Children resolve with `http` and are addressable by `sid` digest.
    ByName,
    /// Children are served through `repeater`.
    Repeater,
}

impl PlaylistMode {
    fn child_parser(self) -> &'static str {
        match self {
            Self::Positional => "auto",
            Self::ByName => "http",
            Self::Repeater => "repeater",
        }
    }
}

/// A remote M3U or DIYP file fanning out into child channels.
#[derive(Debug, Clone, Copy)]
pub struct PlaylistPlugin {
    mode: PlaylistMode,
}

impl PlaylistPlugin {
    pub fn new(mode: PlaylistMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl Plugin for PlaylistPlugin {
    fn capabilities(&self) -> &'static [Capability] {
        match self.mode {
            PlaylistMode::Positional => &[Capability::EnumerateChildren, Capability::TransformRequest],
            PlaylistMode::ByName => &[Capability::EnumerateChildren, Capability::LookupChild],
            PlaylistMode::Repeater => &[Capability::EnumerateChildren],
        }
    }

    async fn resolve(
        &self,
        ctx: &PluginContext<'_>,
        channel: &Channel,
        _previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError> {
        parse_url(&channel.url)?;
        let options = RequestOptions::new()
            .with_proxy(channel.proxy_url.as_deref())
            .with_headers(&channel.extra.headers);
        let page = ctx
            .fetcher
            .get_page(channel.url.trim(), &options, ctx.config.max_playlist_bytes)
            .await?;
        if !page.status.is_success() {
            return Err(ResolveError::Fetch {
                url: page.final_url,
                reason: format!("Server response: HTTP {}", page.status.as_u16()),
                timeout: false,
            });
        }

        let children = listing::parse_any(&page.body).map_err(|e| {
            warn!(source_url = %channel.url, error = %e, "Unsupported playlist format");
            ResolveError::unsupported(&channel.url, format!("Unsupported playlist format: {}", e))
        })?;
        debug!(source_url = %channel.url, children = children.len(), "Playlist enumerated");

        Ok(LiveInfo::new("").with_extra(ExtraState {
            headers: channel.extra.headers.clone(),
            children,
            ..ExtraState::default()
        }))
    }

    fn children(&self, parent: &Channel, info: &LiveInfo) -> Vec<Channel> {
        let inherited = ExtraState {
            children: Vec::new(),
            ..parent.extra.clone()
        };
        info.extra
            .children
            .iter()
            .enumerate()
            .map(|(index, parsed)| {
                let mut child = Channel::new(
                    ChannelId::sub(parent.id.root, index),
                    parsed.name.clone(),
                    parsed.url.clone(),
                )
                .with_parser(self.mode.child_parser())
                .with_category(parsed.category.clone())
                .with_proxy(parent.proxy)
                .with_extra(inherited.clone());
                child.logo = parsed.logo.clone();
                child.ts_proxy = parent.ts_proxy.clone();
                child.proxy_url = parent.proxy_url.clone();
                if self.mode == PlaylistMode::ByName {
                    child.custom_query = Some(format!("sid={}", child.digest()));
                }
                child
            })
            .collect()
    }

    fn transform_request(&self, info: &LiveInfo, headers: &mut BTreeMap<String, String>) {
        for (name, value) in &info.extra.headers {
            headers.insert(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::fetch::HttpFetcher;
    use crate::plugin::PluginRegistry;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const M3U: &str = "#EXTM3U
#EXTINF:-1 tvg-logo=\"http://img/a.png\" group-title=\"News\",Alpha
http://a.example/alpha.m3u8
#EXTINF:-1,Beta
http://b.example/beta.m3u8
#EXTINF:-1,Gamma
rtmp://c.example/live/gamma
";

    async fn resolve_with(
        plugin: PlaylistPlugin,
        config: RelayConfig,
        body: &str,
    ) -> (Channel, Result<LiveInfo, ResolveError>) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list.m3u"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        let fetcher = HttpFetcher::new(&config);
        let registry = PluginRegistry::new();
        let ctx = PluginContext {
            fetcher: &fetcher,
            config: &config,
            registry: &registry,
        };
        let channel = Channel::new(ChannelId::root(7), "bundle", format!("{}/list.m3u", server.uri()))
            .with_parser("playlist")
            .with_proxy(true);
        let result = plugin.resolve(&ctx, &channel, None).await;
        (channel, result)
    }

    #[tokio::test]
    async fn fan_out_assigns_composite_ids() {
        let plugin = PlaylistPlugin::new(PlaylistMode::Positional);
        let (parent, info) = resolve_with(plugin, RelayConfig::default(), M3U).await;
        let info = info.unwrap();
        assert!(info.live_url.is_empty());

        let parent = parent.with_proxy_url("http://proxy.local:3128");
        let children = plugin.children(&parent, &info);
        let ids: Vec<_> = children.iter().map(|c| c.id.to_string()).collect();
        assert_eq!(ids, vec!["7-0", "7-1", "7-2"]);
        assert!(children.iter().all(|c| c.parser == "auto" && c.proxy));
        assert_eq!(children[0].logo, "http://img/a.png");
        assert_eq!(children[0].category, "News");
        assert_eq!(children[1].proxy_url.as_deref(), Some("http://proxy.local:3128"));
    }

    #[tokio::test]
    async fn by_name_children_carry_their_digest() {
        let plugin = PlaylistPlugin::new(PlaylistMode::ByName);
        let (parent, info) = resolve_with(plugin, RelayConfig::default(), M3U).await;
        let info = info.unwrap();
        let children = plugin.children(&parent, &info);
        assert!(children.iter().all(|c| c.parser == "http"));

        let beta = &children[1];
        let sid = beta.digest();
        assert_eq!(beta.custom_query.as_deref(), Some(format!("sid={}", sid).as_str()));
        let found = plugin.lookup_child(&parent, &info, &sid).unwrap();
        assert_eq!(found.name, "Beta");
        assert!(plugin.lookup_child(&parent, &info, "missing").is_none());
    }

    #[tokio::test]
    async fn repeater_children_use_repeater() {
        let plugin = PlaylistPlugin::new(PlaylistMode::Repeater);
        let (parent, info) = resolve_with(plugin, RelayConfig::default(), M3U).await;
        let children = plugin.children(&parent, &info.unwrap());
        assert!(children.iter().all(|c| c.parser == "repeater"));
    }

    #[tokio::test]
    async fn diyp_listing_is_accepted() {
        let plugin = PlaylistPlugin::new(PlaylistMode::Positional);
        let body = "体育,#genre#\nCCTV5,http://a/5.m3u8\nCCTV5,http://b/5.m3u8$备用\n";
        let (parent, info) = resolve_with(plugin, RelayConfig::default(), body).await;
        let children = plugin.children(&parent, &info.unwrap());
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].url, "http://b/5.m3u8");
        assert_eq!(children[1].category, "体育");
    }

    #[tokio::test]
    async fn oversized_playlist_is_rejected() {
        let plugin = PlaylistPlugin::new(PlaylistMode::Positional);
        let config = RelayConfig::default().with_max_playlist_bytes(32);
        let (_, info) = resolve_with(plugin, config, M3U).await;
        assert!(matches!(info, Err(ResolveError::ContentTooLarge { .. })));
    }

    #[tokio::test]
    async fn unknown_format_is_unsupported() {
        let plugin = PlaylistPlugin::new(PlaylistMode::Positional);
        let (_, info) = resolve_with(plugin, RelayConfig::default(), "<html></html>").await;
        assert!(matches!(info, Err(ResolveError::UnsupportedContent { .. })));
    }
}
