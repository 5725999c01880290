use async_trait::async_trait;
use tracing::debug;

use super::{hosted_target, is_http, parse_url, Capability, HostContext, HostedFeed, Plugin, PluginContext};
use crate::error::ResolveError;
use crate::fetch::RequestOptions;
use crate::model::{Channel, LiveInfo};
use crate::playlist::best_variant;

/// Resolves like a plain feed but answers players with a redirect instead
/// of a rewritten playlist.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepeaterPlugin;

#[async_trait]
impl Plugin for RepeaterPlugin {
    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::HostFeed]
    }

    async fn resolve(
        &self,
        ctx: &PluginContext<'_>,
        channel: &Channel,
        previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError> {
        let url = parse_url(&channel.url)?;
        if !is_http(&url) {
            return Ok(LiveInfo::new(channel.url.trim()));
        }
        let extra = previous.map(|p| p.extra.clone()).unwrap_or_default();

        let options = RequestOptions::new()
            .with_proxy(channel.proxy_url.as_deref())
            .following();
        let response = ctx.fetcher.get(url.as_str(), &options).await?;
        let final_url = response.final_url.clone();

        if response.content_type.contains("mpegurl") {
            let body = response.read_limited(ctx.config.max_playlist_bytes).await?;
            if let Ok(live_url) = best_variant(&final_url, &body) {
                debug!(source_url = %channel.url, live_url, "Repeating playlist");
                return Ok(LiveInfo::new(live_url).with_extra(extra));
            }
        } else if response.content_type.contains("video") {
            return Ok(LiveInfo::new(final_url).with_extra(extra));
        }
        Err(ResolveError::NoLiveFeed(channel.url.clone()))
    }

    async fn host_feed(
        &self,
        ctx: &HostContext<'_>,
        channel: &Channel,
        info: &LiveInfo,
    ) -> Result<HostedFeed, ResolveError> {
        Ok(HostedFeed::Redirect(hosted_target(ctx, channel, &info.live_url)))
    }
}
