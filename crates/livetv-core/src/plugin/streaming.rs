use async_trait::async_trait;

use super::{hosted_target, is_http, parse_url, Capability, HostContext, HostedFeed, Plugin, PluginContext};
use crate::error::ResolveError;
use crate::model::{Channel, LiveInfo};

/// Plain HTTP(S) media (flv, mp4, ...) handed to the player as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingPlugin;

#[async_trait]
impl Plugin for StreamingPlugin {
    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::HostFeed]
    }

    async fn resolve(
        &self,
        _ctx: &PluginContext<'_>,
        channel: &Channel,
        previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError> {
        let url = parse_url(&channel.url)?;
        if !is_http(&url) {
            return Err(ResolveError::NoLiveFeed(channel.url.clone()));
        }
        let extra = previous.map(|p| p.extra.clone()).unwrap_or_default();
        Ok(LiveInfo::new(url.to_string()).with_extra(extra))
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
