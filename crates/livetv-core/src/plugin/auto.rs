use async_trait::async_trait;
use tracing::info;

use super::{follow_location, is_http, parse_url, Capability, Plugin, PluginContext};
use crate::error::ResolveError;
use crate::model::{Channel, LiveInfo};

const FALLBACK: &str = "streaming";

/// Content-type fragments mapped to the plugin that handles them.
const BY_CONTENT_TYPE: &[(&str, &str)] = &[
    ("mpegurl", "http"),
    ("text", "http"),
    ("flv", "streaming"),
    ("mp4", "streaming"),
];

/// Picks a concrete plugin from the URL scheme or the upstream content type.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoPlugin;

#[async_trait]
impl Plugin for AutoPlugin {
    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Detect]
    }

    async fn resolve(
        &self,
        _ctx: &PluginContext<'_>,
        channel: &Channel,
        _previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError> {
        Err(ResolveError::unsupported(
            &channel.url,
            "auto only detects, it does not resolve",
        ))
    }

    async fn detect(&self, ctx: &PluginContext<'_>, channel: &Channel) -> Result<String, ResolveError> {
        let url = parse_url(&channel.url)?;
        if url.scheme().eq_ignore_ascii_case("rtmp") {
            info!(source_url = %channel.url, plugin = "rtmp", "Detected by protocol");
            return Ok("rtmp".to_string());
        }
        if !is_http(&url) {
            return Ok("http".to_string());
        }

        let mut extra = channel.extra.clone();
        extra.redirect_counter = 0;
        let (response, _, _) = follow_location(ctx, channel, extra).await?;
        let plugin = BY_CONTENT_TYPE
            .iter()
            .find(|(fragment, _)| response.content_type.contains(fragment))
            .map(|(_, plugin)| *plugin)
            .unwrap_or(FALLBACK);
        info!(
            source_url = %channel.url,
            content_type = %response.content_type,
            plugin,
            "Detected by content type"
        );
        Ok(plugin.to_string())
    }
}
