use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{follow_location, is_http, parse_url, Capability, Plugin, PluginContext};
use crate::error::ResolveError;
use crate::model::{Channel, LiveInfo};
use crate::playlist::best_variant;

/// Follows `Location` hops, then treats the terminal body as HLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpPlugin;

#[async_trait]
impl Plugin for HttpPlugin {
    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::TransformRequest, Capability::TransformSegmentLink]
    }

    async fn resolve(
        &self,
        ctx: &PluginContext<'_>,
        channel: &Channel,
        _previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError> {
        let url = parse_url(&channel.url)?;
        if !is_http(&url) {
            return Ok(LiveInfo::new(channel.url.trim()));
        }

        let mut extra = channel.extra.clone();
        extra.redirect_counter = 0;
        let (response, current, extra) = follow_location(ctx, channel, extra).await?;

        if !response.is_playlist() {
            return Err(ResolveError::unsupported(
                &current,
                format!("Invalid feed: {}", response.content_type),
            ));
        }
        if !response.status.is_success() {
            return Err(ResolveError::Fetch {
                url: current,
                reason: format!("Server response: HTTP {}", response.status.as_u16()),
                timeout: false,
            });
        }

        let body = response.read_limited(ctx.config.max_playlist_bytes).await?;
        let live_url = best_variant(&current, &body).map_err(|e| {
            warn!(source_url = %channel.url, error = %e, "Terminal response is not a playable playlist");
            ResolveError::NoLiveFeed(channel.url.clone())
        })?;
        debug!(source_url = %channel.url, live_url, "Resolved by following");

        Ok(LiveInfo {
            live_url,
            logo: extra.logo.clone().unwrap_or_default(),
            plugin: String::new(),
            extra,
        })
    }

    fn transform_request(&self, info: &LiveInfo, headers: &mut BTreeMap<String, String>) {
        for (name, value) in &info.extra.headers {
            headers.insert(name.clone(), value.clone());
        }
    }

    /// Carries replay headers on each proxied link as `header<Name>=<value>`.
    fn transform_segment_link(&self, _raw: &str, link: String, info: &LiveInfo) -> String {
        if info.extra.headers.is_empty() {
            return link;
        }
        let Ok(mut url) = url::Url::parse(&link) else {
            return link;
        };
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in &info.extra.headers {
                query.append_pair(&format!("header{}", name), value);
            }
        }
        url.into()
    }
}
