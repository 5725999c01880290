//! Turns a channel into a [`LiveInfo`] through its plugin.

use tracing::{debug, info};

use crate::error::ResolveError;
use crate::model::{Channel, LiveInfo};
use crate::plugin::{Capability, PluginContext};

pub const DEFAULT_PARSER: &str = "youtube";

/// Resolves `channel`, running detection first when its plugin asks for it.
///
/// A detected plugin name is written back to `channel.parser` and recorded
/// as [`LiveInfo::plugin`], so later refreshes skip detection.
pub async fn resolve(
    ctx: &PluginContext<'_>,
    channel: &mut Channel,
    previous: Option<&LiveInfo>,
) -> Result<LiveInfo, ResolveError> {
    if channel.parser.trim().is_empty() {
        channel.parser = DEFAULT_PARSER.to_string();
    }

    let mut plugin = ctx.registry.get(&channel.parser)?;
    if plugin.supports(Capability::Detect) {
        let detected = plugin.detect(ctx, channel).await?;
        info!(channel_id = %channel.id, from = %channel.parser, to = %detected, "Parser detected");
        plugin = ctx.registry.get(&detected)?;
        channel.parser = detected;
    }

    debug!(channel_id = %channel.id, parser = %channel.parser, url = %channel.url, "Resolving");
    let mut info = plugin.resolve(ctx, channel, previous).await?;
    info.plugin = channel.parser.clone();
    Ok(info)
}
