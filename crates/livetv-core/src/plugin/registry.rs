use std::collections::HashMap;
use std::sync::Arc;

use super::{
    AutoPlugin, FlvRemuxer, HttpPlugin, PlaylistMode, PlaylistPlugin, Plugin, RepeaterPlugin,
    RtmpPlugin, StreamingPlugin, YoutubePlugin, YoutubeSearchPlugin, YtDlpOAuthPlugin, YtDlpPlugin,
};
use crate::error::ResolveError;

struct Entry {
    priority: u32,
    plugin: Arc<dyn Plugin>,
}

/// Named plugins with a listing priority (lower first).
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Entry>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in plugin set. RTMP feeds are re-muxed through `remuxer`
    /// when one is given and redirected to otherwise.
    pub fn with_defaults(remuxer: Option<Arc<dyn FlvRemuxer>>) -> Self {
        let mut registry = Self::new();
        registry.register("http", 0, Arc::new(HttpPlugin));
        registry.register("auto", 1, Arc::new(AutoPlugin));
        registry.register("youtube", 2, Arc::new(YoutubePlugin::default()));
        registry.register("ytb-live-search", 2, Arc::new(YoutubeSearchPlugin::default()));
        registry.register("streaming", 3, Arc::new(StreamingPlugin));
        registry.register("rtmp", 3, Arc::new(RtmpPlugin::new(remuxer)));
        registry.register("playlist", 4, Arc::new(PlaylistPlugin::new(PlaylistMode::Positional)));
        registry.register("playlist-byname", 5, Arc::new(PlaylistPlugin::new(PlaylistMode::ByName)));
        registry.register("playlist-repeater", 5, Arc::new(PlaylistPlugin::new(PlaylistMode::Repeater)));
        registry.register("repeater", 6, Arc::new(RepeaterPlugin));
        registry.register("yt-dlp", 7, Arc::new(YtDlpPlugin));
        registry.register("yt-dlp-oauth", 8, Arc::new(YtDlpOAuthPlugin));
        registry
    }

    /// Registers `plugin` under `name`, replacing any previous holder.
    pub fn register(&mut self, name: impl Into<String>, priority: u32, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(name.into(), Entry { priority, plugin });
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Plugin>, ResolveError> {
        self.plugins
            .get(name)
            .map(|entry| entry.plugin.clone())
            .ok_or_else(|| ResolveError::PluginNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Plugin names ordered by priority, then name.
    pub fn names(&self) -> Vec<String> {
        let mut entries: Vec<_> = self
            .plugins
            .iter()
            .map(|(name, entry)| (entry.priority, name.clone()))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, name)| name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Capability;

    #[test]
    fn defaults_are_listed_by_priority() {
        let registry = PluginRegistry::with_defaults(None);
        assert_eq!(
            registry.names(),
            vec![
                "http",
                "auto",
                "youtube",
                "ytb-live-search",
                "rtmp",
                "streaming",
                "playlist",
                "playlist-byname",
                "playlist-repeater",
                "repeater",
                "yt-dlp",
                "yt-dlp-oauth",
            ]
        );
    }

    #[test]
    fn unknown_name_is_plugin_not_found() {
        let registry = PluginRegistry::with_defaults(None);
        let err = registry.get("nope").err().unwrap();
        assert!(matches!(err, ResolveError::PluginNotFound(name) if name == "nope"));
    }

    #[test]
    fn capabilities_are_queried_by_name() {
        let registry = PluginRegistry::with_defaults(None);
        let auto = registry.get("auto").unwrap();
        assert!(auto.supports(Capability::Detect));
        assert!(auto.supports(Capability::Resolve));
        assert!(!auto.supports(Capability::HostFeed));

        let playlist = registry.get("playlist-byname").unwrap();
        assert!(playlist.supports(Capability::EnumerateChildren));
        assert!(playlist.supports(Capability::LookupChild));
        assert!(registry.get("yt-dlp-oauth").unwrap().supports(Capability::ForgePlaylist));
        assert!(registry.get("youtube").unwrap().supports(Capability::HealthCheck));
    }
}
