//! The resolution cache and everything served from it.
//!
//! [`LiveService`] owns the per-URL [`LiveInfo`] cache, the health table,
//! the derived-channel cache and the rendered-playlist cache. Refreshes of
//! one source URL are serialized through [`KeyedLocks`]; unrelated sources
//! refresh concurrently.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::RelayConfig;
use crate::error::ResolveError;
use crate::fetch::{FetchResponse, HttpFetcher, RequestOptions};
use crate::listing::{self, ListingEntry};
use crate::lock::{KeyedLocks, RefreshScope};
use crate::model::{Channel, ChannelId, LiveInfo};
use crate::playlist::{rewrite, RewriteOptions};
use crate::plugin::{
    is_http, ByteStream, Capability, HostContext, HostedFeed, Plugin, PluginContext, PluginRegistry,
};
use crate::resolver;
use crate::status::{Status, StatusInfo, StatusTable};
use crate::store::{ChannelStore, TokenProvider};

/// What the feed endpoint answers with.
pub enum Feed {
    Playlist(String),
    Redirect(String),
    Stream {
        content_type: String,
        body: ByteStream,
    },
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Playlist(body) => f.debug_tuple("Playlist").field(&body.len()).finish(),
            Self::Redirect(target) => f.debug_tuple("Redirect").field(target).finish(),
            Self::Stream { content_type, .. } => f
                .debug_struct("Stream")
                .field("content_type", content_type)
                .finish_non_exhaustive(),
        }
    }
}

impl From<HostedFeed> for Feed {
    fn from(feed: HostedFeed) -> Self {
        match feed {
            HostedFeed::Redirect(target) => Self::Redirect(target),
            HostedFeed::Stream { content_type, body } => Self::Stream { content_type, body },
        }
    }
}

/// Outcome of one background sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
    /// Sources skipped because they are cooling down.
    pub skipped: usize,
    pub evicted: usize,
}

/// Upstream playlist text and the URL its relative links resolve against.
struct Fetched {
    body: String,
    base_url: String,
    info: LiveInfo,
}

fn vod_fallback(url: &str) -> String {
    format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXT-X-TARGETDURATION:1\n#EXTINF:-1,video\n{}\n#EXT-X-ENDLIST\n",
        url
    )
}

pub struct LiveService {
    config: RelayConfig,
    store: Arc<dyn ChannelStore>,
    tokens: Arc<dyn TokenProvider>,
    registry: Arc<PluginRegistry>,
    fetcher: HttpFetcher,
    live_cache: DashMap<String, LiveInfo>,
    status: StatusTable,
    channels: DashMap<ChannelId, Channel>,
    rendered: DashMap<ChannelId, (Instant, String)>,
    locks: KeyedLocks,
}

impl LiveService {
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn ChannelStore>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            fetcher: HttpFetcher::new(&config),
            status: StatusTable::from_config(&config),
            registry: Arc::new(PluginRegistry::with_defaults(None)),
            config,
            store,
            tokens,
            live_cache: DashMap::new(),
            channels: DashMap::new(),
            rendered: DashMap::new(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &HttpFetcher {
        &self.fetcher
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn status(&self) -> &StatusTable {
        &self.status
    }

    fn ctx(&self) -> PluginContext<'_> {
        PluginContext {
            fetcher: &self.fetcher,
            config: &self.config,
            registry: &self.registry,
        }
    }

    /// Plugin names ordered by registration priority.
    pub fn plugins(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn access_token(&self, id: &ChannelId) -> String {
        self.tokens.derive_access_token(id)
    }

    pub fn live_token(&self) -> String {
        self.tokens.live_token()
    }

    pub fn secret_token(&self) -> String {
        self.tokens.secret_token()
    }

    pub fn cached_info(&self, url: &str) -> Option<LiveInfo> {
        self.live_cache.get(url).map(|entry| entry.value().clone())
    }

    /// `source => live url` for every cached source, sorted by source.
    pub fn cache_snapshot(&self) -> Vec<(String, String)> {
        let mut all: Vec<_> = self
            .live_cache
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().live_url.clone()))
            .collect();
        all.sort();
        all
    }

    pub fn status_snapshot(&self) -> Vec<(String, StatusInfo)> {
        self.status.snapshot()
    }

    pub fn cache_len(&self) -> usize {
        self.live_cache.len()
    }

    fn plugin_for(&self, channel: &Channel, info: &LiveInfo) -> Result<Arc<dyn Plugin>, ResolveError> {
        if info.plugin.is_empty() {
            self.registry.get(&channel.parser)
        } else {
            self.registry.get(&info.plugin)
        }
    }

    /// Looks up a configured or derived channel.
    ///
    /// Root channels come from the store; derived ones are enumerated from
    /// their parent's cached resolution.
    pub async fn channel(&self, id: &ChannelId) -> Result<Channel, ResolveError> {
        if let Some(channel) = self.channels.get(id) {
            return Ok(channel.clone());
        }
        let root = self
            .store
            .get(id.root)
            .await?
            .ok_or_else(|| ResolveError::ChannelNotFound(id.to_string()))?;
        let root = self.with_children(root);
        for child in &root.children {
            self.channels.insert(child.id, child.clone());
        }
        self.channels.insert(root.id, root.clone());

        match id.sub {
            None => Ok(root),
            Some(index) => root
                .children
                .get(index)
                .cloned()
                .ok_or_else(|| ResolveError::ChannelNotFound(id.to_string())),
        }
    }

    /// Finds a derived channel of `parent` by its position-independent digest.
    pub async fn channel_by_digest(&self, parent: &ChannelId, sid: &str) -> Result<Channel, ResolveError> {
        let root = self.channel(&ChannelId::root(parent.root)).await?;
        let info = self
            .cached_info(&root.url)
            .ok_or_else(|| ResolveError::ChannelNotFound(format!("{}?sid={}", parent, sid)))?;
        let plugin = self.plugin_for(&root, &info)?;
        if !plugin.supports(Capability::LookupChild) {
            return Err(ResolveError::ChannelNotFound(format!("{}?sid={}", parent, sid)));
        }
        plugin
            .lookup_child(&root, &info, sid)
            .ok_or_else(|| ResolveError::ChannelNotFound(format!("{}?sid={}", parent, sid)))
    }

    fn with_children(&self, mut channel: Channel) -> Channel {
        let Some(info) = self.cached_info(&channel.url) else {
            return channel;
        };
        if let Ok(plugin) = self.plugin_for(&channel, &info) {
            if plugin.supports(Capability::EnumerateChildren) {
                channel.children = plugin.children(&channel, &info);
            }
        }
        if channel.logo.is_empty() {
            channel.logo = info.logo;
        }
        channel
    }

    /// Drops cached channel records (and their derived children).
    pub fn invalidate(&self, ids: &[ChannelId]) {
        let roots: HashSet<u64> = ids.iter().filter(|id| id.is_root()).map(|id| id.root).collect();
        let matches = |id: &ChannelId| ids.contains(id) || roots.contains(&id.root);
        self.channels.retain(|id, _| !matches(id));
        self.rendered.retain(|id, _| !matches(id));
    }

    pub fn invalidate_all(&self) {
        self.channels.clear();
        self.rendered.clear();
    }

    pub async fn save(&self, channel: Channel) -> Result<(), ResolveError> {
        let id = channel.id;
        self.store.save(channel).await?;
        self.invalidate(&[id]);
        Ok(())
    }

    pub async fn delete(&self, id: u64) -> Result<bool, ResolveError> {
        let removed = self.store.delete(id).await?;
        self.invalidate(&[ChannelId::root(id)]);
        Ok(removed)
    }

    /// The cached resolution of `channel`, resolving on a miss unless the
    /// source is cooling down. Concurrent misses on one source share a
    /// single resolution.
    pub async fn live_info(&self, channel: &Channel) -> Result<LiveInfo, ResolveError> {
        if let Some(ready) = self.cached_or_cooling(channel) {
            return ready;
        }
        let mut scope = RefreshScope::new(&self.locks);
        let key = channel.url.clone();
        let acquired = scope.acquire(&key).await;
        // Another caller may have resolved or failed while we waited.
        let result = match self.cached_or_cooling(channel) {
            Some(ready) => ready,
            None => self.refresh_locked(&mut scope, channel.clone(), true).await,
        };
        if acquired {
            scope.release(&key);
        }
        result
    }

    fn cached_or_cooling(&self, channel: &Channel) -> Option<Result<LiveInfo, ResolveError>> {
        if let Some(info) = self.cached_info(&channel.url) {
            return Some(Ok(info));
        }
        let remaining = self
            .status
            .cooldown_remaining(&channel.url, &self.config, Utc::now())?;
        debug!(source_url = %channel.url, remaining_secs = remaining.as_secs(), "Cooling down");
        Some(Err(ResolveError::CoolingDown { remaining }))
    }

    /// Resolves `channel` now, replacing its cache entry, then refreshes the
    /// channels it enumerates.
    pub async fn refresh(&self, channel: &Channel, update_status: bool) -> Result<LiveInfo, ResolveError> {
        let mut scope = RefreshScope::new(&self.locks);
        self.refresh_scoped(&mut scope, channel.clone(), update_status).await
    }

    fn refresh_scoped<'a>(
        &'a self,
        scope: &'a mut RefreshScope,
        channel: Channel,
        update_status: bool,
    ) -> BoxFuture<'a, Result<LiveInfo, ResolveError>> {
        async move {
            let key = channel.url.clone();
            let acquired = scope.acquire(&key).await;
            let result = self.refresh_locked(scope, channel, update_status).await;
            if acquired {
                scope.release(&key);
            }
            result
        }
        .boxed()
    }

    async fn refresh_locked(
        &self,
        scope: &mut RefreshScope,
        mut channel: Channel,
        update_status: bool,
    ) -> Result<LiveInfo, ResolveError> {
        let url = channel.url.clone();
        let parser = channel.parser.clone();
        let previous = self.cached_info(&url);
        info!(channel_id = %channel.id, source_url = %url, plugin = %parser, "Caching");

        let resolved = resolver::resolve(&self.ctx(), &mut channel, previous.as_ref())
            .await
            .and_then(|info| Ok((self.plugin_for(&channel, &info)?, info)));
        let (plugin, info) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                self.live_cache.remove(&url);
                self.status.record_failure(&url, &e.to_string());
                let status = self.status.get(&url);
                warn!(
                    channel_id = %channel.id,
                    source_url = %url,
                    retry_count = status.retry_count,
                    cooldown_multiplier = status.cooldown_multiplier,
                    error = %e,
                    "Resolution failed"
                );
                return Err(e);
            }
        };

        self.live_cache.insert(url.clone(), info.clone());
        if update_status {
            self.status.record_ok(&url, "Live!");
        }
        debug!(channel_id = %channel.id, source_url = %url, live_url = %info.live_url, "Cached");
        if channel.parser != parser && channel.id.is_root() {
            self.persist_parser(&channel).await;
        }
        self.invalidate(&[channel.id]);

        if plugin.supports(Capability::EnumerateChildren) {
            for child in plugin.children(&channel, &info) {
                // Failures are recorded in the status table.
                let _ = self.refresh_scoped(&mut *scope, child, update_status).await;
            }
        }
        Ok(info)
    }

    async fn persist_parser(&self, channel: &Channel) {
        let stored = match self.store.get(channel.id.root).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                warn!(channel_id = %channel.id, error = %e, "Failed to load channel");
                return;
            }
        };
        let updated = Channel {
            parser: channel.parser.clone(),
            ..stored
        };
        match self.store.save(updated).await {
            Ok(()) => info!(channel_id = %channel.id, plugin = %channel.parser, "Parser persisted"),
            Err(e) => warn!(channel_id = %channel.id, error = %e, "Failed to persist parser"),
        }
    }

    /// Re-resolves every configured channel and evicts sources that are no
    /// longer configured.
    pub async fn refresh_all(&self) -> Result<RefreshSummary, ResolveError> {
        let channels = self.store.list().await?;
        let concurrency = self.config.max_concurrent_refreshes.max(1);
        let now = Utc::now();

        let outcomes: Vec<Option<bool>> = stream::iter(channels.iter().cloned())
            .map(|channel| async move {
                if self
                    .status
                    .cooldown_remaining(&channel.url, &self.config, now)
                    .is_some()
                    && self.cached_info(&channel.url).is_none()
                {
                    debug!(source_url = %channel.url, "Skipping source in cooldown");
                    return None;
                }
                Some(self.refresh(&channel, true).await.is_ok())
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut summary = RefreshSummary::default();
        for outcome in outcomes {
            match outcome {
                Some(true) => summary.refreshed += 1,
                Some(false) => summary.failed += 1,
                None => summary.skipped += 1,
            }
        }

        let mut keep: HashSet<String> = HashSet::new();
        for channel in channels {
            for child in self.with_children(channel.clone()).children {
                keep.insert(child.url);
            }
            keep.insert(channel.url);
        }
        let before = self.live_cache.len();
        self.live_cache.retain(|url, _| keep.contains(url));
        summary.evicted = before - self.live_cache.len();
        let removed = self.status.evict_unlisted(|url| keep.contains(url));
        self.invalidate_all();

        info!(
            refreshed = summary.refreshed,
            failed = summary.failed,
            skipped = summary.skipped,
            evicted = summary.evicted,
            statuses_removed = removed.len(),
            "Refresh sweep finished"
        );
        Ok(summary)
    }

    /// Runs [`refresh_all`](Self::refresh_all) now and then every
    /// `refresh_interval`, with jitter.
    pub fn spawn_refresh_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.refresh_all().await {
                    warn!(error = %e, "Refresh sweep failed");
                }

                let base_ms = self.config.refresh_interval.as_millis() as u64;
                let jitter_range = base_ms / 7;
                let jitter = if jitter_range > 0 {
                    rand::thread_rng().gen_range(0..jitter_range * 2) as i64 - jitter_range as i64
                } else {
                    0
                };
                let sleep_ms = (base_ms as i64 + jitter).max(1) as u64;
                tokio::time::sleep(tokio::time::Duration::from_millis(sleep_ms)).await;
            }
        })
    }

    /// The playable feed of `channel`, within `feed_deadline`.
    pub async fn feed(&self, channel: &Channel) -> Result<Feed, ResolveError> {
        match tokio::time::timeout(self.config.feed_deadline, self.feed_inner(channel)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Fetch {
                url: channel.url.clone(),
                reason: "feed deadline exceeded".to_string(),
                timeout: true,
            }),
        }
    }

    async fn feed_inner(&self, channel: &Channel) -> Result<Feed, ResolveError> {
        if !channel.is_playable() {
            return Err(ResolveError::NoLiveFeed(format!("{} is a channel group", channel.id)));
        }
        if let Some(entry) = self.rendered.get(&channel.id) {
            let (rendered_at, body) = entry.value();
            if rendered_at.elapsed() < self.config.rendered_cache_ttl {
                return Ok(Feed::Playlist(body.clone()));
            }
        }

        let info = self.live_info(channel).await?;
        let plugin = self.plugin_for(channel, &info)?;
        if plugin.supports(Capability::HostFeed) {
            let live_token = self.live_token();
            let ctx = HostContext {
                live_token: &live_token,
            };
            return plugin.host_feed(&ctx, channel, &info).await.map(Feed::from);
        }
        if info.live_url.is_empty() {
            return Err(ResolveError::NoLiveFeed(channel.url.clone()));
        }
        match url::Url::parse(&info.live_url) {
            Ok(live) if is_http(&live) => {}
            _ => return Ok(Feed::Redirect(info.live_url.clone())),
        }

        let fetched = if plugin.supports(Capability::ForgePlaylist) {
            let forged = plugin.forge_playlist(&info)?;
            Fetched {
                body: forged.content,
                base_url: forged.base_url,
                info,
            }
        } else {
            self.fetch_content(channel, info, false).await?
        };

        let plugin = self.plugin_for(channel, &fetched.info)?;
        let rendered = self.render(channel, plugin.as_ref(), &fetched);
        if rendered.is_empty() {
            return Err(ResolveError::unsupported(&fetched.base_url, "playlist could not be parsed"));
        }
        self.rendered
            .insert(channel.id, (Instant::now(), rendered.clone()));
        Ok(Feed::Playlist(rendered))
    }

    fn render(&self, channel: &Channel, plugin: &dyn Plugin, fetched: &Fetched) -> String {
        let prefix = channel
            .ts_proxy
            .clone()
            .unwrap_or_else(|| self.config.base_url.clone());
        let token = self.live_token();
        let info = &fetched.info;
        let hook = |raw: &str, link: String| plugin.transform_segment_link(raw, link, info);
        let mut options = RewriteOptions::new(&prefix, &token).with_proxy(channel.proxy);
        if plugin.supports(Capability::TransformSegmentLink) {
            options = options.with_hook(&hook);
        }
        rewrite(&fetched.base_url, &fetched.body, options)
    }

    /// Fetches the upstream playlist of a resolved channel.
    ///
    /// A bad response or failed health check forces one reparse per request
    /// while the source's retry count is below `max_retry_count`. Content
    /// that is not HLS is wrapped in a one-entry VOD playlist.
    fn fetch_content<'a>(
        &'a self,
        channel: &'a Channel,
        info: LiveInfo,
        retried: bool,
    ) -> BoxFuture<'a, Result<Fetched, ResolveError>> {
        async move {
            let plugin = self.plugin_for(channel, &info)?;
            let mut headers = BTreeMap::new();
            if plugin.supports(Capability::TransformRequest) {
                plugin.transform_request(&info, &mut headers);
            }
            let options = RequestOptions::new()
                .with_proxy(channel.proxy_url.as_deref())
                .with_headers(&headers)
                .following();
            let response = self.fetcher.get(&info.live_url, &options).await?;
            let base_url = response.final_url.clone();

            if response.status != reqwest::StatusCode::OK {
                let cause = ResolveError::Fetch {
                    url: info.live_url.clone(),
                    reason: format!("Server response: HTTP {}", response.status.as_u16()),
                    timeout: false,
                };
                return self.reparse(channel, retried, cause).await;
            }

            let body = if response.is_playlist() {
                response.read_limited(self.config.max_playlist_bytes).await?
            } else {
                String::new()
            };
            let body = body.trim();
            if !body.starts_with("#EXTM3U") {
                self.status.record_warning(&channel.url, "Url is not a live stream");
                info!(source_url = %channel.url, live_url = %info.live_url, "Not a live stream, serving as VOD");
                return Ok(Fetched {
                    body: vod_fallback(&info.live_url),
                    base_url,
                    info,
                });
            }

            if plugin.supports(Capability::HealthCheck) {
                if let Err(cause) = plugin.health_check(body, &info) {
                    return self.reparse(channel, retried, cause).await;
                }
            }
            Ok(Fetched {
                body: body.to_string(),
                base_url,
                info,
            })
        }
        .boxed()
    }

    async fn reparse(
        &self,
        channel: &Channel,
        retried: bool,
        cause: ResolveError,
    ) -> Result<Fetched, ResolveError> {
        let status = self.status.get(&channel.url);
        if retried || status.retry_count >= self.config.max_retry_count {
            return Err(cause);
        }
        warn!(
            source_url = %channel.url,
            retry_count = status.retry_count,
            error = %cause,
            "Unhealthy, reparsing"
        );
        let fresh = self.refresh(channel, false).await?;
        self.status.record_warning(&channel.url, "Unhealthy");
        match self.fetch_content(channel, fresh, true).await {
            Ok(fetched) => {
                info!(source_url = %channel.url, "Back online");
                self.status.record_ok(&channel.url, "Live!");
                Ok(fetched)
            }
            Err(e) => {
                warn!(source_url = %channel.url, error = %e, "Still unhealthy, giving up");
                Err(e)
            }
        }
    }

    /// Opens the upstream resource named by a proxy token.
    ///
    /// Headers carried in the token are sent first; `headers` from the
    /// client override them.
    pub async fn proxy_stream(
        &self,
        token: &str,
        headers: &BTreeMap<String, String>,
        upstream_proxy: Option<&str>,
    ) -> Result<FetchResponse, ResolveError> {
        let (url, mut carried) = codec::decode_with_headers(token)?;
        carried.extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        let options = RequestOptions::new()
            .with_proxy(upstream_proxy)
            .with_headers(&carried)
            .following();
        self.fetcher.get(&url, &options).await
    }

    /// Fetches a nested playlist named by a proxy token and rewrites it
    /// through the same proxy.
    pub async fn proxy_playlist(
        &self,
        token: &str,
        headers: &BTreeMap<String, String>,
        upstream_proxy: Option<&str>,
    ) -> Result<String, ResolveError> {
        let (url, mut carried) = codec::decode_with_headers(token)?;
        carried.extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        let options = RequestOptions::new()
            .with_proxy(upstream_proxy)
            .with_headers(&carried);
        let page = self
            .fetcher
            .get_page(&url, &options, self.config.max_playlist_bytes)
            .await?;
        if !page.status.is_success() {
            return Err(ResolveError::Fetch {
                url,
                reason: format!("Server response: HTTP {}", page.status.as_u16()),
                timeout: false,
            });
        }
        let live_token = self.live_token();
        let rendered = rewrite(
            &page.final_url,
            &page.body,
            RewriteOptions::new(&self.config.base_url, &live_token),
        );
        if rendered.is_empty() {
            return Err(ResolveError::unsupported(&url, "playlist could not be parsed"));
        }
        Ok(rendered)
    }

    /// Feed URL of `channel` with its access token.
    pub fn feed_link(&self, channel: &Channel) -> String {
        let mut link = format!(
            "{}/live.m3u8?token={}&c={}",
            self.config.base_url,
            self.access_token(&channel.id),
            channel.id
        );
        if let Some(query) = channel.custom_query.as_deref().filter(|q| !q.is_empty()) {
            link.push('&');
            link.push_str(query);
        }
        link
    }

    /// Every playable channel; enumerated children replace their parent.
    pub async fn listing_entries(&self) -> Result<Vec<ListingEntry>, ResolveError> {
        let mut entries = Vec::new();
        for root in self.store.list().await? {
            let root = self.channel(&root.id).await?;
            let playable = if root.children.is_empty() {
                vec![root]
            } else {
                root.children
            };
            for channel in playable {
                let logo = if channel.logo.is_empty() {
                    self.cached_info(&channel.url)
                        .map(|info| info.logo)
                        .unwrap_or_default()
                } else {
                    channel.logo.clone()
                };
                entries.push(ListingEntry {
                    url: self.feed_link(&channel),
                    name: channel.name,
                    logo,
                    category: channel.category,
                });
            }
        }
        Ok(entries)
    }

    pub async fn render_m3u(&self) -> Result<String, ResolveError> {
        Ok(listing::m3u::render(&self.listing_entries().await?))
    }

    pub async fn render_txt(&self) -> Result<String, ResolveError> {
        Ok(listing::diyp::render(&self.listing_entries().await?))
    }

    /// Number of sources in `status`.
    pub fn count(&self, status: Status) -> usize {
        self.status.count(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryChannelStore, SecretTokenProvider};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MEDIA: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4,\nseg1.ts\n#EXTINF:4,\nseg2.ts\n";

    fn service(channels: Vec<Channel>) -> LiveService {
        let config = RelayConfig::default().with_base_url("http://relay.local");
        LiveService::new(
            config,
            Arc::new(MemoryChannelStore::new(channels)),
            Arc::new(SecretTokenProvider::new("secret")),
        )
    }

    async fn mount(server: &MockServer, at: &str, content_type: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", content_type)
                    .set_body_string(body),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn feed_is_rewritten_through_the_proxy() {
        let server = MockServer::start().await;
        mount(&server, "/hls/index.m3u8", "application/vnd.apple.mpegurl", MEDIA).await;
        let channel = Channel::new(ChannelId::root(1), "one", format!("{}/hls/index.m3u8", server.uri()))
            .with_parser("http")
            .with_proxy(true);
        let service = service(vec![channel.clone()]);

        let Feed::Playlist(body) = service.feed(&channel).await.unwrap() else {
            panic!("expected a playlist");
        };
        let token = service.live_token();
        let segment = codec::encode(&format!("{}/hls/seg1.ts", server.uri()));
        assert!(body.contains(&format!("http://relay.local/live.ts?token={}&k={}", token, segment)));
        assert_eq!(service.status().get(&channel.url).status, Status::Ok);
    }

    #[tokio::test]
    async fn detected_parser_is_persisted() {
        let server = MockServer::start().await;
        mount(&server, "/index.m3u8", "application/vnd.apple.mpegurl", MEDIA).await;
        let channel = Channel::new(ChannelId::root(2), "auto", format!("{}/index.m3u8", server.uri()));
        let service = service(vec![channel.clone()]);

        let info = service.refresh(&channel, true).await.unwrap();
        assert_eq!(info.plugin, "http");
        assert_eq!(service.channel(&channel.id).await.unwrap().parser, "http");
    }

    #[tokio::test]
    async fn non_hls_content_becomes_vod() {
        let server = MockServer::start().await;
        mount(&server, "/page", "text/html", "<html></html>").await;
        let channel = Channel::new(ChannelId::root(3), "vod", format!("{}/page", server.uri()))
            .with_parser("streaming");
        let service = service(vec![channel.clone()]);
        let info = LiveInfo::new(channel.url.clone());

        let fetched = service.fetch_content(&channel, info, false).await.unwrap();
        assert!(fetched.body.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(fetched.body.contains(&channel.url));
        let status = service.status().get(&channel.url);
        assert_eq!(status.status, Status::Warning);
        assert_eq!(status.message, "Url is not a live stream");
    }

    #[tokio::test]
    async fn non_http_live_urls_redirect() {
        let channel = Channel::new(ChannelId::root(4), "rtsp", "rtsp://cam.local/1").with_parser("http");
        let service = service(vec![channel.clone()]);
        let feed = service.feed(&channel).await.unwrap();
        assert!(matches!(feed, Feed::Redirect(url) if url == "rtsp://cam.local/1"));
    }

    #[tokio::test]
    async fn failures_cool_down() {
        let channel = Channel::new(ChannelId::root(5), "dead", "http://127.0.0.1:1/x.m3u8").with_parser("http");
        let service = service(vec![channel.clone()]);

        assert!(service.live_info(&channel).await.is_err());
        let err = service.live_info(&channel).await.unwrap_err();
        assert!(matches!(err, ResolveError::CoolingDown { .. }));
        assert_eq!(service.status().get(&channel.url).cooldown_multiplier, 2);
    }

    #[tokio::test]
    async fn rendered_feed_is_reused_within_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live.m3u8"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/vnd.apple.mpegurl")
                    .set_body_string(MEDIA),
            )
            .expect(2)
            .mount(&server)
            .await;
        let channel = Channel::new(ChannelId::root(6), "hot", format!("{}/live.m3u8", server.uri()))
            .with_parser("http");
        let service = service(vec![channel.clone()]);

        // One fetch resolves, one renders; the second feed hits the micro-cache.
        service.feed(&channel).await.unwrap();
        service.feed(&channel).await.unwrap();
    }

    #[tokio::test]
    async fn listings_link_with_access_tokens() {
        let channels = vec![
            Channel::new(ChannelId::root(1), "One, HD", "rtsp://a/1").with_category("News"),
            Channel::new(ChannelId::root(2), "Two", "rtsp://a/2"),
        ];
        let service = service(channels);
        let txt = service.render_txt().await.unwrap();
        let token = service.access_token(&ChannelId::root(1));
        assert!(txt.starts_with("News,#genre#\n"));
        assert!(txt.contains(&format!("One_ HD,http://relay.local/live.m3u8?token={}&c=1", token)));
        assert!(txt.contains("LiveTV,#genre#"));

        let m3u = service.render_m3u().await.unwrap();
        assert!(m3u.contains("tvg-name=\"Two\""));
    }

    #[tokio::test]
    async fn refresh_all_evicts_removed_sources_in_two_sweeps() {
        let server = MockServer::start().await;
        mount(&server, "/a.m3u8", "application/vnd.apple.mpegurl", MEDIA).await;
        let channel = Channel::new(ChannelId::root(1), "a", format!("{}/a.m3u8", server.uri()))
            .with_parser("http");
        let service = service(vec![channel.clone()]);

        let summary = service.refresh_all().await.unwrap();
        assert_eq!(summary.refreshed, 1);
        assert_eq!(service.cache_len(), 1);

        service.delete(1).await.unwrap();
        let summary = service.refresh_all().await.unwrap();
        assert_eq!(summary.evicted, 1);
        assert_eq!(service.status().get(&channel.url).status, Status::Expired);

        service.refresh_all().await.unwrap();
        assert!(service.status().is_empty());
    }
}
