use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Composite channel identity: `7` for a configured channel, `7-2` for the
/// third entry enumerated from channel 7's playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId {
    pub root: u64,
    pub sub: Option<usize>,
}

impl ChannelId {
    pub fn root(id: u64) -> Self {
        Self { root: id, sub: None }
    }

    pub fn sub(root: u64, index: usize) -> Self {
        Self {
            root,
            sub: Some(index),
        }
    }

    pub fn is_root(&self) -> bool {
        self.sub.is_none()
    }

    pub fn parent(&self) -> Option<ChannelId> {
        self.sub.map(|_| ChannelId::root(self.root))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub {
            Some(sub) => write!(f, "{}-{}", self.root, sub),
            None => write!(f, "{}", self.root),
        }
    }
}

impl FromStr for ChannelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid channel id '{}'", s);
        let (root, sub) = match s.trim().split_once('-') {
            Some((root, sub)) => (root, Some(sub.parse::<usize>().map_err(|_| invalid())?)),
            None => (s.trim(), None),
        };
        let root = root.parse::<u64>().map_err(|_| invalid())?;
        if root == 0 {
            return Err(invalid());
        }
        Ok(Self { root, sub })
    }
}

impl TryFrom<String> for ChannelId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.to_string()
    }
}

/// A sub-channel discovered inside a playlist source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedChannel {
    pub name: String,
    pub url: String,
    pub logo: String,
    pub category: String,
}

/// Plugin state carried between resolution steps.
///
/// Serialized at every hand-off; unknown fields are ignored so older and
/// newer payloads stay readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraState {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub redirect_counter: u32,
    /// Last concrete page or manifest that resolved successfully.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ParsedChannel>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl ExtraState {
    /// Lenient parse: anything unreadable yields the empty state.
    pub fn from_json(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        serde_json::from_str(raw).unwrap_or_default()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// The outcome of resolving a source URL at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveInfo {
    /// Concrete playable URL; empty for playlist sources.
    pub live_url: String,
    pub logo: String,
    /// Plugin that produced this result (after detection).
    pub plugin: String,
    pub extra: ExtraState,
}

impl LiveInfo {
    pub fn new(live_url: impl Into<String>) -> Self {
        Self {
            live_url: live_url.into(),
            ..Self::default()
        }
    }

    pub fn with_extra(mut self, extra: ExtraState) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_logo(mut self, logo: impl Into<String>) -> Self {
        self.logo = logo.into();
        self
    }
}

/// A configured or derived live source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub url: String,
    pub parser: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub category: String,
    /// Rewrite segment links through this server.
    #[serde(default)]
    pub proxy: bool,
    /// Dedicated base URL for proxied segments.
    #[serde(default)]
    pub ts_proxy: Option<String>,
    /// Upstream connection proxy (`http://`, `socks5://`).
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub extra: ExtraState,
    /// Extra query appended to this channel's feed link.
    #[serde(default)]
    pub custom_query: Option<String>,
    #[serde(default)]
    pub children: Vec<Channel>,
}

impl Channel {
    pub fn new(id: ChannelId, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            parser: "auto".to_string(),
            logo: String::new(),
            category: String::new(),
            proxy: false,
            ts_proxy: None,
            proxy_url: None,
            extra: ExtraState::default(),
            custom_query: None,
            children: Vec::new(),
        }
    }

    pub fn with_parser(mut self, parser: impl Into<String>) -> Self {
        self.parser = parser.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_proxy_url(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn with_ts_proxy(mut self, ts_proxy: impl Into<String>) -> Self {
        self.ts_proxy = Some(ts_proxy.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_extra(mut self, extra: ExtraState) -> Self {
        self.extra = extra;
        self
    }

    pub fn is_playable(&self) -> bool {
        self.children.is_empty()
    }

    /// Position-independent key for a derived channel.
    pub fn digest(&self) -> String {
        let parent = self.id.parent().unwrap_or(self.id);
        let mut hasher = Sha256::new();
        hasher.update(parent.to_string().as_bytes());
        hasher.update(self.name.as_bytes());
        hex::encode(hasher.finalize())
    }
}
