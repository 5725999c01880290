#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod error;
pub mod fetch;
pub mod listing;
pub mod lock;
pub mod model;
pub mod playlist;
pub mod plugin;
pub mod resolver;
pub mod service;
pub mod status;
pub mod store;

pub use codec::DecodeError;
pub use config::RelayConfig;
pub use error::ResolveError;
pub use fetch::{HttpFetcher, RequestOptions};
pub use lock::{KeyedLocks, RefreshScope};
pub use model::{Channel, ChannelId, ExtraState, LiveInfo, ParsedChannel};
pub use plugin::{Capability, FlvRemuxer, HostedFeed, Plugin, PluginContext, PluginRegistry};
pub use service::{Feed, LiveService, RefreshSummary};
pub use status::{Status, StatusInfo, StatusTable};
pub use store::{ChannelStore, MemoryChannelStore, SecretTokenProvider, TokenProvider};
