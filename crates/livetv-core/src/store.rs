//! Channel persistence and access-token boundaries.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::error::ResolveError;
use crate::model::{Channel, ChannelId};

/// Configured root channels, keyed by their numeric id.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Channel>, ResolveError>;
    async fn get(&self, id: u64) -> Result<Option<Channel>, ResolveError>;
    async fn save(&self, channel: Channel) -> Result<(), ResolveError>;
    /// Returns whether a channel was removed.
    async fn delete(&self, id: u64) -> Result<bool, ResolveError>;
}

#[derive(Debug, Default)]
pub struct MemoryChannelStore {
    channels: RwLock<BTreeMap<u64, Channel>>,
}

impl MemoryChannelStore {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            channels: RwLock::new(
                channels
                    .into_iter()
                    .map(|channel| (channel.id.root, channel))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    async fn list(&self) -> Result<Vec<Channel>, ResolveError> {
        Ok(self.channels.read().await.values().cloned().collect())
    }

    async fn get(&self, id: u64) -> Result<Option<Channel>, ResolveError> {
        Ok(self.channels.read().await.get(&id).cloned())
    }

    async fn save(&self, channel: Channel) -> Result<(), ResolveError> {
        if !channel.id.is_root() {
            return Err(ResolveError::Store(format!(
                "derived channel {} cannot be stored",
                channel.id
            )));
        }
        self.channels.write().await.insert(channel.id.root, channel);
        Ok(())
    }

    async fn delete(&self, id: u64) -> Result<bool, ResolveError> {
        Ok(self.channels.write().await.remove(&id).is_some())
    }
}

pub trait TokenProvider: Send + Sync {
    /// Per-channel feed token.
    fn derive_access_token(&self, id: &ChannelId) -> String;
    /// Token guarding segment and sub-playlist proxying.
    fn live_token(&self) -> String;
    /// Token guarding aggregate listings.
    fn secret_token(&self) -> String;
}

const TOKEN_LEN: usize = 9;

type HmacSha256 = Hmac<Sha256>;

/// Derives every token from one server secret with HMAC-SHA256.
///
/// Tokens are stable for a given secret and all change when it rotates.
#[derive(Debug, Clone, Default)]
pub struct SecretTokenProvider {
    secret: String,
}

impl SecretTokenProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn sign(&self, message: &str, len: usize) -> String {
        if self.secret.is_empty() {
            return String::new();
        }
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(message.as_bytes());
        let mut token = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        token.truncate(len);
        token
    }
}

impl TokenProvider for SecretTokenProvider {
    fn derive_access_token(&self, id: &ChannelId) -> String {
        self.sign(&format!("channel:{}", id), TOKEN_LEN)
    }

    fn live_token(&self) -> String {
        self.sign("live", TOKEN_LEN)
    }

    fn secret_token(&self) -> String {
        self.sign("secret", 2 * TOKEN_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryChannelStore::new(vec![Channel::new(ChannelId::root(1), "a", "http://a")]);
        store
            .save(Channel::new(ChannelId::root(2), "b", "http://b"))
            .await
            .unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);
        assert_eq!(store.get(2).await.unwrap().unwrap().name, "b");
        assert!(store.delete(1).await.unwrap());
        assert!(!store.delete(1).await.unwrap());
        assert!(store.get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn derived_channels_are_not_stored() {
        let store = MemoryChannelStore::default();
        let err = store
            .save(Channel::new(ChannelId::sub(1, 0), "child", "http://c"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Store(_)));
    }

    #[test]
    fn tokens_are_stable_and_rotate_with_the_secret() {
        let a = SecretTokenProvider::new("s3cret");
        let b = SecretTokenProvider::new("other");
        let id = ChannelId::sub(4, 1);

        let token = a.derive_access_token(&id);
        assert_eq!(token.len(), 9);
        assert_eq!(token, a.derive_access_token(&id));
        assert_ne!(token, a.derive_access_token(&ChannelId::root(4)));
        assert_ne!(token, b.derive_access_token(&id));
        assert_ne!(a.live_token(), b.live_token());
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn empty_secret_yields_empty_tokens() {
        let tokens = SecretTokenProvider::default();
        assert!(tokens.live_token().is_empty());
        assert!(tokens.derive_access_token(&ChannelId::root(1)).is_empty());
    }
}
