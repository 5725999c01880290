use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::RelayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Unknown,
    Ok,
    Warning,
    Error,
    Expired,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Health record of one source URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub updated_at: Option<DateTime<Utc>>,
    pub status: Status,
    pub message: String,
    pub retry_count: u32,
    /// Always a power of two in `1..=max_cooldown_multiplier`.
    pub cooldown_multiplier: u32,
}

impl Default for StatusInfo {
    fn default() -> Self {
        Self {
            updated_at: None,
            status: Status::Unknown,
            message: "Not yet parsed".to_string(),
            retry_count: 0,
            cooldown_multiplier: 1,
        }
    }
}

/// Per-source health table.
///
/// Every transition runs under the map's entry lock, so concurrent failures
/// on one source never lose an increment.
#[derive(Debug)]
pub struct StatusTable {
    entries: DashMap<String, StatusInfo>,
    max_multiplier: u32,
}

impl Default for StatusTable {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl StatusTable {
    /// `max_multiplier` is rounded down to a power of two so doubling lands on it exactly.
    pub fn new(max_multiplier: u32) -> Self {
        Self {
            entries: DashMap::new(),
            max_multiplier: floor_power_of_two(max_multiplier),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.max_cooldown_multiplier)
    }

    pub fn get(&self, url: &str) -> StatusInfo {
        self.entries
            .get(url)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn record_ok(&self, url: &str, message: &str) {
        self.record_ok_at(url, message, Utc::now());
    }

    pub fn record_ok_at(&self, url: &str, message: &str, now: DateTime<Utc>) {
        let mut entry = self.entries.entry(url.to_string()).or_default();
        entry.status = Status::Ok;
        entry.message = message.to_string();
        entry.updated_at = Some(now);
        entry.retry_count = 0;
        entry.cooldown_multiplier = 1;
    }

    pub fn record_warning(&self, url: &str, message: &str) {
        self.record_warning_at(url, message, Utc::now());
    }

    pub fn record_warning_at(&self, url: &str, message: &str, now: DateTime<Utc>) {
        let mut entry = self.entries.entry(url.to_string()).or_default();
        entry.status = Status::Warning;
        entry.message = message.to_string();
        entry.updated_at = Some(now);
        entry.retry_count = entry.retry_count.saturating_add(1);
    }

    pub fn record_failure(&self, url: &str, message: &str) {
        self.record_failure_at(url, message, Utc::now());
    }

    pub fn record_failure_at(&self, url: &str, message: &str, now: DateTime<Utc>) {
        let max = self.max_multiplier;
        let mut entry = self.entries.entry(url.to_string()).or_default();
        entry.status = Status::Error;
        entry.message = message.to_string();
        entry.updated_at = Some(now);
        entry.retry_count = entry.retry_count.saturating_add(1);
        entry.cooldown_multiplier = entry.cooldown_multiplier.saturating_mul(2).min(max);
    }

    /// Time left before `url` may be resolved again, if any.
    pub fn cooldown_remaining(
        &self,
        url: &str,
        config: &RelayConfig,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let entry = self.entries.get(url)?;
        let updated_at = entry.updated_at?;
        let cooldown = config.cooldown_for(entry.cooldown_multiplier);
        let elapsed = (now - updated_at).to_std().unwrap_or(Duration::ZERO);
        if elapsed > cooldown {
            None
        } else {
            Some(cooldown - elapsed)
        }
    }

    /// Two-phase eviction of sources that are no longer configured.
    ///
    /// Live entries outside `keep` are marked expired; entries already expired
    /// are removed. Returns the removed URLs.
    pub fn evict_unlisted<F>(&self, keep: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut removed = Vec::new();
        self.entries.retain(|url, info| {
            if keep(url) {
                return true;
            }
            if info.status == Status::Expired {
                removed.push(url.clone());
                return false;
            }
            info.status = Status::Expired;
            info.message = "No longer configured".to_string();
            true
        });
        removed
    }

    pub fn remove(&self, url: &str) {
        self.entries.remove(url);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<(String, StatusInfo)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn count(&self, status: Status) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

fn floor_power_of_two(n: u32) -> u32 {
    let n = n.max(1);
    1 << (u32::BITS - 1 - n.leading_zeros())
}
