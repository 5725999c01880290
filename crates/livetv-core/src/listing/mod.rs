//! Channel listings: extended M3U and DIYP text, both directions.

pub mod diyp;
pub mod m3u;

use thiserror::Error;

use crate::model::ParsedChannel;

pub const DEFAULT_CATEGORY: &str = "LiveTV";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListingError {
    #[error("missing #EXTM3U header")]
    MissingHeader,
    #[error("listing contains no channels")]
    Empty,
}

/// One published channel in an aggregate listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    pub name: String,
    pub logo: String,
    pub category: String,
    pub url: String,
}

impl ListingEntry {
    pub fn category_or_default(&self) -> &str {
        if self.category.is_empty() {
            DEFAULT_CATEGORY
        } else {
            &self.category
        }
    }
}

/// Decodes a downloaded playlist file, trying M3U first and DIYP second.
pub fn parse_any(content: &str) -> Result<Vec<ParsedChannel>, ListingError> {
    match m3u::parse(content) {
        Ok(channels) => Ok(channels),
        Err(_) => diyp::parse(content).map(|listing| listing.flatten()),
    }
}
