use std::fmt::Write;
use std::sync::LazyLock;

use regex::Regex;

use super::{ListingEntry, ListingError};
use crate::model::ParsedChannel;

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([\w-]+)="([^"]*)""#).expect("attribute pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Track {
    pub name: String,
    pub uri: String,
    pub tags: Vec<(String, String)>,
}

impl Track {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Splits `#EXTINF:` payload into attributes and display name.
fn split_extinf(info: &str) -> (&str, &str) {
    let mut in_quotes = false;
    for (i, c) in info.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return (&info[..i], info[i + 1..].trim()),
            _ => {}
        }
    }
    (info, "")
}

pub fn parse_tracks(content: &str) -> Result<Vec<Track>, ListingError> {
    let mut lines = content
        .lines()
        .map(|l| l.trim().trim_start_matches('\u{feff}'))
        .filter(|l| !l.is_empty());
    match lines.next() {
        Some(first) if first.starts_with("#EXTM3U") => {}
        _ => return Err(ListingError::MissingHeader),
    }

    let mut tracks = Vec::new();
    let mut pending: Option<Track> = None;
    for line in lines {
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            let (attributes, name) = split_extinf(info);
            let tags = ATTRIBUTE
                .captures_iter(attributes)
                .map(|c| (c[1].to_string(), c[2].to_string()))
                .collect();
            pending = Some(Track {
                name: name.to_string(),
                uri: String::new(),
                tags,
            });
        } else if line.starts_with('#') {
            continue;
        } else if let Some(mut track) = pending.take() {
            track.uri = line.to_string();
            tracks.push(track);
        }
    }
    Ok(tracks)
}

pub fn parse(content: &str) -> Result<Vec<ParsedChannel>, ListingError> {
    let tracks = parse_tracks(content)?;
    Ok(tracks
        .into_iter()
        .map(|track| ParsedChannel {
            name: track
                .tag("tvg-name")
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| track.name.clone()),
            logo: track.tag("tvg-logo").unwrap_or_default().to_string(),
            category: track.tag("group-title").unwrap_or_default().to_string(),
            url: track.uri,
        })
        .collect())
}

fn quote(value: &str) -> String {
    value.replace('"', "'")
}

pub fn render(entries: &[ListingEntry]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for entry in entries {
        let _ = writeln!(
            out,
            "#EXTINF:-1 tvg-name=\"{}\" tvg-logo=\"{}\" group-title=\"{}\",{}",
            quote(&entry.name),
            quote(&entry.logo),
            quote(entry.category_or_default()),
            entry.name
        );
        let _ = writeln!(out, "{}", entry.url);
    }
    out
}
