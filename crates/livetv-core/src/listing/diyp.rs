//! DIYP text listings: `Group,#genre#` headers followed by `name,url[$source]`.

use std::collections::HashMap;
use std::fmt::Write;

use super::{ListingEntry, ListingError};
use crate::model::ParsedChannel;

const DEFAULT_GROUP: &str = "直播";
const DEFAULT_SOURCE: &str = "默认线路";

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub name: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Listing {
    pub groups: Vec<Group>,
}

impl Listing {
    /// One entry per source, in group then channel order.
    pub fn flatten(&self) -> Vec<ParsedChannel> {
        self.groups
            .iter()
            .flat_map(|group| {
                group.channels.iter().flat_map(move |channel| {
                    channel.sources.iter().map(move |source| ParsedChannel {
                        name: channel.name.clone(),
                        url: source.url.clone(),
                        logo: String::new(),
                        category: group.name.clone(),
                    })
                })
            })
            .collect()
    }
}

/// Parses a DIYP listing.
///
/// A channel name seen again, even under another group, adds a source to
/// the first occurrence. Sources are ordered with the default line first.
pub fn parse(content: &str) -> Result<Listing, ListingError> {
    let mut groups: Vec<Group> = Vec::new();
    let mut seen: HashMap<String, (usize, usize)> = HashMap::new();
    let mut current = DEFAULT_GROUP.to_string();

    for line in content.lines().map(str::trim) {
        if line.contains(",#genre#") {
            current = line.split(',').next().unwrap_or_default().to_string();
            continue;
        }
        let mut parts = line.split(',');
        let (Some(name), Some(target)) = (parts.next(), parts.next()) else {
            continue;
        };
        let (url, source) = match target.split_once('$') {
            Some((url, source)) => (url, source),
            None => (target, DEFAULT_SOURCE),
        };
        let source = Source {
            name: source.to_string(),
            url: url.to_string(),
        };

        if let Some(&(g, c)) = seen.get(name) {
            groups[g].channels[c].sources.push(source);
            continue;
        }
        let g = match groups.iter().position(|g| g.name == current) {
            Some(g) => g,
            None => {
                groups.push(Group {
                    name: current.clone(),
                    channels: Vec::new(),
                });
                groups.len() - 1
            }
        };
        groups[g].channels.push(Channel {
            name: name.to_string(),
            sources: vec![source],
        });
        seen.insert(name.to_string(), (g, groups[g].channels.len() - 1));
    }

    if groups.is_empty() {
        return Err(ListingError::Empty);
    }
    for channel in groups.iter_mut().flat_map(|g| g.channels.iter_mut()) {
        channel.sources.sort_by(|a, b| {
            (a.name != DEFAULT_SOURCE, &a.name).cmp(&(b.name != DEFAULT_SOURCE, &b.name))
        });
    }
    Ok(Listing { groups })
}

/// Renders entries grouped by category in first-seen order.
pub fn render(entries: &[ListingEntry]) -> String {
    let mut order: Vec<&str> = Vec::new();
    let mut grouped: HashMap<&str, Vec<&ListingEntry>> = HashMap::new();
    for entry in entries {
        let category = entry.category_or_default();
        if !grouped.contains_key(category) {
            order.push(category);
        }
        grouped.entry(category).or_default().push(entry);
    }

    let mut out = String::new();
    for category in order {
        let _ = writeln!(out, "{},#genre#", category);
        let mut names: Vec<String> = Vec::new();
        let mut urls: HashMap<String, Vec<&str>> = HashMap::new();
        for entry in &grouped[category] {
            let name = entry.name.replace(',', "_");
            if !urls.contains_key(&name) {
                names.push(name.clone());
            }
            urls.entry(name).or_default().push(&entry.url);
        }
        for name in names {
            for url in &urls[&name] {
                let _ = writeln!(out, "{},{}", name, url);
            }
        }
        out.push('\n');
    }
    out
}
