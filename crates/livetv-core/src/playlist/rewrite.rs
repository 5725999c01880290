use m3u8_rs::{MasterPlaylist, Playlist};

use super::resolve_uri;
use crate::codec;

/// Per-link override: receives the resolved upstream URL and the proxied
/// link built for it, returns the link to emit.
pub type SegmentHook<'a> = &'a (dyn Fn(&str, String) -> String + Send + Sync);

#[derive(Clone, Copy)]
pub struct RewriteOptions<'a> {
    /// Base of this server's proxy endpoints, without trailing slash.
    pub prefix: &'a str,
    pub token: &'a str,
    /// Route links through the proxy endpoints instead of only absolutizing them.
    pub proxy: bool,
    pub hook: Option<SegmentHook<'a>>,
}

impl<'a> RewriteOptions<'a> {
    pub fn new(prefix: &'a str, token: &'a str) -> Self {
        Self {
            prefix,
            token,
            proxy: true,
            hook: None,
        }
    }

    pub fn with_proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_hook(mut self, hook: SegmentHook<'a>) -> Self {
        self.hook = Some(hook);
        self
    }

    fn segment_prefix(&self) -> String {
        format!("{}/live.ts?token={}&k=", self.prefix, self.token)
    }

    fn playlist_prefix(&self) -> String {
        format!("{}/playlist.m3u8?token={}&k=", self.prefix, self.token)
    }
}

struct Linker<'a> {
    base: &'a str,
    link_prefix: String,
    known_prefixes: [String; 2],
    options: RewriteOptions<'a>,
}

impl Linker<'_> {
    fn link(&self, uri: &str) -> String {
        if uri.is_empty() || self.known_prefixes.iter().any(|p| uri.starts_with(p.as_str())) {
            return uri.to_string();
        }
        let resolved = resolve_uri(self.base, uri);
        if !self.options.proxy {
            return resolved;
        }
        let link = format!("{}{}", self.link_prefix, codec::encode(&resolved));
        match self.options.hook {
            Some(hook) => hook(&resolved, link),
            None => link,
        }
    }

    /// Rewrites the `URI="..."` attribute of key and init-section tags.
    fn tag(&self, line: &str) -> String {
        if !(line.starts_with("#EXT-X-KEY") || line.starts_with("#EXT-X-MAP")) {
            return line.to_string();
        }
        let Some(start) = line.find("URI=\"").map(|i| i + 5) else {
            return line.to_string();
        };
        let Some(len) = line[start..].find('"') else {
            return line.to_string();
        };
        let uri = &line[start..start + len];
        if uri.starts_with("data:") || uri.starts_with("skd:") {
            return line.to_string();
        }
        format!("{}{}{}", &line[..start], self.link(uri), &line[start + len..])
    }
}

/// Rewrites every URI in an HLS document so it points back through this
/// server.
///
/// Media playlists are processed line by line; master playlists have their
/// variant and rendition URIs replaced and are re-serialized. Links that
/// already point at the proxy are left alone, so rewriting twice is a no-op.
/// Input that does not parse as HLS yields an empty string.
pub fn rewrite(playlist_url: &str, content: &str, options: RewriteOptions<'_>) -> String {
    let known_prefixes = [options.segment_prefix(), options.playlist_prefix()];
    match m3u8_rs::parse_playlist_res(content.as_bytes()) {
        Ok(Playlist::MediaPlaylist(_)) => {
            let linker = Linker {
                base: playlist_url,
                link_prefix: known_prefixes[0].clone(),
                known_prefixes,
                options,
            };
            rewrite_media(content, &linker)
        }
        Ok(Playlist::MasterPlaylist(master)) => {
            let linker = Linker {
                base: playlist_url,
                link_prefix: known_prefixes[1].clone(),
                known_prefixes,
                options,
            };
            rewrite_master(master, &linker)
        }
        Err(_) => String::new(),
    }
}

fn rewrite_media(content: &str, linker: &Linker<'_>) -> String {
    let mut out = String::with_capacity(content.len() * 2);
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with('#') {
            out.push_str(&linker.tag(line));
        } else {
            out.push_str(&linker.link(line));
        }
        out.push('\n');
    }
    out
}

fn rewrite_master(mut master: MasterPlaylist, linker: &Linker<'_>) -> String {
    for variant in &mut master.variants {
        variant.uri = linker.link(&variant.uri);
    }
    for media in &mut master.alternatives {
        if let Some(uri) = media.uri.take() {
            media.uri = Some(linker.link(&uri));
        }
    }

    let mut out = Vec::new();
    if master.write_to(&mut out).is_err() {
        return String::new();
    }
    String::from_utf8(out).unwrap_or_default()
}
