use m3u8_rs::Playlist;
use tracing::debug;

use super::resolve_uri;
use crate::error::ResolveError;

/// Picks the URL a player should be pointed at for `content`.
///
/// Media playlists and masters that split audio into separate renditions
/// resolve to `playlist_url` itself. Otherwise the highest-bandwidth variant
/// wins, with later entries winning ties.
pub fn best_variant(playlist_url: &str, content: &str) -> Result<String, ResolveError> {
    let master = match m3u8_rs::parse_playlist_res(content.as_bytes()) {
        Ok(Playlist::MediaPlaylist(_)) => return Ok(playlist_url.to_string()),
        Ok(Playlist::MasterPlaylist(master)) => master,
        Err(e) => {
            return Err(ResolveError::unsupported(
                playlist_url,
                format!("unparseable playlist: {}", e),
            ))
        }
    };

    let mut selected: Option<(&str, u64)> = None;
    for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
        if variant.audio.as_deref().is_some_and(|a| !a.is_empty()) {
            debug!(playlist_url, "Master carries separate audio, keeping it whole");
            return Ok(playlist_url.to_string());
        }
        if selected.map_or(true, |(_, bw)| variant.bandwidth >= bw) {
            selected = Some((&variant.uri, variant.bandwidth));
        }
    }

    match selected {
        Some((uri, bandwidth)) => {
            debug!(playlist_url, uri, bandwidth, "Selected variant");
            Ok(resolve_uri(playlist_url, uri))
        }
        None => Err(ResolveError::NoLiveFeed(format!(
            "{} lists no variants",
            playlist_url
        ))),
    }
}

/// A media playlist that has not been closed with `#EXT-X-ENDLIST`.
pub fn is_live_media(content: &str) -> bool {
    match m3u8_rs::parse_playlist_res(content.as_bytes()) {
        Ok(Playlist::MediaPlaylist(media)) => !media.end_list,
        _ => false,
    }
}
