//! HLS document handling: variant selection and proxy rewriting.

mod rewrite;
mod variant;

pub use rewrite::{rewrite, RewriteOptions, SegmentHook};
pub use variant::{best_variant, is_live_media};

use url::Url;

/// True for URLs that carry both a scheme and a host.
pub fn is_absolute(uri: &str) -> bool {
    Url::parse(uri).map(|u| u.has_host()).unwrap_or(false)
}

/// Resolves `uri` against the playlist it appeared in.
///
/// Absolute URIs come back untouched. Relative ones are joined onto `base`
/// with `.` and `..` segments collapsed.
pub fn resolve_uri(base: &str, uri: &str) -> String {
    if is_absolute(uri) {
        return uri.to_string();
    }
    Url::parse(base)
        .and_then(|base| base.join(uri))
        .map(String::from)
        .unwrap_or_else(|_| uri.to_string())
}
