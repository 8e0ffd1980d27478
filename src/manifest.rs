//! HLS manifest synthesis.
//!
//! Manifests are static VOD playlists: media sequence always starts at 0 and the
//! list always ends with `#EXT-X-ENDLIST`. The whole text is built in memory.

use crate::error::{ManifestError, StoreError};
use crate::keys::{KeyRecord, KeyStore};
use crate::segments::SegmentRecord;

/// Per-request inputs that are not stored with the video
#[derive(Debug, Clone, Default)]
pub struct ManifestOptions<'a> {
    /// Scheme + host the player reached us on, used for the key URI
    pub base_url: &'a str,
    /// Application context forwarded on the key URI
    pub app: Option<&'a str>,
    /// Deployment-wide CDN base for relative segment paths
    pub cdn_base: Option<&'a str>,
}

/// `ceil(max duration)`, never below 1
pub fn target_duration(segments: &[SegmentRecord]) -> u64 {
    let max = segments
        .iter()
        .map(|s| s.duration)
        .fold(0.0_f64, f64::max);
    (max.ceil() as u64).max(1)
}

/// URL of a segment as emitted in the playlist.
///
/// Absolute http(s) paths are kept verbatim. Relative ones are put under the CDN
/// base when one is configured, otherwise left as they are.
pub fn resolve_segment_url(path: &str, cdn_base: Option<&str>) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    match cdn_base.filter(|c| !c.is_empty()) {
        Some(cdn) => format!(
            "{}/{}",
            cdn.trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
        None => path.to_string(),
    }
}

/// URI of the key endpoint for a video
pub fn key_uri(base_url: &str, video_id: &str, app: Option<&str>) -> String {
    let mut uri = format!(
        "{}/play/key/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(video_id)
    );
    if let Some(app) = app.filter(|a| !a.is_empty()) {
        uri.push_str("?app=");
        uri.push_str(&urlencoding::encode(app));
    }
    uri
}

/// Render the media playlist. `segments` may come in any order and must not be empty.
pub fn render(
    video_id: &str,
    segments: &[SegmentRecord],
    key: &KeyRecord,
    opts: &ManifestOptions<'_>,
) -> Result<String, ManifestError> {
    if segments.is_empty() {
        return Err(ManifestError::NoSegments(video_id.to_string()));
    }
    if key.key.is_empty() || key.iv_hex().is_empty() {
        return Err(ManifestError::KeyIncomplete(video_id.to_string()));
    }

    let mut ordered: Vec<&SegmentRecord> = segments.iter().collect();
    ordered.sort_by_key(|s| s.sequence);

    let mut out = String::with_capacity(256 + ordered.len() * 64);
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:3\n");
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    out.push_str("#EXT-X-ALLOW-CACHE:YES\n");
    out.push_str(&format!(
        "#EXT-X-TARGETDURATION:{}\n",
        target_duration(segments)
    ));
    out.push_str(&format!(
        "#EXT-X-KEY:METHOD=AES-128,URI=\"{}\",IV=0x{}\n",
        key_uri(opts.base_url, video_id, opts.app),
        key.iv_hex()
    ));
    for segment in ordered {
        out.push_str(&format!("#EXTINF:{:.6},\n", segment.duration));
        out.push_str(&resolve_segment_url(&segment.path, opts.cdn_base));
        out.push('\n');
    }
    out.push_str("#EXT-X-ENDLIST\n");
    Ok(out)
}

/// Look up the video's key and render its playlist.
///
/// Segment presence is checked before the key lookup, so a video with neither
/// reports `NoSegments`.
pub async fn build(
    keys: &KeyStore<'_>,
    video_id: &str,
    segments: &[SegmentRecord],
    opts: &ManifestOptions<'_>,
) -> Result<String, ManifestError> {
    if segments.is_empty() {
        return Err(ManifestError::NoSegments(video_id.to_string()));
    }
    let key = match keys.get_by_video_id(video_id).await {
        Ok(key) => key,
        Err(StoreError::NotFound { .. }) => {
            return Err(ManifestError::KeyNotFound(video_id.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    render(video_id, segments, &key, opts)
}

/// Top-level playlist with a single variant pointing at the media playlist.
/// Like the key URI, the variant URI carries `?app=` only when an app is given.
pub fn master_playlist(video_id: &str, app: Option<&str>) -> String {
    let mut uri = format!("/play/{}/index.m3u8", urlencoding::encode(video_id));
    if let Some(app) = app.filter(|a| !a.is_empty()) {
        uri.push_str("?app=");
        uri.push_str(&urlencoding::encode(app));
    }
    format!(
        "#EXTM3U\n#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH=4096000,RESOLUTION=1920x1080\n{}",
        uri
    )
}
