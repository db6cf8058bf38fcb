// HLS playlist handling: variant selection and segment planning.

use m3u8_rs::{KeyMethod, MasterPlaylist, MediaPlaylist, MediaSegment, Playlist, parse_playlist_res};
use tracing::{debug, warn};
use url::Url;

use crate::client::checked_url;
use crate::config::{ProtocolAllowList, VariantPolicy};
use crate::error::DownloadError;

/// Byte range of a segment or init section, with the offset resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub offset: u64,
    pub length: u64,
}

impl ByteSpan {
    /// Value of the HTTP `Range` header covering this span.
    pub fn header_value(&self) -> String {
        let end = self.offset + self.length.saturating_sub(1);
        format!("bytes={}-{}", self.offset, end)
    }
}

/// AES-128 key reference of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentKey {
    pub uri: Url,
    pub iv: [u8; 16],
}

/// fMP4 initialization section (`EXT-X-MAP`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSection {
    pub url: Url,
    pub byte_range: Option<ByteSpan>,
}

#[derive(Debug, Clone)]
pub struct SegmentPlan {
    pub sequence: u64,
    pub url: Url,
    pub duration: f32,
    pub byte_range: Option<ByteSpan>,
    pub key: Option<SegmentKey>,
    pub init: Option<InitSection>,
}

/// A fully resolved HLS media playlist.
#[derive(Debug, Clone)]
pub struct HlsMedia {
    pub playlist_url: Url,
    pub segments: Vec<SegmentPlan>,
    /// Whether the playlist carried `EXT-X-ENDLIST`.
    pub ended: bool,
}

impl HlsMedia {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| f64::from(s.duration)).sum()
    }

    /// Segments are fragmented MP4 rather than MPEG-TS.
    pub fn is_fmp4(&self) -> bool {
        self.segments.iter().any(|s| s.init.is_some())
    }
}

pub fn parse_playlist(bytes: &[u8], url: &Url) -> Result<Playlist, DownloadError> {
    parse_playlist_res(bytes)
        .map_err(|e| DownloadError::playlist(format!("failed to parse playlist {url}: {e}")))
}

/// Base URL used to resolve relative URIs of a playlist.
pub fn base_url(playlist_url: &Url) -> Result<Url, DownloadError> {
    playlist_url
        .join(".")
        .map_err(|e| DownloadError::playlist(format!("failed to determine base URL: {e}")))
}

/// Pick the media playlist URL of `master` according to `policy`.
///
/// I-frame-only variants are never selected.
pub fn select_variant(
    master: &MasterPlaylist,
    master_url: &Url,
    policy: VariantPolicy,
    allowed: &ProtocolAllowList,
) -> Result<Url, DownloadError> {
    let variants = master.variants.iter().filter(|v| !v.is_i_frame);

    let selected = match policy {
        VariantPolicy::HighestBitrate => variants.max_by_key(|v| v.bandwidth),
        VariantPolicy::LowestBitrate => variants.min_by_key(|v| v.bandwidth),
        VariantPolicy::ClosestToBitrate(target) => {
            variants.min_by_key(|v| v.bandwidth.abs_diff(target))
        }
    }
    .ok_or_else(|| DownloadError::playlist("master playlist has no usable variants"))?;

    debug!(
        bandwidth = selected.bandwidth,
        resolution = ?selected.resolution,
        uri = %selected.uri,
        "Selected variant"
    );

    let url = base_url(master_url)?
        .join(&selected.uri)
        .map_err(|e| DownloadError::invalid_url(&selected.uri, e.to_string()))?;
    checked_url(url.as_str(), allowed)
}

/// Turn a media playlist into download jobs with absolute URLs.
///
/// Keys and init sections apply to every following segment until replaced,
/// so they are carried forward here.
pub fn plan_segments(
    playlist: &MediaPlaylist,
    playlist_url: &Url,
    allowed: &ProtocolAllowList,
) -> Result<HlsMedia, DownloadError> {
    let base = base_url(playlist_url)?;
    let resolve = |uri: &str| -> Result<Url, DownloadError> {
        let url = base
            .join(uri.trim())
            .map_err(|e| DownloadError::invalid_url(uri, e.to_string()))?;
        checked_url(url.as_str(), allowed)
    };

    if !playlist.end_list {
        warn!(url = %playlist_url, "Playlist has no ENDLIST, downloading current segments only");
    }

    let mut init = playlist_level_map(playlist)
        .map(|(uri, range)| -> Result<InitSection, DownloadError> {
            Ok(InitSection {
                url: resolve(&uri)?,
                byte_range: range,
            })
        })
        .transpose()?;
    let mut key: Option<(Url, Option<[u8; 16]>)> = None;
    let mut last_range: Option<(String, u64)> = None;
    let mut segments = Vec::with_capacity(playlist.segments.len());

    for (idx, segment) in playlist.segments.iter().enumerate() {
        let sequence = playlist.media_sequence + idx as u64;

        if clears_key(segment) {
            key = None;
        }
        if let Some(k) = &segment.key {
            key = match &k.method {
                KeyMethod::None => None,
                KeyMethod::AES128 => {
                    let uri = k.uri.as_deref().ok_or_else(|| {
                        DownloadError::playlist("AES-128 key without URI")
                    })?;
                    let iv = k.iv.as_deref().map(parse_iv).transpose()?;
                    Some((resolve(uri)?, iv))
                }
                other => {
                    return Err(DownloadError::unsupported(
                        playlist_url.as_str(),
                        format!("encryption method {other:?} is not supported"),
                    ));
                }
            };
        }

        if let Some(map) = &segment.map {
            init = Some(InitSection {
                url: resolve(&map.uri)?,
                byte_range: map.byte_range.as_ref().map(|r| ByteSpan {
                    offset: r.offset.unwrap_or(0),
                    length: r.length,
                }),
            });
        }

        if segment.uri.trim().is_empty() {
            warn!(sequence, "Skipping segment without URI");
            continue;
        }

        let byte_range = segment.byte_range.as_ref().map(|r| {
            let offset = r.offset.unwrap_or_else(|| match &last_range {
                Some((uri, end)) if *uri == segment.uri => *end,
                _ => 0,
            });
            last_range = Some((segment.uri.clone(), offset + r.length));
            ByteSpan {
                offset,
                length: r.length,
            }
        });

        segments.push(SegmentPlan {
            sequence,
            url: resolve(&segment.uri)?,
            duration: segment.duration,
            byte_range,
            key: key.as_ref().map(|(uri, iv)| SegmentKey {
                uri: uri.clone(),
                iv: iv.unwrap_or_else(|| sequence_iv(sequence)),
            }),
            init: init.clone(),
        });
    }

    Ok(HlsMedia {
        playlist_url: playlist_url.clone(),
        segments,
        ended: playlist.end_list,
    })
}

/// m3u8-rs only accepts `METHOD=NONE` when an IV is present; the common
/// form without one is left in `unknown_tags` as `X-KEY`.
fn clears_key(segment: &MediaSegment) -> bool {
    segment.unknown_tags.iter().any(|tag| {
        tag.tag == "X-KEY"
            && tag.rest.as_deref().is_some_and(|rest| {
                rest.split(',')
                    .any(|attr| attr.trim().eq_ignore_ascii_case("METHOD=NONE"))
            })
    })
}

/// IV derived from the media sequence number when the key tag has none.
fn sequence_iv(sequence: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&sequence.to_be_bytes());
    iv
}

fn parse_iv(raw: &str) -> Result<[u8; 16], DownloadError> {
    let hex_str = raw
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let bytes = hex::decode(hex_str)
        .map_err(|e| DownloadError::playlist(format!("invalid IV `{raw}`: {e}")))?;
    <[u8; 16]>::try_from(bytes.as_slice())
        .map_err(|_| DownloadError::playlist(format!("IV `{raw}` is not 16 bytes")))
}

/// m3u8-rs only attaches `EXT-X-MAP` to a segment when it appears among the
/// segment tags; a map declared before the first segment ends up in
/// `unknown_tags` as `X-MAP`.
fn playlist_level_map(playlist: &MediaPlaylist) -> Option<(String, Option<ByteSpan>)> {
    let tag = playlist.unknown_tags.iter().rev().find(|t| t.tag == "X-MAP")?;
    let rest = tag.rest.as_deref()?;

    let mut uri = None;
    let mut range = None;
    for part in split_attributes(rest) {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match name.trim() {
            "URI" => uri = Some(value.to_string()),
            "BYTERANGE" => {
                let (length, offset) = match value.split_once('@') {
                    Some((l, o)) => (l.parse().ok()?, o.parse().ok()?),
                    None => (value.parse().ok()?, 0),
                };
                range = Some(ByteSpan { offset, length });
            }
            _ => {}
        }
    }

    uri.map(|u| (u, range))
}

/// Split an attribute list on commas outside quotes.
fn split_attributes(rest: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(rest[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < rest.len() {
        parts.push(rest[start..].trim());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn media(input: &str) -> MediaPlaylist {
        match parse_playlist(input.as_bytes(), &url("https://cdn.example/v/index.m3u8")).unwrap() {
            Playlist::MediaPlaylist(pl) => pl,
            Playlist::MasterPlaylist(_) => panic!("expected media playlist"),
        }
    }

    fn master(input: &str) -> MasterPlaylist {
        match parse_playlist(input.as_bytes(), &url("https://cdn.example/master.m3u8")).unwrap() {
            Playlist::MasterPlaylist(pl) => pl,
            Playlist::MediaPlaylist(_) => panic!("expected master playlist"),
        }
    }

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=256000,RESOLUTION=320x180
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2176000,RESOLUTION=1280x720
hi/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=832000,RESOLUTION=640x360
mid/index.m3u8
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=9000000,URI=\"iframes.m3u8\"
";

    #[test]
    fn variant_policies() {
        let pl = master(MASTER);
        let base = url("https://cdn.example/v/master.m3u8");
        let allowed = ProtocolAllowList::default();
        let pick = |policy| select_variant(&pl, &base, policy, &allowed).unwrap().to_string();

        assert_eq!(
            pick(VariantPolicy::HighestBitrate),
            "https://cdn.example/v/hi/index.m3u8"
        );
        assert_eq!(
            pick(VariantPolicy::LowestBitrate),
            "https://cdn.example/v/low/index.m3u8"
        );
        assert_eq!(
            pick(VariantPolicy::ClosestToBitrate(900_000)),
            "https://cdn.example/v/mid/index.m3u8"
        );
    }

    #[test]
    fn segments_resolve_against_playlist() {
        let pl = media(
            "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:7
#EXTINF:4.0,
seg7.ts
#EXTINF:4.0,
/abs/seg8.ts
#EXTINF:2.5,
https://other.example/seg9.ts
#EXT-X-ENDLIST
",
        );
        let plan = plan_segments(
            &pl,
            &url("https://cdn.example/v/index.m3u8"),
            &ProtocolAllowList::default(),
        )
        .unwrap();

        assert!(plan.ended);
        assert!(!plan.is_fmp4());
        assert_eq!(plan.total_duration(), 10.5);
        let urls: Vec<_> = plan.segments.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://cdn.example/v/seg7.ts",
                "https://cdn.example/abs/seg8.ts",
                "https://other.example/seg9.ts"
            ]
        );
        assert_eq!(plan.segments[2].sequence, 9);
    }

    #[test]
    fn keys_are_carried_forward_with_sequence_iv() {
        let pl = media(
            "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:1
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"
#EXTINF:4.0,
a.ts
#EXTINF:4.0,
b.ts
#EXT-X-KEY:METHOD=AES-128,URI=\"key2.bin\",IV=0x000102030405060708090a0b0c0d0e0f
#EXTINF:4.0,
c.ts
#EXT-X-KEY:METHOD=NONE
#EXTINF:4.0,
d.ts
#EXT-X-ENDLIST
",
        );
        let plan = plan_segments(
            &pl,
            &url("https://cdn.example/v/index.m3u8"),
            &ProtocolAllowList::default(),
        )
        .unwrap();

        let a = plan.segments[0].key.as_ref().unwrap();
        let b = plan.segments[1].key.as_ref().unwrap();
        assert_eq!(a.uri.as_str(), "https://cdn.example/v/key.bin");
        assert_eq!(b.uri, a.uri);
        assert_eq!(a.iv[15], 1);
        assert_eq!(b.iv[15], 2);

        let c = plan.segments[2].key.as_ref().unwrap();
        assert_eq!(c.uri.as_str(), "https://cdn.example/v/key2.bin");
        assert_eq!(c.iv, core::array::from_fn(|i| i as u8));

        assert!(plan.segments[3].key.is_none());
    }

    #[test]
    fn method_none_ends_encryption_until_the_next_key() {
        let pl = media(
            "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"
#EXTINF:4.0,
a.ts
#EXT-X-KEY:METHOD=NONE
#EXTINF:4.0,
b.ts
#EXTINF:4.0,
c.ts
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"
#EXTINF:4.0,
d.ts
#EXT-X-ENDLIST
",
        );
        let plan = plan_segments(
            &pl,
            &url("https://cdn.example/v/index.m3u8"),
            &ProtocolAllowList::default(),
        )
        .unwrap();

        let encrypted: Vec<bool> = plan.segments.iter().map(|s| s.key.is_some()).collect();
        assert_eq!(encrypted, [true, false, false, true]);
    }

    #[test]
    fn sample_aes_is_unsupported() {
        let pl = media(
            "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"skd://key\"
#EXTINF:4.0,
a.ts
#EXT-X-ENDLIST
",
        );
        let err = plan_segments(
            &pl,
            &url("https://cdn.example/v/index.m3u8"),
            &ProtocolAllowList::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DownloadError::Unsupported { .. }), "{err:?}");
    }

    #[test]
    fn byte_ranges_infer_offsets() {
        let pl = media(
            "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-VERSION:4
#EXTINF:4.0,
#EXT-X-BYTERANGE:1000@0
all.ts
#EXTINF:4.0,
#EXT-X-BYTERANGE:500
all.ts
#EXT-X-ENDLIST
",
        );
        let plan = plan_segments(
            &pl,
            &url("https://cdn.example/v/index.m3u8"),
            &ProtocolAllowList::default(),
        )
        .unwrap();
        let ranges: Vec<_> = plan
            .segments
            .iter()
            .map(|s| s.byte_range.unwrap().header_value())
            .collect();
        assert_eq!(ranges, ["bytes=0-999", "bytes=1000-1499"]);
    }

    #[test]
    fn playlist_level_init_map() {
        let pl = media(
            "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-VERSION:7
#EXT-X-MAP:URI=\"init.mp4\"
#EXTINF:4.0,
s1.m4s
#EXTINF:4.0,
s2.m4s
#EXT-X-ENDLIST
",
        );
        let plan = plan_segments(
            &pl,
            &url("https://cdn.example/v/index.m3u8"),
            &ProtocolAllowList::default(),
        )
        .unwrap();
        assert!(plan.is_fmp4());
        for segment in &plan.segments {
            assert_eq!(
                segment.init.as_ref().unwrap().url.as_str(),
                "https://cdn.example/v/init.mp4"
            );
        }
    }

    #[test]
    fn disallowed_segment_scheme_is_rejected() {
        let pl = media(
            "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXTINF:4.0,
file:///etc/passwd
#EXT-X-ENDLIST
",
        );
        let err = plan_segments(
            &pl,
            &url("https://cdn.example/v/index.m3u8"),
            &ProtocolAllowList::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedProtocol { .. }));
    }

    #[test]
    fn iv_parsing() {
        assert!(parse_iv("0x00").is_err());
        assert!(parse_iv("zz").is_err());
        assert_eq!(parse_iv("0X0000000000000000000000000000000A").unwrap()[15], 10);
    }
}
