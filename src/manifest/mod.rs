//! HLS manifest rewriting
//!
//! Every reference in a playlist is resolved to an absolute URL and, depending
//! on its kind and the routing configuration, wrapped in a relay link so the
//! follow-up request comes back through the relay. Lines are never added,
//! dropped or reordered.

pub mod resolve;

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

pub use resolve::{has_scheme, is_http_url, resolve_url};

use crate::config::RewriteConfig;
use crate::error::{RelayError, Result};

static URI_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"URI="([^"]*)""#).unwrap());

const SEGMENT_EXTENSIONS: &[&str] = &[
    "ts", "m4s", "mp4", "aac", "m4a", "mp3", "vtt", "webvtt", "cmfv", "cmfa", "m4v",
];
const MANIFEST_EXTENSIONS: &[&str] = &["m3u8", "m3u"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Where segment and key references point after rewriting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentRouting {
    /// Through the relay's segment endpoint
    #[default]
    Relay,
    /// Straight to the origin, as a resolved absolute URL
    Direct,
}

impl SegmentRouting {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "direct" | "origin" => Self::Direct,
            _ => Self::Relay,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Direct => "direct",
        }
    }
}

/// Host pattern for auxiliary assets that must go through the relay
///
/// `cdn.example.com` matches that host only; `*.example.net` matches
/// `example.net` and any subdomain of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPattern {
    host: String,
    wildcard: bool,
}

impl HostPattern {
    pub fn new(pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        match pattern.strip_prefix("*.") {
            Some(rest) => Self {
                host: rest.to_string(),
                wildcard: true,
            },
            None => Self {
                host: pattern,
                wildcard: false,
            },
        }
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if host == self.host {
            return true;
        }
        self.wildcard
            && host
                .strip_suffix(self.host.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

/// What a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Segment,
    Manifest,
    Image,
}

impl ReferenceKind {
    /// Classify by the extension of the URL path; unknown extensions are segments
    pub fn classify(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let file = path.rsplit('/').next().unwrap_or(path);
        let ext = match file.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return Self::Segment,
        };

        let ext = ext.as_str();
        if SEGMENT_EXTENSIONS.contains(&ext) {
            Self::Segment
        } else if MANIFEST_EXTENSIONS.contains(&ext) {
            Self::Manifest
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            Self::Image
        } else {
            Self::Segment
        }
    }
}

/// True when a response should be treated as a playlist
pub fn is_manifest(content_type: Option<&str>, url: &str) -> bool {
    content_type
        .map(|ct| ct.to_ascii_lowercase().contains("mpegurl"))
        .unwrap_or(false)
        || url.contains(".m3u8")
}

/// Builds relay URLs for one manifest
#[derive(Debug, Clone)]
pub struct RelayLinks {
    base: String,
    origin: String,
}

impl RelayLinks {
    /// `base` is the relay's public URL, `origin` the session key of the
    /// playlist tree (the top-level manifest URL)
    pub fn new(base: impl Into<String>, origin: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            origin: origin.into(),
        }
    }

    /// Nested playlists carry the session key so a whole playlist tree stays
    /// on one egress path
    pub fn manifest_url(&self, target: &str) -> String {
        format!(
            "{}/?src={}&origin={}",
            self.base,
            urlencoding::encode(target),
            urlencoding::encode(&self.origin)
        )
    }

    pub fn segment_url(&self, target: &str) -> String {
        format!(
            "{}/seg?src={}&origin={}",
            self.base,
            urlencoding::encode(target),
            urlencoding::encode(&self.origin)
        )
    }

    pub fn asset_url(&self, target: &str) -> String {
        format!(
            "{}/asset?src={}&origin={}",
            self.base,
            urlencoding::encode(target),
            urlencoding::encode(&self.origin)
        )
    }
}

/// Per-rewrite state
struct ManifestContext<'a> {
    base: Url,
    links: &'a RelayLinks,
    /// The next URI line is a variant playlist (follows `#EXT-X-STREAM-INF`)
    expect_variant: bool,
}

pub struct ManifestRewriter {
    config: RewriteConfig,
}

impl ManifestRewriter {
    pub fn new(config: RewriteConfig) -> Self {
        Self { config }
    }

    /// Rewrite `text`, fetched from `base_url`
    ///
    /// Fails with [`RelayError::Rewrite`] when the text is not an M3U
    /// playlist or the base URL is unusable; callers fall back to the
    /// original text.
    pub fn rewrite(&self, text: &str, base_url: &str, links: &RelayLinks) -> Result<String> {
        let rewritten = self.rewrite_bytes(text.as_bytes(), base_url, links)?;
        String::from_utf8(rewritten).map_err(|e| RelayError::Rewrite(e.to_string()))
    }

    /// Rewrite a raw playlist body
    ///
    /// Lines that are not valid UTF-8 are copied through byte for byte.
    pub fn rewrite_bytes(&self, body: &[u8], base_url: &str, links: &RelayLinks) -> Result<Vec<u8>> {
        let header = body.strip_prefix(UTF8_BOM).unwrap_or(body).trim_ascii_start();
        if !header.starts_with(b"#EXTM3U") {
            return Err(RelayError::Rewrite("missing #EXTM3U header".to_string()));
        }
        let base = Url::parse(base_url)
            .map_err(|e| RelayError::Rewrite(format!("invalid base URL: {}", e)))?;

        let mut ctx = ManifestContext {
            base,
            links,
            expect_variant: false,
        };

        let mut out = Vec::with_capacity(body.len() * 2);
        for (i, raw) in body.split(|&b| b == b'\n').enumerate() {
            if i > 0 {
                out.push(b'\n');
            }
            match std::str::from_utf8(raw) {
                Ok(line) => out.extend_from_slice(self.rewrite_line(line, &mut ctx).as_bytes()),
                Err(_) => {
                    if !raw.trim_ascii_start().starts_with(b"#") {
                        ctx.expect_variant = false;
                    }
                    out.extend_from_slice(raw);
                }
            }
        }
        Ok(out)
    }

    fn rewrite_line(&self, raw: &str, ctx: &mut ManifestContext<'_>) -> String {
        let (line, cr) = match raw.strip_suffix('\r') {
            Some(line) => (line, "\r"),
            None => (raw, ""),
        };
        let trimmed = line.trim_start_matches('\u{feff}').trim();
        if trimmed.is_empty() {
            return raw.to_string();
        }

        if trimmed.starts_with('#') {
            return match self.rewrite_tag(line, ctx) {
                Some(rewritten) => format!("{}{}", rewritten, cr),
                None => raw.to_string(),
            };
        }

        let resolved = resolve_url(trimmed, &ctx.base);
        let kind = if std::mem::take(&mut ctx.expect_variant) {
            ReferenceKind::Manifest
        } else {
            ReferenceKind::classify(&resolved)
        };
        format!("{}{}", self.route(&resolved, kind, ctx.links), cr)
    }

    /// Rewrite `URI="..."` attributes of `#EXT` tags; `None` leaves the
    /// line untouched
    ///
    /// Tags without a known kind still get their URIs made absolute, but
    /// are not pointed at the relay.
    fn rewrite_tag(&self, line: &str, ctx: &mut ManifestContext<'_>) -> Option<String> {
        let tag = line.trim_start();
        let name = tag.split(':').next().unwrap_or(tag);

        let kind = match name {
            "#EXT-X-STREAM-INF" => {
                ctx.expect_variant = true;
                return None;
            }
            "#EXT-X-KEY" | "#EXT-X-SESSION-KEY" | "#EXT-X-MAP" | "#EXT-X-PART"
            | "#EXT-X-PRELOAD-HINT" => Some(ReferenceKind::Segment),
            "#EXT-X-MEDIA" | "#EXT-X-I-FRAME-STREAM-INF" | "#EXT-X-RENDITION-REPORT" => {
                Some(ReferenceKind::Manifest)
            }
            _ if name.starts_with("#EXT") => None,
            _ => return None,
        };

        if !URI_ATTRIBUTE.is_match(line) {
            return None;
        }

        let rewritten = URI_ATTRIBUTE.replace_all(line, |caps: &Captures<'_>| {
            let uri = &caps[1];
            if uri.is_empty() {
                return caps[0].to_string();
            }
            let resolved = resolve_url(uri, &ctx.base);
            let target = match kind {
                Some(kind) => self.route(&resolved, kind, ctx.links),
                None => resolved,
            };
            format!("URI=\"{}\"", target)
        });
        Some(rewritten.into_owned())
    }

    fn route(&self, resolved: &str, kind: ReferenceKind, links: &RelayLinks) -> String {
        if !is_http_url(resolved) {
            return resolved.to_string();
        }

        match kind {
            ReferenceKind::Manifest => links.manifest_url(resolved),
            ReferenceKind::Segment => match self.config.segments {
                SegmentRouting::Relay => links.segment_url(resolved),
                SegmentRouting::Direct => resolved.to_string(),
            },
            ReferenceKind::Image => {
                let relayed = Url::parse(resolved)
                    .ok()
                    .and_then(|url| url.host_str().map(|h| h.to_string()))
                    .is_some_and(|host| {
                        self.config
                            .asset_relay_hosts
                            .iter()
                            .any(|p| p.matches(&host))
                    });
                if relayed {
                    links.asset_url(resolved)
                } else {
                    resolved.to_string()
                }
            }
        }
    }
}
