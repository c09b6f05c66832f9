//! Reference resolution against a manifest's own URL

use url::Url;

/// True when `reference` starts with `scheme:` (RFC 3986)
pub fn has_scheme(reference: &str) -> bool {
    let Some((scheme, _)) = reference.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Turn a manifest reference into an absolute URL
///
/// References with a scheme are returned unchanged, protocol-relative ones
/// get `https:`, everything else is joined onto `base`.
pub fn resolve_url(reference: &str, base: &Url) -> String {
    if has_scheme(reference) {
        return reference.to_string();
    }
    if reference.starts_with("//") {
        return format!("https:{}", reference);
    }
    match base.join(reference) {
        Ok(url) => url.to_string(),
        Err(_) => reference.to_string(),
    }
}

/// True for absolute `http`/`https` URLs
pub fn is_http_url(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/live/index.m3u8").unwrap()
    }

    #[test]
    fn test_relative_segment_resolves_against_base_directory() {
        assert_eq!(
            resolve_url("segment.ts", &base()),
            "https://cdn.example.com/live/segment.ts"
        );
        assert_eq!(
            resolve_url("../vod/seg.ts?token=abc", &base()),
            "https://cdn.example.com/vod/seg.ts?token=abc"
        );
        assert_eq!(
            resolve_url("/root.ts", &base()),
            "https://cdn.example.com/root.ts"
        );
    }

    #[test]
    fn test_protocol_relative_gets_https_regardless_of_base() {
        let http_base = Url::parse("http://other.example/a/b.m3u8").unwrap();
        assert_eq!(
            resolve_url("//cdn2.example.com/key.bin", &base()),
            "https://cdn2.example.com/key.bin"
        );
        assert_eq!(
            resolve_url("//cdn2.example.com/key.bin", &http_base),
            "https://cdn2.example.com/key.bin"
        );
    }

    #[test]
    fn test_schemed_references_are_untouched() {
        for reference in [
            "http://a.example/x.ts",
            "HTTPS://A.example/x.ts",
            "skd://key-id",
            "data:text/plain;base64,AAAA",
        ] {
            assert_eq!(resolve_url(reference, &base()), reference);
        }
    }

    #[test]
    fn test_resolution_is_idempotent() {
        for reference in [
            "segment.ts",
            "../up.m3u8",
            "//cdn2.example.com/key.bin",
            "https://x.example/a.ts",
            "sub/dir/file.m4s?x=1#frag",
        ] {
            let once = resolve_url(reference, &base());
            assert_eq!(resolve_url(&once, &base()), once);
        }
    }

    #[test]
    fn test_has_scheme() {
        assert!(has_scheme("https://a"));
        assert!(has_scheme("skd://a"));
        assert!(has_scheme("data:x"));
        assert!(!has_scheme("segment.ts"));
        assert!(!has_scheme("//host/path"));
        assert!(!has_scheme("1abc:def"));
        assert!(!has_scheme("path/with:colon"));
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://a.example/x"));
        assert!(is_http_url("HTTP://a.example/x"));
        assert!(!is_http_url("skd://key"));
        assert!(!is_http_url("data:"));
    }
}
