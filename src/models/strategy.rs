//! Outbound request identities tried against the origin

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use url::Url;

const CHROME_120: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const CHROME_119: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";
const FIREFOX: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0";
const SAFARI: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15";

const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// How a strategy is picked for each attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyMode {
    /// A random identity per attempt
    #[default]
    Rotate,
    /// Walk the ordered strategy list
    Sequential,
}

impl StrategyMode {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sequential" | "ordered" | "list" => Self::Sequential,
            _ => Self::Rotate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rotate => "rotate",
            Self::Sequential => "sequential",
        }
    }
}

/// Where a strategy's Referer comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefererPolicy {
    None,
    Fixed(String),
    /// `scheme://host/` of the target
    TargetOrigin,
}

/// One candidate set of outbound request headers
#[derive(Debug, Clone)]
pub struct FetchStrategy {
    pub name: &'static str,
    pub user_agent: &'static str,
    pub referer: RefererPolicy,
    pub accept: &'static str,
    pub accept_language: Option<&'static str>,
    /// Send `Origin` and the `Sec-Fetch-*` triple like a browser XHR
    pub browser_fetch_headers: bool,
}

impl FetchStrategy {
    /// The built-in ordered strategy list
    pub fn default_set(default_referer: Option<&str>) -> Vec<FetchStrategy> {
        let primary_referer = default_referer
            .map(|r| RefererPolicy::Fixed(r.to_string()))
            .unwrap_or(RefererPolicy::TargetOrigin);

        vec![
            FetchStrategy {
                name: "chrome-default-referer",
                user_agent: CHROME_120,
                referer: primary_referer,
                accept: "*/*",
                accept_language: Some(ACCEPT_LANGUAGE),
                browser_fetch_headers: false,
            },
            FetchStrategy {
                name: "chrome-cors",
                user_agent: CHROME_119,
                referer: RefererPolicy::TargetOrigin,
                accept: "*/*",
                accept_language: Some(ACCEPT_LANGUAGE),
                browser_fetch_headers: true,
            },
            FetchStrategy {
                name: "firefox-bare",
                user_agent: FIREFOX,
                referer: RefererPolicy::None,
                accept: "*/*",
                accept_language: Some(ACCEPT_LANGUAGE),
                browser_fetch_headers: false,
            },
            FetchStrategy {
                name: "safari",
                user_agent: SAFARI,
                referer: RefererPolicy::TargetOrigin,
                accept: "application/vnd.apple.mpegurl, */*",
                accept_language: None,
                browser_fetch_headers: false,
            },
        ]
    }

    /// Build the header set for `target`; `referer_override` wins over the policy
    pub fn headers_for(&self, target: &str, referer_override: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let origin = target_origin(target);

        headers.insert(header::USER_AGENT, HeaderValue::from_static(self.user_agent));
        headers.insert(header::ACCEPT, HeaderValue::from_static(self.accept));
        if let Some(lang) = self.accept_language {
            headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(lang));
        }

        let referer = match (referer_override, &self.referer) {
            (Some(r), _) => Some(r.to_string()),
            (None, RefererPolicy::Fixed(r)) => Some(r.clone()),
            (None, RefererPolicy::TargetOrigin) => origin.as_ref().map(|o| format!("{}/", o)),
            (None, RefererPolicy::None) => None,
        };
        insert_str(&mut headers, header::REFERER, referer.as_deref());

        if self.browser_fetch_headers {
            insert_str(&mut headers, header::ORIGIN, origin.as_deref());
            headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
            headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
            headers.insert("sec-fetch-site", HeaderValue::from_static("cross-site"));
        }

        headers
    }
}

fn target_origin(target: &str) -> Option<String> {
    let url = Url::parse(target).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

fn insert_str(headers: &mut HeaderMap, name: HeaderName, value: Option<&str>) {
    if let Some(value) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_mode_from_str() {
        assert_eq!(StrategyMode::from_str("sequential"), StrategyMode::Sequential);
        assert_eq!(StrategyMode::from_str("ORDERED"), StrategyMode::Sequential);
        assert_eq!(StrategyMode::from_str("rotate"), StrategyMode::Rotate);
        assert_eq!(StrategyMode::from_str("unknown"), StrategyMode::Rotate);
        assert_eq!(StrategyMode::Sequential.as_str(), "sequential");
    }

    #[test]
    fn test_default_set_is_ordered_and_distinct() {
        let set = FetchStrategy::default_set(None);
        assert_eq!(set.len(), 4);
        assert_eq!(set[0].name, "chrome-default-referer");
        assert_eq!(set[0].referer, RefererPolicy::TargetOrigin);

        let set = FetchStrategy::default_set(Some("https://player.example/"));
        assert_eq!(
            set[0].referer,
            RefererPolicy::Fixed("https://player.example/".to_string())
        );
    }

    #[test]
    fn test_headers_for_target_origin_referer() {
        let strategy = &FetchStrategy::default_set(None)[1];
        let headers = strategy.headers_for("https://cdn.example.com:8443/live/index.m3u8", None);

        assert_eq!(headers[header::USER_AGENT], CHROME_119);
        assert_eq!(headers[header::REFERER], "https://cdn.example.com:8443/");
        assert_eq!(headers[header::ORIGIN], "https://cdn.example.com:8443");
        assert_eq!(headers["sec-fetch-mode"], "cors");
    }

    #[test]
    fn test_headers_for_override_and_none_policy() {
        let set = FetchStrategy::default_set(None);

        let bare = set[2].headers_for("https://cdn.example.com/a.ts", None);
        assert!(bare.get(header::REFERER).is_none());
        assert!(bare.get(header::ORIGIN).is_none());

        let overridden = set[2].headers_for(
            "https://cdn.example.com/a.ts",
            Some("https://cdn.example.com/live/index.m3u8"),
        );
        assert_eq!(
            overridden[header::REFERER],
            "https://cdn.example.com/live/index.m3u8"
        );
    }
}
