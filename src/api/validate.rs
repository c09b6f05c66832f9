//! Target URL validation

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::error::{RelayError, Result};

/// Parse and check the `src` parameter
///
/// Only absolute `http`/`https` URLs with a host are accepted. With
/// `block_private` set, literal loopback, private, link-local and
/// unspecified addresses are refused, as is `localhost`.
pub fn validate_target(src: Option<&str>, block_private: bool) -> Result<Url> {
    let src = src
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RelayError::Validation("'src' parameter is required".to_string()))?;

    let url = Url::parse(src)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RelayError::Validation(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host()
        .ok_or_else(|| RelayError::Validation("target URL has no host".to_string()))?;

    if block_private && is_private_host(&host) {
        return Err(RelayError::Validation(
            "target host is not publicly routable".to_string(),
        ));
    }

    Ok(url)
}

fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_private_v4(ip),
        Host::Ipv6(ip) => is_private_v6(ip),
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}
