//! Client IP extraction from HTTP headers with trust validation
//!
//! The address produced here is what IP filters are evaluated against and
//! what gets stored on the capture event:
//! - `Forwarded` and `X-Forwarded-For` are honoured only in standard mode, and
//!   only when the socket peer is a configured trusted proxy
//! - `CF-Connecting-IP` is honoured only in Cloudflare mode
//! - otherwise the socket peer address is used
//! - IPv4-mapped IPv6 addresses are folded back to IPv4

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{CaptureConfig, TrustedProxyMode};

/// Extract the client IP address for a capture request
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &CaptureConfig,
) -> IpAddr {
    let ip = match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard if peer_is_trusted(socket_addr, config) => {
            extract_standard_ip(headers, config).unwrap_or(socket_addr)
        }
        TrustedProxyMode::Standard => socket_addr,
        TrustedProxyMode::None => socket_addr,
    };
    ip.to_canonical()
}

/// Forwarding headers are only believed when the connection itself comes from
/// a proxy we know. With a CIDR list the peer must fall inside it; a bare hop
/// count vouches for whatever is in front of us; with neither, nobody is trusted.
fn peer_is_trusted(socket_addr: IpAddr, config: &CaptureConfig) -> bool {
    if !config.trusted_proxies.is_empty() {
        let peer = socket_addr.to_canonical();
        return config.trusted_proxies.iter().any(|net| net.contains(&peer));
    }
    config.num_trusted_proxies.is_some()
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(headers: &HeaderMap, config: &CaptureConfig) -> Option<IpAddr> {
    // RFC 7239 first
    let forwarded = extract_from_forwarded(headers);
    if !forwarded.is_empty() {
        return select_from_chain(&forwarded, config);
    }

    let xff = extract_from_x_forwarded_for(headers);
    if !xff.is_empty() {
        return select_from_chain(&xff, config);
    }

    None
}

/// `for=` addresses of a `Forwarded` header, left to right
fn extract_from_forwarded(headers: &HeaderMap) -> Vec<IpAddr> {
    let Some(forwarded) = headers.get("forwarded").and_then(|h| h.to_str().ok()) else {
        return Vec::new();
    };

    // Forwarded: for=192.0.2.60;proto=http, for="[2001:db8::1]:4711"
    forwarded
        .split(',')
        .filter_map(|element| {
            element.split(';').find_map(|param| {
                let (key, value) = param.trim().split_once('=')?;
                if !key.eq_ignore_ascii_case("for") {
                    return None;
                }
                parse_forwarded_node(value)
            })
        })
        .collect()
}

fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');
    if let Some(rest) = value.strip_prefix('[') {
        // Bracketed IPv6, optional port after the bracket
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    // IPv4 with port
    value.rsplit_once(':')?.0.parse().ok()
}

fn extract_from_x_forwarded_for(headers: &HeaderMap) -> Vec<IpAddr> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect()
}

/// Walk a forwarding chain right to left, skipping hops we trust
fn select_from_chain(chain: &[IpAddr], config: &CaptureConfig) -> Option<IpAddr> {
    if let Some(num_trusted) = config.num_trusted_proxies {
        if chain.len() > num_trusted {
            return Some(chain[chain.len() - num_trusted - 1]);
        }
        // Not enough hops, the leftmost entry is all we have
        return chain.first().copied();
    }

    if !config.trusted_proxies.is_empty() {
        let is_trusted = |ip: &IpAddr| {
            let ip = ip.to_canonical();
            config.trusted_proxies.iter().any(|net| net.contains(&ip))
        };
        return chain
            .iter()
            .rev()
            .find(|ip| !is_trusted(ip))
            .or_else(|| chain.first())
            .copied();
    }

    chain.last().copied()
}
