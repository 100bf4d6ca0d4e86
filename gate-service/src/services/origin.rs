use async_trait::async_trait;
use axum::http::HeaderMap;
use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};

/// Origin reported when the caller's address cannot be resolved.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Best-effort resolution of the caller's network origin. Never fails.
#[async_trait]
pub trait OriginResolver: Send + Sync {
    async fn resolve_caller_origin(&self) -> String;
}

/// Origin already known, e.g. taken from the inbound connection.
#[derive(Debug, Clone)]
pub struct FixedOrigin(pub String);

impl FixedOrigin {
    pub fn unknown() -> Self {
        Self(UNKNOWN_ORIGIN.to_string())
    }
}

#[async_trait]
impl OriginResolver for FixedOrigin {
    async fn resolve_caller_origin(&self) -> String {
        self.0.clone()
    }
}

/// Reverse proxies allowed to report the caller's address in
/// `x-forwarded-for` / `x-real-ip`. Headers from any other peer are ignored.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(Vec<IpNetwork>);

impl TrustedProxies {
    pub fn new(networks: Vec<IpNetwork>) -> Self {
        Self(networks)
    }

    /// Parse a comma-separated list of CIDRs or bare addresses.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let networks = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpNetwork>()
                    .map_err(|e| format!("Invalid trusted proxy '{}': {}", s, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(networks))
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.iter().any(|net| net.contains(ip))
    }

    /// Origin of the request arriving from `peer`.
    ///
    /// Without a trusted peer the socket address is the origin. Behind a
    /// trusted proxy the `x-forwarded-for` chain is walked from the right and
    /// the first hop that is not itself a trusted proxy wins.
    pub fn caller_origin(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let Some(peer) = peer.map(|p| p.ip()) else {
            return UNKNOWN_ORIGIN.to_string();
        };
        if !self.contains(peer) {
            return peer.to_string();
        }

        self.forwarded_client(headers)
            .or_else(|| real_ip(headers))
            .unwrap_or(peer)
            .to_string()
    }

    fn forwarded_client(&self, headers: &HeaderMap) -> Option<IpAddr> {
        let chain = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .map(|hop| hop.parse::<IpAddr>().ok())
            .collect::<Option<Vec<_>>>()?;

        chain
            .iter()
            .rev()
            .find(|ip| !self.contains(**ip))
            .or_else(|| chain.first())
            .copied()
    }
}

fn real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarded(chain: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", chain.parse().unwrap());
        headers
    }

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(format!("{}:9000", addr).parse().unwrap())
    }

    #[test]
    fn test_untrusted_peer_headers_are_ignored() {
        let proxies = TrustedProxies::parse("10.0.0.0/8").unwrap();
        let headers = forwarded("203.0.113.10");

        assert_eq!(proxies.caller_origin(&headers, peer("198.51.100.9")), "198.51.100.9");
        assert_eq!(
            TrustedProxies::default().caller_origin(&headers, peer("10.0.0.2")),
            "10.0.0.2"
        );
    }

    #[test]
    fn test_trusted_proxy_yields_rightmost_untrusted_hop() {
        let proxies = TrustedProxies::parse("10.0.0.0/8, 192.0.2.1").unwrap();

        let headers = forwarded("1.2.3.4, 203.0.113.7, 192.0.2.1");
        assert_eq!(proxies.caller_origin(&headers, peer("10.0.0.2")), "203.0.113.7");

        let all_proxies = forwarded("10.1.1.1, 192.0.2.1");
        assert_eq!(proxies.caller_origin(&all_proxies, peer("10.0.0.2")), "10.1.1.1");
    }

    #[test]
    fn test_trusted_proxy_falls_back_to_real_ip_then_peer() {
        let proxies = TrustedProxies::parse("10.0.0.1").unwrap();
        let mut headers = forwarded("not-an-ip");
        headers.insert("x-real-ip", "203.0.113.8".parse().unwrap());

        assert_eq!(proxies.caller_origin(&headers, peer("10.0.0.1")), "203.0.113.8");
        assert_eq!(proxies.caller_origin(&HeaderMap::new(), peer("10.0.0.1")), "10.0.0.1");
    }

    #[test]
    fn test_missing_peer_is_unknown() {
        let proxies = TrustedProxies::parse("10.0.0.0/8").unwrap();
        assert_eq!(proxies.caller_origin(&forwarded("203.0.113.7"), None), UNKNOWN_ORIGIN);
    }

    #[test]
    fn test_invalid_proxy_entry_is_rejected() {
        assert!(TrustedProxies::parse("10.0.0.0/8, nope").is_err());
    }
}
