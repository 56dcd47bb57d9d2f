use axum::{
    extract::{connect_info::ConnectInfo, FromRequestParts},
    http::{header::USER_AGENT, request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use super::sanitize::sanitize_string;

const MAX_USER_AGENT_CHARS: usize = 512;

/// Extract client IP from proxy headers and optional transport metadata.
pub fn extract_ip_from_headers(headers: &HeaderMap, fallback: Option<IpAddr>) -> IpAddr {
    if let Some(h) = headers.get("x-forwarded-for").and_then(|hv| hv.to_str().ok()) {
        if let Some(first) = h.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    if let Some(h) = headers.get("x-real-ip").and_then(|hv| hv.to_str().ok()) {
        if let Ok(ip) = h.trim().parse::<IpAddr>() {
            return ip;
        }
    }
    if let Some(ip) = fallback {
        return ip;
    }
    IpAddr::from([127, 0, 0, 1])
}

/// Request metadata used as the rate-limit caller key and recorded in audit entries.
///
/// The user agent is kept as sent, minus control characters and capped in length; log
/// output escapes it separately.
///
/// Never rejects: without `ConnectInfo` (tests, custom services) the address falls back to
/// the forwarding headers and then to loopback.
#[derive(Clone, Debug)]
pub struct ClientMeta {
    pub ip: IpAddr,
    pub user_agent: Option<String>,
}

impl ClientMeta {
    pub fn from_headers(headers: &HeaderMap, remote: Option<SocketAddr>) -> Self {
        let ip = extract_ip_from_headers(headers, remote.map(|addr| addr.ip()));
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| sanitize_string(ua, MAX_USER_AGENT_CHARS))
            .filter(|ua| !ua.is_empty());
        Self { ip, user_agent }
    }
}

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let remote = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| *addr);
        Ok(ClientMeta::from_headers(&parts.headers, remote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(extract_ip_from_headers(&headers, None), "203.0.113.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_falls_back_to_real_ip_then_socket_then_loopback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(extract_ip_from_headers(&headers, None), "198.51.100.2".parse::<IpAddr>().unwrap());

        let remote: IpAddr = "192.0.2.9".parse().unwrap();
        assert_eq!(extract_ip_from_headers(&HeaderMap::new(), Some(remote)), remote);
        assert_eq!(extract_ip_from_headers(&HeaderMap::new(), None), IpAddr::from([127, 0, 0, 1]));
    }

    #[test]
    fn test_client_meta_keeps_user_agent_text() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.0\t\"quoted\" 'x'"));
        let meta = ClientMeta::from_headers(&headers, None);
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8.0\"quoted\" 'x'"));

        headers.insert(USER_AGENT, HeaderValue::from_str(&"a".repeat(2000)).unwrap());
        let meta = ClientMeta::from_headers(&headers, None);
        assert_eq!(meta.user_agent.map(|ua| ua.chars().count()), Some(MAX_USER_AGENT_CHARS));

        headers.insert(USER_AGENT, HeaderValue::from_static("   "));
        assert_eq!(ClientMeta::from_headers(&headers, None).user_agent, None);
    }
}
