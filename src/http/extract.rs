//! Client key extraction from inbound requests.

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderName};
use std::net::{IpAddr, SocketAddr};

use crate::ratelimit::ClientKey;

/// Where the client identity comes from.
#[derive(Debug, Clone, Default)]
pub enum KeySource {
    /// The TCP peer address only.
    #[default]
    PeerAddr,
    /// The first address in a header set by a trusted proxy, falling back
    /// to the peer address when the header is absent or unparsable.
    TrustedHeader(HeaderName),
}

impl KeySource {
    pub fn from_header(header: Option<HeaderName>) -> Self {
        header.map_or(KeySource::PeerAddr, KeySource::TrustedHeader)
    }
}

/// Derive the client key for `request`.
///
/// Requests that carry no usable address share [`ClientKey::unknown`], so
/// they are still throttled as a group.
pub fn client_key(request: &Request, source: &KeySource) -> ClientKey {
    if let KeySource::TrustedHeader(name) = source {
        if let Some(ip) = forwarded_ip(request.headers(), name) {
            return ClientKey::from(ip);
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| ClientKey::from(addr.ip()))
        .unwrap_or_else(ClientKey::unknown)
}

/// Left-most address of a comma separated forwarding header.
fn forwarded_ip(headers: &HeaderMap, name: &HeaderName) -> Option<IpAddr> {
    let value = headers.get(name)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    first.parse().ok()
}
