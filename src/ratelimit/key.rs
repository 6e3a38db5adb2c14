//! Client key identifying who a counter belongs to.

use std::net::IpAddr;

/// A key that identifies a caller for throttling purposes.
///
/// Keys compare by exact string equality; any normalization happens
/// when the key is extracted from a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Create a key from any string-like identity.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key shared by callers whose address could not be determined.
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<IpAddr> for ClientKey {
    fn from(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }
}

impl From<&str> for ClientKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
