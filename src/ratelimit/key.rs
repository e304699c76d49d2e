//! Request key generation.

/// Identity used when a caller cannot be identified.
///
/// Every unidentifiable caller shares this bucket.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// A key that uniquely identifies a caller on a protected route.
///
/// The key is composed of the client identity and the route path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// Caller identity (usually an address)
    pub client: String,
    /// The protected route
    pub route: String,
}

impl RequestKey {
    /// Create a new request key. A blank client falls back to [`UNKNOWN_CLIENT`].
    pub fn new(client: &str, route: &str) -> Self {
        let client = client.trim();
        let client = if client.is_empty() { UNKNOWN_CLIENT } else { client };

        Self {
            client: client.to_string(),
            route: route.to_string(),
        }
    }

    /// The string form used as the store key.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.client, self.route)
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client, self.route)
    }
}

/// Pick the caller identity from proxy headers or the peer address.
///
/// The first `X-Forwarded-For` hop wins, then `X-Real-IP`, then the socket
/// peer. Returns [`UNKNOWN_CLIENT`] when nothing usable is present.
pub fn client_identity(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<std::net::IpAddr>,
) -> String {
    let forwarded = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(hop) = forwarded {
        return hop.to_string();
    }

    if let Some(ip) = real_ip.map(str::trim).filter(|value| !value.is_empty()) {
        return ip.to_string();
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
