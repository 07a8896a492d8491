//! Backend host identity.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::PrimitivesError;

/// URL-style prefix marking a host that requires transport security.
const SECURE_PREFIX: &str = "tls://";

/// Network identity of a backend: host name, port and transport security flag.
///
/// Hosts are totally ordered so that status tables and fan-out results have a
/// stable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostAddress {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Whether the backend requires a secured transport.
    #[serde(default)]
    pub secure: bool,
}

impl HostAddress {
    /// Plain-text host.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            secure: false,
        }
    }

    /// Mark the host as requiring transport security.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// `host:port` suitable for dialing.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<std::net::SocketAddr> for HostAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secure {
            f.write_str(SECURE_PREFIX)?;
        }
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAddress {
    type Err = PrimitivesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (secure, rest) = match s.strip_prefix(SECURE_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| PrimitivesError::InvalidHost(s.to_string()))?;
        if host.is_empty() {
            return Err(PrimitivesError::InvalidHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| PrimitivesError::InvalidHost(s.to_string()))?;
        Ok(Self::new(host, port).with_secure(secure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_secure() {
        let plain: HostAddress = "127.0.0.1:1500".parse().unwrap();
        assert_eq!(plain, HostAddress::new("127.0.0.1", 1500));

        let secure: HostAddress = "tls://backend-a:443".parse().unwrap();
        assert!(secure.secure);
        assert_eq!(secure.authority(), "backend-a:443");
        assert_eq!(secure.to_string(), "tls://backend-a:443");
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        assert!("backend-a".parse::<HostAddress>().is_err());
        assert!(":80".parse::<HostAddress>().is_err());
        assert!("backend-a:http".parse::<HostAddress>().is_err());
    }

    #[test]
    fn test_ordering_by_host_then_port() {
        let a = HostAddress::new("a", 2);
        let b = HostAddress::new("a", 10);
        let c = HostAddress::new("b", 1);
        assert!(a < b && b < c);
    }
}
