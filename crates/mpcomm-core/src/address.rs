//! Endpoint addresses of the form `scheme://host:port/servicePath`.
//!
//! The same string is used as a connection target and, verbatim, as the
//! `to`/`from` value of an [`Envelope`](crate::Envelope). The scheme is kept
//! for display only; the transport always dials `host:port` over TCP.

use crate::config::CommConfig;
use crate::error::{CommError, Result};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// A parsed receiver endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    scheme: String,
    host: String,
    port: u16,
    service_path: String,
}

impl EndpointAddress {
    /// Compose the canonical address for a base like `http://localhost`.
    pub fn new(base_address: &str, port: u16) -> Result<Self> {
        let base = base_address.trim_end_matches('/');
        Self::parse(&format!("{}:{}/{}", base, port, CommConfig::SERVICE_PATH))
    }

    /// Parse a fully qualified address. A port is mandatory unless the scheme
    /// has a well-known default.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |message: String| CommError::InvalidAddress {
            address: address.to_string(),
            message,
        };

        let url = Url::parse(address).map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host".to_string()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port".to_string()))?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port,
            service_path: url.path().trim_start_matches('/').to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn service_path(&self) -> &str {
        &self.service_path
    }

    /// `host:port` string handed to the TCP connector.
    pub fn socket_target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Same endpoint on a different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.scheme, self.host, self.port, self.service_path
        )
    }
}

impl FromStr for EndpointAddress {
    type Err = CommError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_composes_canonical_form() {
        let addr = EndpointAddress::new("http://localhost", 8080).unwrap();
        assert_eq!(
            addr.to_string(),
            "http://localhost:8080/MessagePassingComm"
        );
        assert_eq!(addr.socket_target(), "localhost:8080");
    }

    #[test]
    fn test_parse_fields() {
        let addr = EndpointAddress::parse("tcp://127.0.0.1:9000/Files").unwrap();
        assert_eq!(addr.scheme(), "tcp");
        assert_eq!(addr.host(), "127.0.0.1");
        assert_eq!(addr.port(), 9000);
        assert_eq!(addr.service_path(), "Files");
    }

    #[test]
    fn test_parse_uses_scheme_default_port() {
        let addr = EndpointAddress::parse("http://example.com/MessagePassingComm").unwrap();
        assert_eq!(addr.port(), 80);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(EndpointAddress::parse("not an address").is_err());
        assert!(EndpointAddress::parse("tcp://hostonly/svc").is_err());
    }

    #[test]
    fn test_with_port() {
        let addr = EndpointAddress::new("http://localhost", 8080).unwrap();
        let moved = addr.with_port(8081);
        assert_eq!(moved.port(), 8081);
        assert_eq!(moved.host(), "localhost");
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        let addr = EndpointAddress::new("http://127.0.0.1", 8123).unwrap();
        let reparsed: EndpointAddress = addr.to_string().parse().unwrap();
        assert_eq!(addr, reparsed);
    }
}
