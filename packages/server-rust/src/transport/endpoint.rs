//! Endpoint URL parsing.
//!
//! Two forms select the transport:
//!
//! - `discovery://host[:port]/binding` resolves `binding` through the
//!   discovery service at `host:port` (port defaults to 9999)
//! - `direct://host:port` connects straight to a registry stream listener

use std::fmt;

use opbridge_core::messages::DEFAULT_DISCOVERY_PORT;

use crate::bridge::ConnectionError;

/// A parsed registry endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointUrl {
    Discovery {
        host: String,
        port: u16,
        binding: String,
    },
    Direct {
        host: String,
        port: u16,
    },
}

impl EndpointUrl {
    /// Parses an endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::MalformedEndpoint`] for an unknown scheme, a
    /// missing host or port, an invalid port, or a missing binding name.
    pub fn parse(url: &str) -> Result<Self, ConnectionError> {
        let malformed = |reason: &str| ConnectionError::MalformedEndpoint {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| malformed("missing scheme"))?;

        match scheme {
            "discovery" => {
                let (authority, binding) = rest
                    .split_once('/')
                    .ok_or_else(|| malformed("missing binding name"))?;
                let binding = binding.trim_end_matches('/');
                if binding.is_empty() {
                    return Err(malformed("missing binding name"));
                }
                let (host, port) = parse_authority(authority, Some(DEFAULT_DISCOVERY_PORT))
                    .map_err(|reason| malformed(reason))?;
                Ok(Self::Discovery {
                    host,
                    port,
                    binding: binding.to_string(),
                })
            }
            "direct" => {
                let authority = rest.strip_suffix('/').unwrap_or(rest);
                if authority.contains('/') {
                    return Err(malformed("direct endpoints take no path"));
                }
                let (host, port) =
                    parse_authority(authority, None).map_err(|reason| malformed(reason))?;
                Ok(Self::Direct { host, port })
            }
            _ => Err(malformed("scheme must be discovery or direct")),
        }
    }

    /// `host:port` of the first hop: the discovery service or the registry.
    #[must_use]
    pub fn address(&self) -> String {
        match self {
            Self::Discovery { host, port, .. } | Self::Direct { host, port } => {
                format!("{host}:{port}")
            }
        }
    }
}

fn parse_authority(authority: &str, default_port: Option<u16>) -> Result<(String, u16), &'static str> {
    // Bracketed IPv6 hosts keep their colons inside the brackets.
    let split = match authority.rfind(':') {
        Some(idx) if !authority[idx..].contains(']') => {
            Some((&authority[..idx], &authority[idx + 1..]))
        }
        _ => None,
    };

    let (host, port) = match (split, default_port) {
        (Some((host, port)), _) => {
            let port = port.parse::<u16>().map_err(|_| "invalid port")?;
            (host, port)
        }
        (None, Some(port)) => (authority, port),
        (None, None) => return Err("missing port"),
    };

    if host.is_empty() {
        return Err("missing host");
    }
    if port == 0 {
        return Err("port must be non-zero");
    }
    Ok((host.to_string(), port))
}

impl fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery {
                host,
                port,
                binding,
            } => write!(f, "discovery://{host}:{port}/{binding}"),
            Self::Direct { host, port } => write!(f, "direct://{host}:{port}"),
        }
    }
}
