//! Connection strings.
//!
//! Accepts `host` or `host:port`. A missing port means [`DEFAULT_PORT`];
//! `localhost` maps to the IPv4 loopback address. Anything else is passed to
//! the transport for normal name resolution.

use std::{fmt, net::Ipv4Addr, str::FromStr};

use karman_proto::DEFAULT_PORT;
use thiserror::Error;

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address literal
    pub host: String,
    /// TCP port
    pub port: u16,
}

/// Why a connection string could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// Nothing to connect to
    #[error("empty connection string")]
    Empty,

    /// Port is not a number in `1..=65535`
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}

impl Endpoint {
    /// Build an endpoint from parts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Parse `host` or `host:port`.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EndpointError::Empty);
        }

        let (host, port) = match input.rsplit_once(':') {
            // Bare IPv6 literals contain colons but no port
            Some((host, _)) if host.contains(':') && !host.starts_with('[') => (input, DEFAULT_PORT),
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|port| *port != 0)
                    .ok_or_else(|| EndpointError::InvalidPort(input.to_string()))?;
                (host, port)
            },
            None => (input, DEFAULT_PORT),
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(EndpointError::Empty);
        }

        let host = if host.eq_ignore_ascii_case("localhost") {
            Ipv4Addr::LOCALHOST.to_string()
        } else {
            host.to_string()
        };

        Ok(Self { host, port })
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
