//! Endpoint strings.
//!
//! Accepted forms, tried in order (first match wins):
//!
//! 1. `host` or `host:port`, where `host` contains no `:`, `[` or `]`;
//! 2. a bare address literal of hex digits and colons (`fe80::1`), which
//!    takes the default port;
//! 3. `[literal]:port`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Host used when nothing is configured.
pub const DEFAULT_HOST: &str = "localhost";
/// Control port used when the endpoint string carries none.
pub const DEFAULT_PORT: u16 = 38500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("empty endpoint")]
    Empty,

    #[error("endpoint {0:?} matches no accepted form")]
    Unrecognized(String),

    #[error("invalid port in endpoint {0:?}")]
    InvalidPort(String),
}

/// A host and port pair taken from an endpoint string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `text`, filling in `default_port` when the form has no port.
    ///
    /// # Errors
    ///
    /// [`EndpointError`] when `text` matches none of the accepted forms.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tia_core::protocol::Endpoint;
    ///
    /// let ep = Endpoint::parse("[::1]:9000", 38500).unwrap();
    /// assert_eq!((ep.host(), ep.port()), ("::1", 9000));
    /// ```
    pub fn parse(text: &str, default_port: u16) -> Result<Self, EndpointError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EndpointError::Empty);
        }

        if let Some(endpoint) = parse_host_port(text, default_port)? {
            return Ok(endpoint);
        }
        if is_address_literal(text) {
            return Ok(Self::new(text, default_port));
        }
        if let Some(endpoint) = parse_bracketed(text)? {
            return Ok(endpoint);
        }
        Err(EndpointError::Unrecognized(text.to_string()))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The same host with another port, used for the data connection.
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.host.clone(), port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, DEFAULT_PORT)
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

fn is_host_char(c: char) -> bool {
    !matches!(c, ':' | '[' | ']') && !c.is_whitespace()
}

fn is_address_literal(s: &str) -> bool {
    s.contains(':') && s.chars().all(|c| c == ':' || c.is_ascii_hexdigit())
}

/// Form 1.  `Ok(None)` means "not this form", so later forms get a try.
fn parse_host_port(text: &str, default_port: u16) -> Result<Option<Endpoint>, EndpointError> {
    let (host, port) = match text.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (text, None),
    };
    if host.is_empty() || !host.chars().all(is_host_char) {
        return Ok(None);
    }
    match port {
        None => Ok(Some(Endpoint::new(host, default_port))),
        Some(port) if port.bytes().all(|b| b.is_ascii_digit()) && !port.is_empty() => {
            let port = parse_port(port).ok_or_else(|| EndpointError::InvalidPort(text.to_string()))?;
            Ok(Some(Endpoint::new(host, port)))
        }
        Some(_) => Ok(None),
    }
}

/// Form 3.
fn parse_bracketed(text: &str) -> Result<Option<Endpoint>, EndpointError> {
    let Some(rest) = text.strip_prefix('[') else {
        return Ok(None);
    };
    let Some((literal, port)) = rest.split_once("]:") else {
        return Ok(None);
    };
    if literal.is_empty() || literal.contains(['[', ']']) {
        return Ok(None);
    }
    let port = parse_port(port).ok_or_else(|| EndpointError::InvalidPort(text.to_string()))?;
    Ok(Some(Endpoint::new(literal, port)))
}

fn parse_port(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u16>().ok().filter(|&p| p != 0)
}
