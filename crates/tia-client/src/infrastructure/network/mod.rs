//! Network infrastructure for the client.
//!
//! - [`connect`] resolves an [`Endpoint`] and opens a TCP stream to it.
//! - [`control::ControlChannel`] runs the text handshake over that stream.
//! - [`data_reader`] owns the binary data connection on a background task.

pub mod control;
pub mod data_reader;

use std::io;

use thiserror::Error;
use tia_core::protocol::{Endpoint, EndpointError};
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

/// Errors raised while turning an endpoint into a connected socket.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] EndpointError),

    /// Name resolution failed or produced no addresses.
    #[error("could not resolve {endpoint}: {source}")]
    Resolve {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    /// Every resolved address refused or failed the connect.
    #[error("could not connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
}

/// Parses `text` and connects to it; see [`connect`].
///
/// # Errors
///
/// [`ConnectionError::Endpoint`] if `text` matches no accepted form, otherwise
/// as for [`connect`].
pub async fn connect_str(text: &str, default_port: u16) -> Result<(Endpoint, TcpStream), ConnectionError> {
    let endpoint = Endpoint::parse(text, default_port)?;
    let stream = connect(&endpoint).await?;
    Ok((endpoint, stream))
}

/// Resolves `endpoint` and connects to the first address that accepts.
///
/// # Errors
///
/// [`ConnectionError::Resolve`] if the host does not resolve,
/// [`ConnectionError::Connect`] carrying the last connect error if no
/// address accepts.
pub async fn connect(endpoint: &Endpoint) -> Result<TcpStream, ConnectionError> {
    let addrs: Vec<_> = lookup_host((endpoint.host(), endpoint.port()))
        .await
        .map_err(|source| ConnectionError::Resolve {
            endpoint: endpoint.clone(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ConnectionError::Resolve {
            endpoint: endpoint.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
        });
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!("connected to {endpoint} via {addr}");
                stream.set_nodelay(true).map_err(|source| ConnectionError::Connect {
                    endpoint: endpoint.clone(),
                    source,
                })?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("connect to {addr} failed: {e}");
                last_error = Some(e);
            }
        }
    }

    Err(ConnectionError::Connect {
        endpoint: endpoint.clone(),
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address accepted")),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_reaches_local_listener() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Act
        let (endpoint, stream) = connect_str("127.0.0.1", port).await.expect("connect");

        // Assert
        assert_eq!(endpoint.port(), port);
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = connect(&Endpoint::new("127.0.0.1", port)).await;

        assert!(matches!(result, Err(ConnectionError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_bad_endpoint_string_is_endpoint_error() {
        let result = connect_str("[::1]", 38500).await;
        assert!(matches!(result, Err(ConnectionError::Endpoint(_))));
    }
}
