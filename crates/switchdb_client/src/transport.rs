//! Stream dialing and the TLS seam.
//!
//! The connection layer only needs an ordered byte stream. Plain TCP and
//! unix sockets are dialed here; TLS is delegated to a caller-supplied
//! connector so the client does not pick a TLS implementation for its
//! users.

use crate::endpoint::Endpoint;
use crate::error::{ClientError, ClientResult};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Any ordered byte stream the connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// A dialed stream, ready for framing.
pub type BoxedTransport = Box<dyn Transport>;

/// Upgrades a fresh TCP stream to TLS.
///
/// Implementations wrap rustls, native-tls, or whatever the application
/// already links; `host` is the endpoint's host for certificate
/// verification.
pub trait TlsConnector: Send + Sync {
    /// Performs the TLS handshake over `tcp`.
    fn connect(
        &self,
        host: &str,
        tcp: TcpStream,
    ) -> Pin<Box<dyn Future<Output = io::Result<BoxedTransport>> + Send + '_>>;
}

/// Dials `endpoint`, upgrading to TLS when the scheme asks for it.
pub(crate) async fn dial(
    endpoint: &Endpoint,
    tls: Option<&Arc<dyn TlsConnector>>,
) -> ClientResult<BoxedTransport> {
    match endpoint {
        Endpoint::Tcp { .. } => {
            let address = endpoint.address().unwrap_or_default();
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        Endpoint::Ssl { host, .. } => {
            let connector = tls.ok_or_else(|| ClientError::NotSupported {
                message: format!("ssl endpoint {endpoint} needs a TLS connector"),
            })?;
            let address = endpoint.address().unwrap_or_default();
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            Ok(connector.connect(host, stream).await?)
        }
        #[cfg(unix)]
        Endpoint::Unix { path } => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        Endpoint::Unix { .. } => Err(ClientError::NotSupported {
            message: "unix endpoints are not available on this platform".to_string(),
        }),
    }
}
