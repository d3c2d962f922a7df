use crate::{MaxWireError, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_native_tls::TlsStream;

/// Build a TLS connector (TLS 1.2 minimum)
///
/// With `verify == false` both certificate chain and hostname checks are
/// disabled; this exists for debugging through intercepting proxies.
pub fn connector(verify: bool) -> Result<native_tls::TlsConnector> {
    if !verify {
        tracing::warn!("TLS certificate verification is disabled");
    }
    native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .danger_accept_invalid_certs(!verify)
        .danger_accept_invalid_hostnames(!verify)
        .build()
        .map_err(|e| MaxWireError::HandshakeFailed(format!("TLS connector: {}", e)))
}

/// Run the client TLS handshake over an established stream
pub async fn handshake<S>(stream: S, domain: &str, verify: bool) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connector = tokio_native_tls::TlsConnector::from(connector(verify)?);
    connector
        .connect(domain, stream)
        .await
        .map_err(|e| MaxWireError::HandshakeFailed(format!("TLS handshake with {}: {}", domain, e)))
}
